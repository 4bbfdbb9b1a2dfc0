// SPDX-License-Identifier: CEPL-1.0
//! Disk image decoding through the `image` crate.

use std::path::Path;

use tracing::debug;

use crate::error::LoadError;
use crate::scene::{ImageData, Pixels};

fn open(path: &Path) -> Result<image::DynamicImage, LoadError> {
    image::open(path).map_err(|e| match e {
        image::ImageError::IoError(source) => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => LoadError::Image {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Decodes any supported LDR file to 8-bit RGBA.
pub fn load_rgba8(path: &Path) -> Result<ImageData, LoadError> {
    let rgba = open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    debug!("decoded {} ({width}x{height}, rgba8)", path.display());
    Ok(ImageData {
        width,
        height,
        pixels: Pixels::Rgba8(rgba.into_raw()),
    })
}

/// Decodes an HDR (or any other) file to 32-bit float RGBA.
pub fn load_rgba32f(path: &Path) -> Result<ImageData, LoadError> {
    let rgba = open(path)?.to_rgba32f();
    let (width, height) = rgba.dimensions();
    debug!("decoded {} ({width}x{height}, rgba32f)", path.display());
    Ok(ImageData {
        width,
        height,
        pixels: Pixels::Rgba32F(rgba.into_raw()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_io() {
        let err = load_rgba32f(Path::new("does/not/exist.hdr")).unwrap_err();
        assert!(err.is_io(), "{err}");
        assert_eq!(err.path(), Path::new("does/not/exist.hdr"));
    }

    #[test]
    fn png_round_trips_to_rgba8() {
        let dir = std::env::temp_dir().join("radiance-image-io");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("checker.png");
        let img = image::RgbImage::from_fn(2, 2, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        img.save(&path).unwrap();

        let data = load_rgba8(&path).unwrap();
        assert_eq!((data.width, data.height), (2, 2));
        assert_eq!(&data.bytes()[..4], &[255, 0, 0, 255]);

        let hdr = load_rgba32f(&path).unwrap();
        assert!(hdr.is_hdr());
        assert_eq!(hdr.bytes().len(), 2 * 2 * 16);
    }
}
