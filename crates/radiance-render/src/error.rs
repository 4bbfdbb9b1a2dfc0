// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid glTF {path}: {source}")]
    Gltf {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },
    #[error("{path}: mesh {mesh} has a primitive without positions")]
    MissingPositions { path: PathBuf, mesh: usize },
    #[error("{path}: document has no scene")]
    EmptyScene { path: PathBuf },
    #[error("{path}: image {image} is malformed: {reason}")]
    BadImage {
        path: PathBuf,
        image: usize,
        reason: &'static str,
    },
}

impl LoadError {
    /// True when the file itself could not be read, as opposed to decoded.
    pub fn is_io(&self) -> bool {
        matches!(self, LoadError::Io { .. })
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            LoadError::Io { path, .. }
            | LoadError::Image { path, .. }
            | LoadError::Gltf { path, .. }
            | LoadError::MissingPositions { path, .. }
            | LoadError::EmptyScene { path }
            | LoadError::BadImage { path, .. } => path,
        }
    }
}
