use std::path::PathBuf;

use ash::vk;
use radiance_render::LoadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("vulkan init failed: {0}")]
    Init(String),
    #[error("{what} failed: {result:?}")]
    Resource { what: &'static str, result: vk::Result },
    #[error("no memory type matches {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),
    #[error("invalid request: {0}")]
    Invalid(&'static str),
    #[error("out of memory ({0:?})")]
    OutOfMemory(vk::Result),
    #[error("format {0:?} lacks required features")]
    UnsupportedFormat(vk::Format),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Decode(LoadError),
    #[error("device lost")]
    DeviceLost,
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    pub fn vk(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                RenderError::OutOfMemory(result)
            }
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED => {
                RenderError::UnsupportedFormat(vk::Format::UNDEFINED)
            }
            _ => RenderError::Resource { what, result },
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, RenderError::DeviceLost)
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        RenderError::vk("vulkan call", result)
    }
}

impl From<LoadError> for RenderError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Io { path, source } => RenderError::Io { path, source },
            other => RenderError::Decode(other),
        }
    }
}

/// Attaches the failing call's name to a raw `VkResult`.
pub(crate) trait VkContext<T> {
    fn ctx(self, what: &'static str) -> RenderResult<T>;
}

impl<T> VkContext<T> for Result<T, vk::Result> {
    fn ctx(self, what: &'static str) -> RenderResult<T> {
        self.map_err(|r| RenderError::vk(what, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(vk::Result::ERROR_DEVICE_LOST, "DeviceLost")]
    #[case(vk::Result::ERROR_OUT_OF_HOST_MEMORY, "OutOfMemory")]
    #[case(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "OutOfMemory")]
    #[case(vk::Result::ERROR_FORMAT_NOT_SUPPORTED, "UnsupportedFormat")]
    #[case(vk::Result::ERROR_INITIALIZATION_FAILED, "Resource")]
    fn vk_results_map_to_kinds(#[case] result: vk::Result, #[case] kind: &str) {
        let err = Err::<(), _>(result).ctx("create_image").unwrap_err();
        assert!(format!("{err:?}").starts_with(kind), "{err:?}");
    }

    #[test]
    fn missing_asset_stays_io() {
        let load = LoadError::Io {
            path: "a.hdr".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(matches!(RenderError::from(load), RenderError::Io { .. }));
    }

    #[test]
    fn resource_error_names_the_call() {
        let err = RenderError::vk("create_sampler", vk::Result::ERROR_TOO_MANY_OBJECTS);
        assert!(err.to_string().contains("create_sampler"));
    }
}
