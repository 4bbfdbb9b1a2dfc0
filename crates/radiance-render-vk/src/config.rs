use std::ffi::CString;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use crate::error::{RenderError, RenderResult};

pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub enable_validation: bool,
    #[serde(default = "default_layers")]
    pub validation_layer_names: Vec<String>,
    #[serde(default = "default_device_extensions")]
    pub required_device_extensions: Vec<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_render_ahead")]
    pub render_ahead: usize,
    #[serde(default)]
    pub shaders: ShaderPaths,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub passes: PassConfig,
    /// Directory for the persisted pipeline cache. `None` keeps it in memory.
    #[serde(default)]
    pub pipeline_cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShaderPaths {
    pub pbr_vert: PathBuf,
    pub pbr_frag: PathBuf,
    pub skybox_vert: PathBuf,
    pub skybox_frag: PathBuf,
    pub equirect_to_cube: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub hdr_path: PathBuf,
    pub cube_size: u32,
    /// `None` builds the full chain down to 1x1.
    pub mip_levels: Option<u32>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    pub scene: bool,
    pub skybox: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            enable_validation: false,
            validation_layer_names: default_layers(),
            required_device_extensions: default_device_extensions(),
            width: default_width(),
            height: default_height(),
            render_ahead: default_render_ahead(),
            shaders: ShaderPaths::default(),
            environment: EnvironmentConfig::default(),
            passes: PassConfig::default(),
            pipeline_cache_dir: None,
        }
    }
}

impl Default for ShaderPaths {
    fn default() -> Self {
        ShaderPaths {
            pbr_vert: "../shaders/pbr/pbr_vert.spv".into(),
            pbr_frag: "../shaders/pbr/pbr_frag.spv".into(),
            skybox_vert: "../shaders/skybox/skybox_vert.spv".into(),
            skybox_frag: "../shaders/skybox/skybox_frag.spv".into(),
            equirect_to_cube: "../shaders/compute/equirecttocube_cs.spv".into(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            hdr_path: "../assets/environment.hdr".into(),
            cube_size: 1024,
            mip_levels: None,
        }
    }
}

impl Default for PassConfig {
    fn default() -> Self {
        PassConfig {
            scene: true,
            skybox: true,
        }
    }
}

fn default_layers() -> Vec<String> {
    vec!["VK_LAYER_KHRONOS_validation".to_owned()]
}
fn default_device_extensions() -> Vec<String> {
    vec![SWAPCHAIN_EXTENSION.to_owned()]
}
fn default_width() -> u32 {
    1200
}
fn default_height() -> u32 {
    720
}
fn default_render_ahead() -> usize {
    2
}

impl EngineConfig {
    /// Repairs settings the engine cannot run without.
    pub fn normalized(mut self) -> Self {
        if !self
            .required_device_extensions
            .iter()
            .any(|e| e == SWAPCHAIN_EXTENSION)
        {
            warn!("{SWAPCHAIN_EXTENSION} missing from required_device_extensions, adding it");
            self.required_device_extensions
                .push(SWAPCHAIN_EXTENSION.to_owned());
        }
        if self.render_ahead == 0 {
            warn!("render_ahead = 0 is not usable, using 1");
            self.render_ahead = 1;
        }
        if self.environment.cube_size == 0 {
            warn!("environment.cube_size = 0, using 1024");
            self.environment.cube_size = 1024;
        }
        self
    }

    pub fn passes(&self) -> radiance_render::DrawPasses {
        use radiance_render::DrawPasses;
        let mut p = DrawPasses::empty();
        p.set(DrawPasses::SCENE, self.passes.scene);
        p.set(DrawPasses::SKYBOX, self.passes.skybox);
        p
    }
}

pub(crate) fn to_cstrings(names: &[String]) -> RenderResult<Vec<CString>> {
    names
        .iter()
        .map(|n| {
            CString::new(n.as_str())
                .map_err(|_| RenderError::Init(format!("name contains NUL: {n:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiance_render::DrawPasses;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert!(!cfg.enable_validation);
        assert_eq!(cfg.validation_layer_names, ["VK_LAYER_KHRONOS_validation"]);
        assert_eq!(cfg.required_device_extensions, [SWAPCHAIN_EXTENSION]);
        assert_eq!((cfg.width, cfg.height), (1200, 720));
        assert_eq!(cfg.render_ahead, 2);
        assert_eq!(cfg.environment.cube_size, 1024);
        assert_eq!(cfg.environment.mip_levels, None);
        assert_eq!(
            cfg.shaders.equirect_to_cube,
            PathBuf::from("../shaders/compute/equirecttocube_cs.spv")
        );
        assert_eq!(cfg.passes(), DrawPasses::all());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.width, 1200);
        assert_eq!(cfg.shaders.pbr_frag, ShaderPaths::default().pbr_frag);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            enable_validation = true
            [environment]
            cube_size = 512
            [passes]
            skybox = false
            "#,
        )
        .unwrap();
        assert!(cfg.enable_validation);
        assert_eq!(cfg.environment.cube_size, 512);
        assert_eq!(cfg.environment.hdr_path, PathBuf::from("../assets/environment.hdr"));
        assert_eq!(cfg.passes(), DrawPasses::SCENE);
    }

    #[test]
    fn normalize_restores_swapchain_and_render_ahead() {
        let cfg = EngineConfig {
            required_device_extensions: vec!["VK_KHR_maintenance1".into()],
            render_ahead: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(
            cfg.required_device_extensions,
            ["VK_KHR_maintenance1", SWAPCHAIN_EXTENSION]
        );
        assert_eq!(cfg.render_ahead, 1);
    }

    #[test]
    fn nul_in_names_is_init_error() {
        let err = to_cstrings(&["bad\0name".to_owned()]).unwrap_err();
        assert!(matches!(err, RenderError::Init(_)));
    }
}
