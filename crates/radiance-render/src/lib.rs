// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod draw;
pub mod error;
pub mod gltf_loader;
pub mod image_io;
pub mod scene;

pub use draw::{draw_nodes, resolve_material, DrawPasses, DrawRecorder};
pub use error::LoadError;
pub use scene::{
    ImageData, MaterialDesc, ModelStats, SamplerDesc, SceneModel, SceneUbo, TextureId, Vertex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Camera matrices for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInput {
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for FrameInput {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

/// Models handed to a renderer at creation. The renderer keeps them alive
/// for as long as any descriptor references their textures.
pub struct SceneAssets {
    pub scene: SceneModel,
    pub skybox: SceneModel,
}

pub trait Renderer {
    type Config;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &Self::Config,
        assets: SceneAssets,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self, frame: &FrameInput) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_draw_passes(&mut self, _passes: DrawPasses) {}
}
