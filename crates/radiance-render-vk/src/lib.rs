use anyhow::Result;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{error, info};

use radiance_render::{
    DrawPasses, FrameInput, ModelStats, RenderSize, Renderer, SceneAssets, SceneUbo,
};

pub mod config;
pub mod descriptors;
pub mod device;
pub mod environment;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod model;
pub mod pipelines;
pub mod resources;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use config::{EngineConfig, EnvironmentConfig, PassConfig, ShaderPaths};
pub use error::{RenderError, RenderResult};
pub use frame::{AcquireOutcome, FrameBackend, FrameLoop, FrameReport, PresentOutcome};
pub use ledger::{HandleKind, HandleLedger};

use descriptors::{DescriptorAllocator, PoolSizing};
use device::DeviceContext;
use environment::EnvironmentPrep;
use error::VkContext;
use model::GpuModel;
use pipelines::{PipelineSet, RenderPass};
use resources::Buffer;
use swapchain::{pick_depth_format, RenderTargets, Swapchain};
use sync::FrameSync;
use texture::Texture;

/// Command buffer and uniform buffer owned by one frame slot.
struct FrameResources {
    cmd: vk::CommandBuffer,
    ubo: Buffer,
}

/// Every GPU object of the renderer. Field order is teardown order; the
/// device context goes last.
struct Engine {
    frames: Vec<FrameResources>,
    skybox_sets: Vec<vk::DescriptorSet>,
    targets: RenderTargets,
    pipelines: PipelineSet,
    render_pass: RenderPass,
    descriptors: DescriptorAllocator,
    environment: Texture,
    skybox: GpuModel,
    scene: GpuModel,
    sync: FrameSync,
    ctx: DeviceContext,

    size: RenderSize,
    clear: [f32; 4],
    shaders: ShaderPaths,
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.device.wait_idle() {
            error!("vk: wait_idle on shutdown failed: {e}");
        }
        let cmds: Vec<_> = self.frames.iter().map(|f| f.cmd).collect();
        self.ctx.free_command_buffers(&cmds);
        info!("vk: renderer shutting down");
    }
}

impl Engine {
    // Create order: device → swapchain → render pass → depth/framebuffers →
    // command buffers → uniform buffers → descriptors → material sets →
    // pipelines → environment → skybox sets. An error at any step drops what
    // was built so far in reverse.
    fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &EngineConfig,
        assets: SceneAssets,
    ) -> RenderResult<Self> {
        let cfg = cfg.clone().normalized();
        let ctx = DeviceContext::create(window, display, &cfg)?;
        let device = &ctx.device;

        let swapchain = Swapchain::create(device, size, None)?;
        let depth_format = pick_depth_format(|f| device.format_features(f))?;
        let render_pass = RenderPass::create(device, swapchain.format, depth_format)?;
        let targets = RenderTargets::from_swapchain(&ctx, &render_pass, swapchain)?;

        let slots = cfg.render_ahead;
        let cmds = ctx.allocate_command_buffers(slots as u32)?;
        let mut frames = Vec::with_capacity(slots);
        for &cmd in &cmds {
            match ctx.factory().create_mapped_buffer(
                std::mem::size_of::<SceneUbo>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            ) {
                Ok(ubo) => frames.push(FrameResources { cmd, ubo }),
                Err(e) => {
                    ctx.free_command_buffers(&cmds);
                    return Err(e);
                }
            }
        }
        // From here on `frames` is released through `FramesGuard` on error.
        let guard = FramesGuard {
            ctx: &ctx,
            frames: Some(frames),
        };
        let ubo_infos: Vec<_> = guard.frames().iter().map(|f| f.ubo.descriptor_info()).collect();

        let mut scene = GpuModel::upload(&ctx, assets.scene)?;
        let skybox = GpuModel::upload(&ctx, assets.skybox)?;

        let stats = ModelStats {
            materials: scene.materials.len(),
            meshes: scene.cpu.stats().meshes,
        };
        let sizing = PoolSizing::from_stats(stats, targets.image_count() as u32)
            .max(PoolSizing::required(stats.materials as u32, slots as u32));
        let descriptors = DescriptorAllocator::create(device, sizing)?;
        scene.allocate_material_sets(&descriptors, &ubo_infos)?;

        let pipelines = PipelineSet::create(&ctx, &render_pass, &cfg.shaders, &descriptors)?;

        let environment =
            EnvironmentPrep::run(&ctx, &cfg.environment, &cfg.shaders.equirect_to_cube)?;

        let skybox_sets = descriptors.allocate_skybox(slots)?;
        for (&set, ubo) in skybox_sets.iter().zip(&ubo_infos) {
            descriptors.write_skybox_set(set, ubo, environment.descriptor());
        }
        let sync = FrameSync::create(device, slots)?;

        info!(
            "vk: renderer ready ({} materials, {} swap images, {} frame slots)",
            scene.materials.len(),
            targets.image_count(),
            slots
        );
        let frames = guard.release();
        Ok(Engine {
            frames,
            skybox_sets,
            targets,
            pipelines,
            render_pass,
            descriptors,
            environment,
            skybox,
            scene,
            sync,
            ctx,
            size,
            clear: [0.0, 0.0, 0.0, 1.0],
            shaders: cfg.shaders.clone(),
        })
    }

    fn record_commands(
        &self,
        slot: usize,
        image: u32,
        passes: DrawPasses,
    ) -> RenderResult<()> {
        let d = self.ctx.raw();
        let cmd = self.frames[slot].cmd;
        let framebuffer = *self
            .targets
            .framebuffers
            .raw
            .get(image as usize)
            .ok_or(RenderError::Invalid("acquired image has no framebuffer"))?;
        let extent = self.targets.extent();

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .ctx("reset_command_buffer")?;
            d.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .ctx("begin_command_buffer")?;

            let clears = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.clear,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            let rp_begin = vk::RenderPassBeginInfo {
                render_pass: self.render_pass.raw,
                framebuffer,
                render_area,
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[render_area]);

            if passes.contains(DrawPasses::SKYBOX) {
                let sky = &self.pipelines.skybox;
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, sky.raw);
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    sky.layout.raw,
                    0,
                    &[self.skybox_sets[slot]],
                    &[],
                );
                self.skybox.draw(d, cmd, sky.layout.raw, &[]);
            }

            if passes.contains(DrawPasses::SCENE) {
                let pbr = &self.pipelines.scene;
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pbr.raw);
                self.scene
                    .draw(d, cmd, pbr.layout.raw, self.scene.material_sets(slot));
            }

            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd).ctx("end_command_buffer")
        }
    }
}

impl FrameBackend for Engine {
    fn framebuffer_size(&self) -> RenderResult<RenderSize> {
        let device = &self.ctx.device;
        let inst = &device.instance;
        let caps = unsafe {
            inst.surface_loader
                .get_physical_device_surface_capabilities(device.phys, inst.surface)
        }
        .ctx("get_physical_device_surface_capabilities")?;
        // u32::MAX means the window decides; use what it last reported.
        Ok(if caps.current_extent.width == u32::MAX {
            self.size
        } else {
            RenderSize {
                width: caps.current_extent.width,
                height: caps.current_extent.height,
            }
        })
    }

    fn wait_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.sync.wait(slot)
    }

    fn acquire(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        let sem = self.sync.slot(slot).acquire;
        Ok(match self.targets.swapchain.acquire(sem)? {
            None => AcquireOutcome::OutOfDate,
            Some((i, true)) => AcquireOutcome::Suboptimal(i),
            Some((i, false)) => AcquireOutcome::Ready(i),
        })
    }

    fn write_uniforms(&mut self, slot: usize, ubo: &SceneUbo) -> RenderResult<()> {
        self.frames[slot].ubo.write_bytes(bytemuck::bytes_of(ubo))
    }

    fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.sync.reset(slot)
    }

    fn record(&mut self, slot: usize, image: u32, passes: DrawPasses) -> RenderResult<()> {
        self.record_commands(slot, image, passes)
    }

    fn submit(&mut self, slot: usize) -> RenderResult<()> {
        let s = *self.sync.slot(slot);
        let cmd = self.frames[slot].cmd;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let si = vk::SubmitInfo {
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.acquire,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .raw()
                .queue_submit(
                    self.ctx.device.queues.graphics,
                    std::slice::from_ref(&si),
                    s.in_flight,
                )
                .ctx("queue_submit")
        }
    }

    fn present(&mut self, slot: usize, image: u32) -> RenderResult<PresentOutcome> {
        let wait = self.sync.slot(slot).render;
        Ok(match self.targets.swapchain.present(image, wait)? {
            None => PresentOutcome::OutOfDate,
            Some(true) => PresentOutcome::Suboptimal,
            Some(false) => PresentOutcome::Presented,
        })
    }

    // STRICT ORDER (recreate):
    // 1) device_wait_idle() so nothing in flight references the old targets
    // 2) create the NEW swapchain, handing over the old one
    // 3) rebuild render pass + pipelines ONLY if the colour format changed
    // 4) new depth + framebuffers; the old set drops on assignment
    // Descriptor sets reference no swapchain-sized resources and survive.
    fn recreate(&mut self, size: RenderSize) -> RenderResult<()> {
        self.ctx.device.wait_idle()?;

        let swapchain = Swapchain::create(&self.ctx.device, size, Some(&self.targets.swapchain))?;

        if swapchain.format != self.render_pass.color_format {
            info!(
                "vk: swapchain format {:?} → {:?}, rebuilding pipelines",
                self.render_pass.color_format, swapchain.format
            );
            self.render_pass =
                RenderPass::create(&self.ctx.device, swapchain.format, self.render_pass.depth_format)?;
            self.pipelines =
                PipelineSet::create(&self.ctx, &self.render_pass, &self.shaders, &self.descriptors)?;
        }

        self.targets = RenderTargets::from_swapchain(&self.ctx, &self.render_pass, swapchain)?;
        self.size = size;
        Ok(())
    }
}

/// Frees per-slot command buffers if creation bails out before `Engine`
/// takes ownership of them.
struct FramesGuard<'a> {
    ctx: &'a DeviceContext,
    frames: Option<Vec<FrameResources>>,
}

impl FramesGuard<'_> {
    fn frames(&self) -> &[FrameResources] {
        self.frames.as_deref().unwrap_or_default()
    }

    fn release(mut self) -> Vec<FrameResources> {
        self.frames.take().unwrap_or_default()
    }
}

impl Drop for FramesGuard<'_> {
    fn drop(&mut self) {
        if let Some(frames) = self.frames.take() {
            let cmds: Vec<_> = frames.iter().map(|f| f.cmd).collect();
            self.ctx.free_command_buffers(&cmds);
        }
    }
}

/// Vulkan PBR renderer: glTF scene over an HDR environment skybox.
pub struct VkRenderer {
    frame_loop: FrameLoop,
    engine: Engine,
}

impl VkRenderer {
    pub fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &EngineConfig,
        assets: SceneAssets,
    ) -> RenderResult<Self> {
        let engine = Engine::create(window, display, size, cfg, assets)?;
        let frame_loop = FrameLoop::new(engine.frames.len(), cfg.passes());
        Ok(VkRenderer { frame_loop, engine })
    }

    /// One pass through the frame state machine.
    pub fn render_frame(&mut self, input: &FrameInput) -> RenderResult<FrameReport> {
        self.frame_loop.run_frame(&mut self.engine, input)
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.engine.ctx.device.ledger
    }

    pub fn swapchain_extent(&self) -> RenderSize {
        let e = self.engine.targets.extent();
        RenderSize {
            width: e.width,
            height: e.height,
        }
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.engine.targets.image_count()
    }

    pub fn environment_mip_levels(&self) -> u32 {
        self.engine.environment.mip_levels()
    }

    pub fn draw_passes(&self) -> DrawPasses {
        self.frame_loop.passes
    }
}

impl Renderer for VkRenderer {
    type Config = EngineConfig;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &EngineConfig,
        assets: SceneAssets,
    ) -> Result<Self> {
        Ok(Self::create(window, display, size, cfg, assets)?)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if !size.is_empty() {
            self.engine.size = size;
        }
        self.frame_loop.notify_resized();
        Ok(())
    }

    fn render(&mut self, frame: &FrameInput) -> Result<()> {
        match self.render_frame(frame) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_device_lost() {
                    error!("vk: device lost, stopping");
                }
                Err(e.into())
            }
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.engine.clear = rgba;
    }

    fn set_draw_passes(&mut self, passes: DrawPasses) {
        self.frame_loop.passes = passes;
    }
}
