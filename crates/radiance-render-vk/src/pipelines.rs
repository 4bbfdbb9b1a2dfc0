//! Render pass, graphics pipelines and the compute pipeline helper.

use std::ffi::CStr;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use radiance_render::Vertex;
use tracing::info;

use crate::config::ShaderPaths;
use crate::descriptors::DescriptorAllocator;
use crate::device::{Device, DeviceContext};
use crate::error::{RenderError, RenderResult, VkContext};
use crate::ledger::HandleKind;

const ENTRY: &CStr = c"main";

/// Reads a SPIR-V file. Missing or malformed files are I/O errors.
pub fn load_shader(path: &Path) -> RenderResult<Vec<u32>> {
    let io = |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(io)?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(io)
}

pub struct ShaderModule {
    device: Arc<Device>,
    pub raw: vk::ShaderModule,
}

impl ShaderModule {
    pub fn new(device: &Arc<Device>, code: &[u32]) -> RenderResult<Self> {
        let ci = vk::ShaderModuleCreateInfo {
            code_size: std::mem::size_of_val(code),
            p_code: code.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe {
            device
                .raw
                .create_shader_module(&ci, None)
                .ctx("create_shader_module")?
        };
        device.ledger.created(HandleKind::ShaderModule);
        Ok(ShaderModule {
            device: Arc::clone(device),
            raw,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_shader_module(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::ShaderModule);
    }
}

pub struct PipelineLayout {
    device: Arc<Device>,
    pub raw: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn create(device: &Arc<Device>, set_layouts: &[vk::DescriptorSetLayout]) -> RenderResult<Self> {
        let ci = vk::PipelineLayoutCreateInfo {
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe {
            device
                .raw
                .create_pipeline_layout(&ci, None)
                .ctx("create_pipeline_layout")?
        };
        device.ledger.created(HandleKind::PipelineLayout);
        Ok(PipelineLayout {
            device: Arc::clone(device),
            raw,
        })
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_pipeline_layout(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::PipelineLayout);
    }
}

pub struct Pipeline {
    device: Arc<Device>,
    pub raw: vk::Pipeline,
    pub layout: PipelineLayout,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_pipeline(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::Pipeline);
    }
}

fn first_pipeline(
    device: &Arc<Device>,
    what: &'static str,
    created: Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
) -> RenderResult<vk::Pipeline> {
    match created {
        Ok(p) => p
            .into_iter()
            .next()
            .ok_or(RenderError::Invalid("driver returned no pipeline")),
        Err((partial, err)) => {
            for p in partial.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                unsafe { device.raw.destroy_pipeline(p, None) };
            }
            Err(RenderError::vk(what, err))
        }
    }
}

/// Colour clear/store to present, depth clear/don't-care.
pub fn render_pass_attachments(
    color: vk::Format,
    depth: vk::Format,
) -> [vk::AttachmentDescription; 2] {
    [
        vk::AttachmentDescription {
            format: color,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ]
}

pub fn external_dependency() -> vk::SubpassDependency {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

pub struct RenderPass {
    device: Arc<Device>,
    pub raw: vk::RenderPass,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

impl RenderPass {
    pub fn create(device: &Arc<Device>, color: vk::Format, depth: vk::Format) -> RenderResult<Self> {
        let attachments = render_pass_attachments(color, depth);
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        let dependency = external_dependency();
        let ci = vk::RenderPassCreateInfo {
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let raw = unsafe {
            device
                .raw
                .create_render_pass(&ci, None)
                .ctx("create_render_pass")?
        };
        device.ledger.created(HandleKind::RenderPass);
        Ok(RenderPass {
            device: Arc::clone(device),
            raw,
            color_format: color,
            depth_format: depth,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_render_pass(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::RenderPass);
    }
}

/// The state that differs between the scene and skybox pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineVariant {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
    /// All five vertex attributes, or position only.
    pub full_vertex: bool,
}

impl PipelineVariant {
    pub fn scene() -> Self {
        PipelineVariant {
            depth_test: true,
            depth_write: true,
            compare_op: vk::CompareOp::LESS,
            full_vertex: true,
        }
    }

    pub fn skybox() -> Self {
        PipelineVariant {
            depth_test: false,
            depth_write: false,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
            full_vertex: false,
        }
    }

    pub fn depth_state(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo {
            depth_test_enable: self.depth_test.into(),
            depth_write_enable: self.depth_write.into(),
            depth_compare_op: self.compare_op,
            ..Default::default()
        }
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: Vertex::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attributes(full: bool) -> Vec<vk::VertexInputAttributeDescription> {
    let all = [
        (vk::Format::R32G32B32_SFLOAT, Vertex::OFFSET_POS),
        (vk::Format::R32G32B32_SFLOAT, Vertex::OFFSET_NORMAL),
        (vk::Format::R32G32_SFLOAT, Vertex::OFFSET_UV0),
        (vk::Format::R32G32_SFLOAT, Vertex::OFFSET_UV1),
        (vk::Format::R32G32B32A32_SFLOAT, Vertex::OFFSET_COLOR),
    ];
    let count = if full { all.len() } else { 1 };
    all.iter()
        .take(count)
        .enumerate()
        .map(|(location, &(format, offset))| vk::VertexInputAttributeDescription {
            location: location as u32,
            binding: 0,
            format,
            offset,
        })
        .collect()
}

fn create_graphics(
    ctx: &DeviceContext,
    render_pass: vk::RenderPass,
    layout: PipelineLayout,
    vert: &ShaderModule,
    frag: &ShaderModule,
    variant: PipelineVariant,
) -> RenderResult<Pipeline> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert.raw,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag.raw,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
    ];

    let binding = vertex_binding();
    let attributes = vertex_attributes(variant.full_vertex);
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Viewport and scissor are set per frame.
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = variant.depth_state();
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let info = vk::GraphicsPipelineCreateInfo {
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout: layout.raw,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let device = &ctx.device;
    let created = unsafe {
        device.raw.create_graphics_pipelines(
            ctx.pipeline_cache,
            std::slice::from_ref(&info),
            None,
        )
    };
    let raw = first_pipeline(device, "create_graphics_pipelines", created)?;
    device.ledger.created(HandleKind::Pipeline);
    Ok(Pipeline {
        device: Arc::clone(device),
        raw,
        layout,
    })
}

pub fn create_compute(
    ctx: &DeviceContext,
    layout: PipelineLayout,
    code: &[u32],
) -> RenderResult<Pipeline> {
    let device = &ctx.device;
    let module = ShaderModule::new(device, code)?;
    let info = vk::ComputePipelineCreateInfo {
        stage: vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::COMPUTE,
            module: module.raw,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
        layout: layout.raw,
        ..Default::default()
    };
    let created = unsafe {
        device.raw.create_compute_pipelines(
            ctx.pipeline_cache,
            std::slice::from_ref(&info),
            None,
        )
    };
    let raw = first_pipeline(device, "create_compute_pipelines", created)?;
    device.ledger.created(HandleKind::Pipeline);
    Ok(Pipeline {
        device: Arc::clone(device),
        raw,
        layout,
    })
}

/// Scene and skybox pipelines, built against one render pass.
pub struct PipelineSet {
    pub scene: Pipeline,
    pub skybox: Pipeline,
}

impl PipelineSet {
    /// All SPIR-V is read before any handle is created.
    pub fn create(
        ctx: &DeviceContext,
        render_pass: &RenderPass,
        shaders: &ShaderPaths,
        descriptors: &DescriptorAllocator,
    ) -> RenderResult<Self> {
        let pbr_vert = load_shader(&shaders.pbr_vert)?;
        let pbr_frag = load_shader(&shaders.pbr_frag)?;
        let sky_vert = load_shader(&shaders.skybox_vert)?;
        let sky_frag = load_shader(&shaders.skybox_frag)?;

        let device = &ctx.device;
        let scene = create_graphics(
            ctx,
            render_pass.raw,
            PipelineLayout::create(device, &[descriptors.scene_layout.raw])?,
            &ShaderModule::new(device, &pbr_vert)?,
            &ShaderModule::new(device, &pbr_frag)?,
            PipelineVariant::scene(),
        )?;
        let skybox = create_graphics(
            ctx,
            render_pass.raw,
            PipelineLayout::create(device, &[descriptors.skybox_layout.raw])?,
            &ShaderModule::new(device, &sky_vert)?,
            &ShaderModule::new(device, &sky_frag)?,
            PipelineVariant::skybox(),
        )?;
        info!(
            "pipelines ready for {:?} / {:?}",
            render_pass.color_format, render_pass.depth_format
        );
        Ok(PipelineSet { scene, skybox })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_differ_only_where_expected() {
        let scene = PipelineVariant::scene().depth_state();
        assert_eq!(scene.depth_test_enable, vk::TRUE);
        assert_eq!(scene.depth_write_enable, vk::TRUE);
        assert_eq!(scene.depth_compare_op, vk::CompareOp::LESS);

        let sky = PipelineVariant::skybox().depth_state();
        assert_eq!(sky.depth_test_enable, vk::FALSE);
        assert_eq!(sky.depth_write_enable, vk::FALSE);
        assert_eq!(sky.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
    }

    #[test]
    fn attributes_follow_vertex_layout() {
        let full = vertex_attributes(true);
        assert_eq!(full.len(), 5);
        let offsets: Vec<_> = full.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, [0, 12, 24, 32, 40]);
        assert_eq!(full[4].format, vk::Format::R32G32B32A32_SFLOAT);
        assert!(full.iter().enumerate().all(|(i, a)| a.location == i as u32));

        let pos_only = vertex_attributes(false);
        assert_eq!(pos_only.len(), 1);
        assert_eq!(pos_only[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(vertex_binding().stride, 56);
    }

    #[test]
    fn attachments_match_pass_contract() {
        let [color, depth] =
            render_pass_attachments(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );

        let dep = external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(dep
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn missing_shader_is_io_error() {
        let err = load_shader(Path::new("definitely/not/here.spv")).unwrap_err();
        assert!(matches!(err, RenderError::Io { .. }));
    }

    #[test]
    fn misaligned_spirv_is_rejected() {
        let path = std::env::temp_dir().join(format!("radiance_bad_{}.spv", std::process::id()));
        fs::write(&path, [1u8, 2, 3]).unwrap();
        let err = load_shader(&path).unwrap_err();
        let _ = fs::remove_file(&path);
        assert!(matches!(err, RenderError::Io { .. }));
    }
}
