//! One-shot conversion of an equirectangular HDR into a mipmapped cube.

use std::path::Path;

use ash::vk;
use radiance_render::scene::{AddressMode, Filter};
use radiance_render::SamplerDesc;
use tracing::info;

use crate::config::EnvironmentConfig;
use crate::descriptors::{DescriptorPool, SetLayout};
use crate::device::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::pipelines::{create_compute, load_shader, PipelineLayout};
use crate::resources::Transition;
use crate::texture::{
    mip_chain_steps, mip_levels_for, record_steps, supports_linear_blit, FileKind, ImageStep,
    StorageDesc, Texture,
};

/// Work-group edge of the conversion shader.
pub const LOCAL_SIZE: u32 = 32;

pub const CUBE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Rounds up; the shader discards invocations past the edge.
pub fn dispatch_groups(side: u32) -> u32 {
    side.div_ceil(LOCAL_SIZE)
}

/// Full chain unless a count is configured, clamped to `[1, full]`.
pub fn cube_mip_levels(side: u32, requested: Option<u32>) -> u32 {
    let full = mip_levels_for(side, side);
    requested.map_or(full, |n| n.clamp(1, full))
}

pub fn environment_sampler() -> SamplerDesc {
    SamplerDesc {
        mag: Filter::Linear,
        min: Filter::Linear,
        address_u: AddressMode::ClampToEdge,
        address_v: AddressMode::ClampToEdge,
        address_w: AddressMode::ClampToEdge,
    }
}

/// Barriers, dispatch and mip generation for a cube whose levels all start
/// `UNDEFINED`.
pub fn cube_steps(image: vk::Image, side: u32, levels: u32) -> Vec<ImageStep> {
    let groups = dispatch_groups(side);
    let mut steps = vec![
        ImageStep::Barrier(Transition::between(
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            0,
            1,
        )),
        ImageStep::Dispatch([groups, groups, 6]),
        ImageStep::Barrier(Transition::between(
            image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            0,
            1,
        )),
    ];
    steps.extend(mip_chain_steps(image, side, side, levels, 6));
    steps
}

fn compute_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    let b = |binding, descriptor_type| vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        ..Default::default()
    };
    [
        b(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        b(1, vk::DescriptorType::STORAGE_IMAGE),
    ]
}

pub struct EnvironmentPrep;

impl EnvironmentPrep {
    /// Loads `cfg.hdr_path`, projects it onto a cube of `cfg.cube_size` and
    /// returns the cube in `SHADER_READ_ONLY`. Every transient object is gone
    /// by the time this returns.
    pub fn run(
        ctx: &DeviceContext,
        cfg: &EnvironmentConfig,
        shader: &Path,
    ) -> RenderResult<Texture> {
        let code = load_shader(shader)?;
        let side = cfg.cube_size;
        let levels = cube_mip_levels(side, cfg.mip_levels);

        let features = ctx.device.format_features(CUBE_FORMAT);
        if !features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
            || (levels > 1 && !supports_linear_blit(features))
        {
            return Err(RenderError::UnsupportedFormat(CUBE_FORMAT));
        }

        let sampler = environment_sampler();
        let source = Texture::from_file(ctx, &cfg.hdr_path, FileKind::Hdr, &sampler)?;

        let mut cube = Texture::storage(
            ctx,
            &StorageDesc {
                width: side,
                height: side,
                layers: 6,
                format: CUBE_FORMAT,
                levels,
                extra_usage: vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            },
            &sampler,
        )?;
        // The shader writes the six faces of level 0 as array layers.
        let storage_view = ctx.factory().create_view_typed(
            &cube.image,
            vk::ImageViewType::TYPE_2D_ARRAY,
            vk::ImageAspectFlags::COLOR,
            0,
            1,
            0,
            6,
        )?;

        let device = &ctx.device;
        let set_layout = SetLayout::create(device, &compute_bindings())?;
        let pool = DescriptorPool::create(
            device,
            1,
            &[
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: 1,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_IMAGE,
                    descriptor_count: 1,
                },
            ],
        )?;
        let set = pool
            .allocate(set_layout.raw, 1)?
            .into_iter()
            .next()
            .ok_or(RenderError::Invalid("empty descriptor allocation"))?;

        let output = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: storage_view.raw,
            image_layout: vk::ImageLayout::GENERAL,
        };
        let writes = [
            vk::WriteDescriptorSet {
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: source.descriptor(),
                ..Default::default()
            },
            vk::WriteDescriptorSet {
                dst_set: set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                p_image_info: &output,
                ..Default::default()
            },
        ];
        unsafe { device.raw.update_descriptor_sets(&writes, &[]) };

        let pipeline = create_compute(
            ctx,
            PipelineLayout::create(device, &[set_layout.raw])?,
            &code,
        )?;

        let steps = cube_steps(cube.image.raw, side, levels);
        ctx.one_shot(|d, cmd| {
            unsafe {
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.raw);
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    pipeline.layout.raw,
                    0,
                    &[set],
                    &[],
                );
            }
            record_steps(d, cmd, cube.image.raw, &steps);
            Ok(())
        })?;
        cube.set_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        drop(pipeline);
        drop(pool);
        drop(set_layout);
        drop(storage_view);
        drop(source);

        info!(
            "environment cube {side}x{side}, {levels} mips from {}",
            cfg.hdr_path.display()
        );
        Ok(cube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::replay_layouts;
    use rstest::rstest;

    #[rstest]
    #[case(1024, 32)]
    #[case(1000, 32)]
    #[case(33, 2)]
    #[case(1, 1)]
    fn dispatch_rounds_up(#[case] side: u32, #[case] groups: u32) {
        assert_eq!(dispatch_groups(side), groups);
    }

    #[rstest]
    #[case(1024, None, 11)]
    #[case(1024, Some(1), 1)]
    #[case(1024, Some(0), 1)]
    #[case(1024, Some(40), 11)]
    #[case(512, Some(4), 4)]
    fn mip_count_is_configurable(
        #[case] side: u32,
        #[case] requested: Option<u32>,
        #[case] want: u32,
    ) {
        assert_eq!(cube_mip_levels(side, requested), want);
    }

    #[test]
    fn every_level_ends_shader_readable() {
        let levels = cube_mip_levels(1024, None);
        let steps = cube_steps(vk::Image::null(), 1024, levels);
        let mut layouts = vec![vk::ImageLayout::UNDEFINED; levels as usize];
        replay_layouts(&mut layouts, &steps).unwrap();
        assert_eq!(layouts.len(), 11);
        assert!(layouts
            .iter()
            .all(|&l| l == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn dispatch_follows_general_transition() {
        let steps = cube_steps(vk::Image::null(), 100, 1);
        match (&steps[0], &steps[1]) {
            (ImageStep::Barrier(t), ImageStep::Dispatch(groups)) => {
                assert_eq!(t.new_layout, vk::ImageLayout::GENERAL);
                assert_eq!(t.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
                assert_eq!(*groups, [4, 4, 6]);
            }
            other => panic!("unexpected prefix {other:?}"),
        }
    }

    #[test]
    fn single_level_cube_still_reaches_shader_read() {
        let steps = cube_steps(vk::Image::null(), 64, 1);
        let mut layouts = vec![vk::ImageLayout::UNDEFINED];
        replay_layouts(&mut layouts, &steps).unwrap();
        assert_eq!(layouts[0], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(!steps.iter().any(|s| matches!(s, ImageStep::Blit(_))));
    }
}
