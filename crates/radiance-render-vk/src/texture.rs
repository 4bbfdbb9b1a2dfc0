//! Sampled images: glTF textures, decoded files and storage targets.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use radiance_render::scene::{AddressMode, Filter};
use radiance_render::{image_io, ImageData, SamplerDesc};
use tracing::debug;

use crate::device::{Device, DeviceContext};
use crate::error::{RenderError, RenderResult, VkContext};
use crate::ledger::HandleKind;
use crate::resources::{transition, Image, ImageDesc, ImageView, Transition};

/// `floor(log2(max(w, h))) + 1`.
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Blit-based mip generation needs linear filtering plus blit on both ends.
pub fn supports_linear_blit(features: vk::FormatFeatureFlags) -> bool {
    features.contains(
        vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
            | vk::FormatFeatureFlags::BLIT_SRC
            | vk::FormatFeatureFlags::BLIT_DST,
    )
}

fn vk_filter(f: Filter) -> vk::Filter {
    match f {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

fn vk_address(a: AddressMode) -> vk::SamplerAddressMode {
    match a {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

pub fn sampler_info(desc: &SamplerDesc, max_anisotropy: Option<f32>) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        mag_filter: vk_filter(desc.mag),
        min_filter: vk_filter(desc.min),
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk_address(desc.address_u),
        address_mode_v: vk_address(desc.address_v),
        address_mode_w: vk_address(desc.address_w),
        anisotropy_enable: max_anisotropy.is_some().into(),
        max_anisotropy: max_anisotropy.unwrap_or(1.0),
        compare_op: vk::CompareOp::NEVER,
        min_lod: 0.0,
        max_lod: vk::LOD_CLAMP_NONE,
        border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
        ..Default::default()
    }
}

pub struct Sampler {
    device: Arc<Device>,
    pub raw: vk::Sampler,
}

impl Sampler {
    pub fn new(device: &Arc<Device>, desc: &SamplerDesc) -> RenderResult<Self> {
        let ci = sampler_info(desc, device.max_anisotropy());
        let raw = unsafe { device.raw.create_sampler(&ci, None).ctx("create_sampler")? };
        device.ledger.created(HandleKind::Sampler);
        Ok(Sampler {
            device: Arc::clone(device),
            raw,
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_sampler(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::Sampler);
    }
}

/// How 8-bit texel values are interpreted by the sampler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorSpace {
    /// Data textures: normals, metallic/roughness, occlusion.
    #[default]
    Linear,
    /// Colour textures; the sampler decodes to linear.
    Srgb,
}

/// Upload format for decoded pixels. Float data is always linear.
pub fn upload_format(data: &ImageData, space: ColorSpace) -> vk::Format {
    match (data.is_hdr(), space) {
        (true, _) => vk::Format::R32G32B32A32_SFLOAT,
        (false, ColorSpace::Linear) => vk::Format::R8G8B8A8_UNORM,
        (false, ColorSpace::Srgb) => vk::Format::R8G8B8A8_SRGB,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// 8-bit RGBA, mipmapped.
    Ldr,
    /// 32-bit float RGBA, single level.
    Hdr,
}

/// Parameters of an empty texture that shaders will write.
#[derive(Clone, Copy, Debug)]
pub struct StorageDesc {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: vk::Format,
    /// 0 selects the full chain.
    pub levels: u32,
    pub extra_usage: vk::ImageUsageFlags,
}

pub struct Texture {
    pub sampler: Sampler,
    pub view: ImageView,
    pub image: Image,
    /// Last layout submitted for the whole image.
    pub layout: vk::ImageLayout,
    descriptor: vk::DescriptorImageInfo,
}

impl Texture {
    fn assemble(image: Image, view: ImageView, sampler: Sampler, layout: vk::ImageLayout) -> Self {
        let mut t = Texture {
            sampler,
            view,
            image,
            layout,
            descriptor: vk::DescriptorImageInfo::default(),
        };
        t.update_descriptor();
        t
    }

    /// Uploads decoded pixels, optionally generating the full mip chain.
    pub fn from_image_data(
        ctx: &DeviceContext,
        data: &ImageData,
        sampler: &SamplerDesc,
        space: ColorSpace,
        mipmapped: bool,
    ) -> RenderResult<Self> {
        let format = upload_format(data, space);
        let levels = if mipmapped {
            mip_levels_for(data.width, data.height)
        } else {
            1
        };
        if levels > 1 && !supports_linear_blit(ctx.device.format_features(format)) {
            return Err(RenderError::UnsupportedFormat(format));
        }

        let factory = ctx.factory();
        let staging = factory.staging(data.bytes())?;
        let mut desc = ImageDesc::sampled_2d(data.width, data.height, levels, format);
        desc.usage |= vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC;
        let image = factory.create_image(&desc)?;

        ctx.one_shot(|d, cmd| {
            transition(
                d,
                cmd,
                &Transition::between(
                    image.raw,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    0,
                    1,
                ),
            );
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_extent: vk::Extent3D {
                    width: data.width,
                    height: data.height,
                    depth: 1,
                },
                ..Default::default()
            };
            unsafe {
                d.cmd_copy_buffer_to_image(
                    cmd,
                    staging.raw,
                    image.raw,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
            }
            if levels > 1 {
                transition(
                    d,
                    cmd,
                    &Transition::between(
                        image.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        0,
                        1,
                    ),
                );
                record_mip_chain(d, cmd, &image);
            } else {
                transition(
                    d,
                    cmd,
                    &Transition::between(
                        image.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        0,
                        1,
                    ),
                );
            }
            Ok(())
        })?;

        let view = factory.create_view(&image, vk::ImageAspectFlags::COLOR, 0, levels, 0, 1)?;
        let sampler = Sampler::new(&ctx.device, sampler)?;
        debug!(
            "texture {}x{} {:?}, {} levels",
            data.width, data.height, format, levels
        );
        Ok(Self::assemble(
            image,
            view,
            sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ))
    }

    pub fn from_file(
        ctx: &DeviceContext,
        path: &Path,
        kind: FileKind,
        sampler: &SamplerDesc,
    ) -> RenderResult<Self> {
        let data = match kind {
            FileKind::Ldr => image_io::load_rgba8(path)?,
            FileKind::Hdr => image_io::load_rgba32f(path)?,
        };
        let ldr = kind == FileKind::Ldr;
        let space = if ldr {
            ColorSpace::Srgb
        } else {
            ColorSpace::Linear
        };
        Self::from_image_data(ctx, &data, sampler, space, ldr)
    }

    /// 1x1 texture standing in for absent material slots.
    pub fn solid(ctx: &DeviceContext, rgba: [u8; 4]) -> RenderResult<Self> {
        Self::from_image_data(
            ctx,
            &ImageData::solid_rgba8(rgba),
            &SamplerDesc::default(),
            ColorSpace::Linear,
            false,
        )
    }

    /// Empty texture in `UNDEFINED`, sampled plus `extra_usage`. Six layers
    /// make it cube compatible.
    pub fn storage(
        ctx: &DeviceContext,
        desc: &StorageDesc,
        sampler: &SamplerDesc,
    ) -> RenderResult<Self> {
        let levels = if desc.levels == 0 {
            mip_levels_for(desc.width, desc.height)
        } else {
            desc.levels
        };
        let factory = ctx.factory();
        let image = factory.create_image(&ImageDesc {
            width: desc.width,
            height: desc.height,
            layers: desc.layers,
            levels,
            format: desc.format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::SAMPLED | desc.extra_usage,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            cube: desc.layers == 6,
        })?;
        let view = factory.create_view(
            &image,
            vk::ImageAspectFlags::COLOR,
            0,
            levels,
            0,
            desc.layers,
        )?;
        let sampler = Sampler::new(&ctx.device, sampler)?;
        Ok(Self::assemble(image, view, sampler, vk::ImageLayout::UNDEFINED))
    }

    pub fn width(&self) -> u32 {
        self.image.width
    }

    pub fn height(&self) -> u32 {
        self.image.height
    }

    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels
    }

    pub fn layers(&self) -> u32 {
        self.image.layers
    }

    pub fn format(&self) -> vk::Format {
        self.image.format
    }

    /// Refreshes the cached `(sampler, view, layout)` after a transition.
    pub fn update_descriptor(&mut self) {
        self.descriptor = vk::DescriptorImageInfo {
            sampler: self.sampler.raw,
            image_view: self.view.raw,
            image_layout: self.layout,
        };
    }

    pub fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
        self.update_descriptor();
    }

    pub fn descriptor(&self) -> &vk::DescriptorImageInfo {
        &self.descriptor
    }
}

/// Each level `L > 0` is blitted at half size from `L - 1`.
pub fn blit_regions(width: u32, height: u32, levels: u32, layers: u32) -> Vec<vk::ImageBlit> {
    let extent = |level: u32| -> vk::Offset3D {
        vk::Offset3D {
            x: (width >> level).max(1) as i32,
            y: (height >> level).max(1) as i32,
            z: 1,
        }
    };
    (1..levels)
        .map(|level| vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: layers,
            },
            src_offsets: [vk::Offset3D::default(), extent(level - 1)],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: layers,
            },
            dst_offsets: [vk::Offset3D::default(), extent(level)],
        })
        .collect()
}

/// One recorded command of a layout/mip sequence.
#[derive(Clone, Copy, Debug)]
pub enum ImageStep {
    Barrier(Transition),
    Blit(vk::ImageBlit),
    Dispatch([u32; 3]),
}

/// Expects level 0 in `TRANSFER_SRC`; leaves every level in `SHADER_READ_ONLY`.
pub fn mip_chain_steps(
    image: vk::Image,
    width: u32,
    height: u32,
    levels: u32,
    layers: u32,
) -> Vec<ImageStep> {
    let mut steps = Vec::new();
    for (i, blit) in blit_regions(width, height, levels, layers)
        .into_iter()
        .enumerate()
    {
        let level = i as u32 + 1;
        steps.push(ImageStep::Barrier(Transition::between(
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            level,
            1,
        )));
        steps.push(ImageStep::Blit(blit));
        steps.push(ImageStep::Barrier(Transition::between(
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            level,
            1,
        )));
    }
    steps.push(ImageStep::Barrier(Transition::between(
        image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        0,
        levels,
    )));
    steps
}

/// Blits are image-to-self; dispatches assume a bound compute pipeline.
pub fn record_steps(d: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image, steps: &[ImageStep]) {
    for step in steps {
        match step {
            ImageStep::Barrier(t) => transition(d, cmd, t),
            ImageStep::Blit(blit) => unsafe {
                d.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(blit),
                    vk::Filter::LINEAR,
                );
            },
            ImageStep::Dispatch([x, y, z]) => unsafe { d.cmd_dispatch(cmd, *x, *y, *z) },
        }
    }
}

pub fn record_mip_chain(d: &ash::Device, cmd: vk::CommandBuffer, image: &Image) {
    let steps = mip_chain_steps(
        image.raw,
        image.width,
        image.height,
        image.mip_levels,
        image.layers,
    );
    record_steps(d, cmd, image.raw, &steps);
}

/// Replays `steps` over per-level layouts, starting from `levels`. Returns the
/// first barrier whose `old_layout` disagrees with the tracked state.
pub fn replay_layouts(
    levels: &mut [vk::ImageLayout],
    steps: &[ImageStep],
) -> Result<(), Transition> {
    for step in steps {
        if let ImageStep::Barrier(t) = step {
            let end = if t.levels == vk::REMAINING_MIP_LEVELS {
                levels.len()
            } else {
                (t.base_level + t.levels) as usize
            };
            for layout in &mut levels[t.base_level as usize..end] {
                if t.old_layout != vk::ImageLayout::UNDEFINED && *layout != t.old_layout {
                    return Err(*t);
                }
                *layout = t.new_layout;
            }
        }
    }
    Ok(())
}
