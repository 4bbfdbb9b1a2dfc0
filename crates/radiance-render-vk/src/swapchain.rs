//! Presentable images plus everything sized to them.

use std::sync::Arc;

use ash::vk;
use radiance_render::RenderSize;
use tracing::info;

use crate::device::{Device, DeviceContext};
use crate::error::{RenderError, RenderResult, VkContext};
use crate::ledger::HandleKind;
use crate::pipelines::RenderPass;
use crate::resources::{wrap_view, Image, ImageDesc, ImageView};

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
];

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "A2B10G10R10_UNORM",
        _ => "OTHER",
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// 8-bit sRGB with the non-linear colour space if offered, else the first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            matches!(
                f.format,
                vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB
            ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `min(max_image_count or unbounded, min_image_count + 1)`.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

/// First candidate whose optimal tiling supports depth attachments.
pub fn pick_depth_format(
    features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> RenderResult<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .ok_or(RenderError::UnsupportedFormat(DEPTH_CANDIDATES[0]))
}

pub struct Swapchain {
    device: Arc<Device>,
    pub raw: vk::SwapchainKHR,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<ImageView>,
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Views first; they reference the swapchain's images.
        self.views.clear();
        unsafe { self.device.swapchain_loader.destroy_swapchain(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::Swapchain);
    }
}

impl Swapchain {
    /// Builds a swapchain for `want`, handing `old` to the driver so it can
    /// recycle images. `old` must still be dropped by the caller.
    pub fn create(
        device: &Arc<Device>,
        want: RenderSize,
        old: Option<&Swapchain>,
    ) -> RenderResult<Self> {
        let inst = &device.instance;
        let (caps, formats, modes) = unsafe {
            let sl = &inst.surface_loader;
            (
                sl.get_physical_device_surface_capabilities(device.phys, inst.surface)
                    .ctx("get_physical_device_surface_capabilities")?,
                sl.get_physical_device_surface_formats(device.phys, inst.surface)
                    .ctx("get_physical_device_surface_formats")?,
                sl.get_physical_device_surface_present_modes(device.phys, inst.surface)
                    .ctx("get_physical_device_surface_present_modes")?,
            )
        };

        let surf_format = choose_surface_format(&formats)
            .ok_or_else(|| RenderError::Init("surface reports no formats".into()))?;
        let present_mode = choose_present_mode(&modes);
        let extent = extent_from_caps(&caps, want);
        let min_count = choose_image_count(&caps);

        let families = device.families.unique();
        let (sharing, family_count, family_ptr) = if families.len() > 1 {
            (
                vk::SharingMode::CONCURRENT,
                families.len() as u32,
                families.as_ptr(),
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        };

        let ci = vk::SwapchainCreateInfoKHR {
            surface: inst.surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: family_count,
            p_queue_family_indices: family_ptr,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old.map_or(vk::SwapchainKHR::null(), |s| s.raw),
            ..Default::default()
        };

        let raw = unsafe {
            device
                .swapchain_loader
                .create_swapchain(&ci, None)
                .ctx("create_swapchain")?
        };
        device.ledger.created(HandleKind::Swapchain);
        let mut sc = Swapchain {
            device: Arc::clone(device),
            raw,
            format: surf_format.format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
        };

        sc.images = unsafe {
            device
                .swapchain_loader
                .get_swapchain_images(raw)
                .ctx("get_swapchain_images")?
        };
        for &img in &sc.images {
            let view = wrap_view(
                device,
                img,
                sc.format,
                vk::ImageViewType::TYPE_2D,
                vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
            )?;
            sc.views.push(view);
        }

        info!(
            "swapchain {}x{} {} {} images={}",
            extent.width,
            extent.height,
            fmt_name(sc.format),
            pm_name(present_mode),
            sc.images.len()
        );
        Ok(sc)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// `Ok(None)` when the swapchain no longer matches the surface.
    pub fn acquire(&self, signal: vk::Semaphore) -> RenderResult<Option<(u32, bool)>> {
        match unsafe {
            self.device
                .swapchain_loader
                .acquire_next_image(self.raw, u64::MAX, signal, vk::Fence::null())
        } {
            Ok(pair) => Ok(Some(pair)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(RenderError::vk("acquire_next_image", e)),
        }
    }

    /// `Ok(None)` when out of date, otherwise whether present was suboptimal.
    pub fn present(&self, image: u32, wait: vk::Semaphore) -> RenderResult<Option<bool>> {
        let pi = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.raw,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.queues.present, &pi)
        } {
            Ok(suboptimal) => Ok(Some(suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(RenderError::vk("queue_present", e)),
        }
    }
}

/// One depth attachment shared by every framebuffer.
pub struct DepthBuffer {
    pub view: ImageView,
    pub image: Image,
}

impl DepthBuffer {
    pub fn create(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RenderResult<Self> {
        let factory = ctx.factory();
        let image = factory.create_image(&ImageDesc {
            width: extent.width,
            height: extent.height,
            layers: 1,
            levels: 1,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            cube: false,
        })?;
        let view = factory.create_view(&image, vk::ImageAspectFlags::DEPTH, 0, 1, 0, 1)?;
        Ok(DepthBuffer { view, image })
    }

    pub fn format(&self) -> vk::Format {
        self.image.format
    }
}

pub struct Framebuffers {
    device: Arc<Device>,
    pub raw: Vec<vk::Framebuffer>,
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for &fb in &self.raw {
            unsafe { self.device.raw.destroy_framebuffer(fb, None) };
        }
        self.device
            .ledger
            .destroyed_n(HandleKind::Framebuffer, self.raw.len());
    }
}

impl Framebuffers {
    pub fn create(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        swapchain: &Swapchain,
        depth: &DepthBuffer,
    ) -> RenderResult<Self> {
        let mut out = Framebuffers {
            device: Arc::clone(device),
            raw: Vec::with_capacity(swapchain.views.len()),
        };
        for view in &swapchain.views {
            let attachments = [view.raw, depth.view.raw];
            let ci = vk::FramebufferCreateInfo {
                render_pass: render_pass.raw,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: swapchain.extent.width,
                height: swapchain.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe {
                device
                    .raw
                    .create_framebuffer(&ci, None)
                    .ctx("create_framebuffer")?
            };
            device.ledger.created(HandleKind::Framebuffer);
            out.raw.push(fb);
        }
        Ok(out)
    }
}

/// Everything rebuilt on resize. Field order is drop order.
pub struct RenderTargets {
    pub framebuffers: Framebuffers,
    pub depth: DepthBuffer,
    pub swapchain: Swapchain,
}

impl RenderTargets {
    /// Depth and framebuffers for an already created swapchain.
    pub fn from_swapchain(
        ctx: &DeviceContext,
        render_pass: &RenderPass,
        swapchain: Swapchain,
    ) -> RenderResult<Self> {
        let depth = DepthBuffer::create(ctx, swapchain.extent, render_pass.depth_format)?;
        let framebuffers = Framebuffers::create(&ctx.device, render_pass, &swapchain, &depth)?;
        Ok(RenderTargets {
            framebuffers,
            depth,
            swapchain,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_srgb_surface_format() {
        let formats = [
            sf(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            sf(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            sf(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            sf(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::A2B10G10R10_UNORM_PACK32)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_over_fifo() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX]), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::IMMEDIATE, P::FIFO]), P::FIFO);
        assert_eq!(choose_present_mode(&[]), P::FIFO);
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_respects_max() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn extent_clamps_to_caps() {
        let c = caps(2, 0);
        let e = extent_from_caps(
            &c,
            RenderSize {
                width: 8000,
                height: 4,
            },
        );
        assert_eq!((e.width, e.height), (4096, 16));

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1200,
                height: 720,
            },
            ..c
        };
        let e = extent_from_caps(
            &fixed,
            RenderSize {
                width: 1,
                height: 1,
            },
        );
        assert_eq!((e.width, e.height), (1200, 720));
    }

    #[test]
    fn depth_format_follows_candidate_order() {
        let only_d24 = |f: vk::Format| {
            if f == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            }
        };
        assert_eq!(pick_depth_format(only_d24).ok(), Some(vk::Format::D24_UNORM_S8_UINT));

        let all = |_: vk::Format| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(pick_depth_format(all).ok(), Some(vk::Format::D32_SFLOAT));

        let none = |_: vk::Format| vk::FormatFeatureFlags::empty();
        assert!(matches!(
            pick_depth_format(none),
            Err(RenderError::UnsupportedFormat(_))
        ));
    }
}
