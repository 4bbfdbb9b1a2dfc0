//! Buffers, images, views and the staging/barrier helpers built on them.

use std::ffi::c_void;
use std::sync::Arc;

use ash::vk;

use crate::device::{Device, DeviceContext};
use crate::error::{RenderError, RenderResult, VkContext};
use crate::ledger::HandleKind;

pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Smallest buffer we create; Vulkan rejects zero-sized buffers.
pub const MIN_BUFFER_SIZE: vk::DeviceSize = 16;

/// Allocation size for `len` bytes of content.
pub fn buffer_size(len: usize) -> vk::DeviceSize {
    (len as vk::DeviceSize).max(MIN_BUFFER_SIZE)
}

pub struct Buffer {
    device: Arc<Device>,
    pub raw: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    mapped: *mut c_void,
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let d = &self.device.raw;
        unsafe {
            if !self.mapped.is_null() {
                d.unmap_memory(self.memory);
            }
            d.destroy_buffer(self.raw, None);
            d.free_memory(self.memory, None);
        }
        self.device.ledger.destroyed(HandleKind::Buffer);
        self.device.ledger.destroyed(HandleKind::Memory);
    }
}

impl Buffer {
    /// Maps the whole buffer for the rest of its life. Host-visible only.
    pub fn map_persistent(&mut self) -> RenderResult<()> {
        if self.mapped.is_null() {
            self.mapped = unsafe {
                self.device
                    .raw
                    .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                    .ctx("map_memory")?
            };
        }
        Ok(())
    }

    /// Copies `bytes` to the start of the mapping.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> RenderResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(RenderError::Invalid("write past end of buffer"));
        }
        self.map_persistent()?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped as *mut u8, bytes.len());
        }
        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.raw,
            offset: 0,
            range: self.size,
        }
    }
}

pub struct Image {
    device: Arc<Device>,
    pub raw: vk::Image,
    memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub layers: u32,
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_image(self.raw, None);
            self.device.raw.free_memory(self.memory, None);
        }
        self.device.ledger.destroyed(HandleKind::Image);
        self.device.ledger.destroyed(HandleKind::Memory);
    }
}

pub struct ImageView {
    device: Arc<Device>,
    pub raw: vk::ImageView,
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_image_view(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::ImageView);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub levels: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
    pub cube: bool,
}

impl ImageDesc {
    pub fn sampled_2d(width: u32, height: u32, levels: u32, format: vk::Format) -> Self {
        ImageDesc {
            width,
            height,
            layers: 1,
            levels,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::SAMPLED,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            cube: false,
        }
    }
}

/// 1 layer -> 2D, 6 -> cube, anything else -> 2D array.
pub fn view_type_for_layers(layers: u32) -> vk::ImageViewType {
    match layers {
        1 => vk::ImageViewType::TYPE_2D,
        6 => vk::ImageViewType::CUBE,
        _ => vk::ImageViewType::TYPE_2D_ARRAY,
    }
}

/// Access mask and stage that produce or consume an image in `layout`.
pub fn access_and_stage(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::GENERAL => {
            (vk::AccessFlags::SHADER_WRITE, vk::PipelineStageFlags::COMPUTE_SHADER)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// One image memory barrier.
#[derive(Clone, Copy, Debug)]
pub struct Transition {
    pub image: vk::Image,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub base_level: u32,
    pub levels: u32,
    pub layers: u32,
}

impl Transition {
    /// Colour barrier with masks derived from the two layouts.
    pub fn between(
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        base_level: u32,
        levels: u32,
    ) -> Self {
        let (src_access, src_stage) = access_and_stage(old_layout);
        let (dst_access, dst_stage) = access_and_stage(new_layout);
        Transition {
            image,
            src_stage,
            dst_stage,
            src_access,
            dst_access,
            old_layout,
            new_layout,
            aspect: vk::ImageAspectFlags::COLOR,
            base_level,
            levels,
            layers: vk::REMAINING_ARRAY_LAYERS,
        }
    }

    pub fn barrier(&self) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier {
            src_access_mask: self.src_access,
            dst_access_mask: self.dst_access,
            old_layout: self.old_layout,
            new_layout: self.new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: self.image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: self.base_level,
                level_count: self.levels,
                base_array_layer: 0,
                layer_count: self.layers,
            },
            ..Default::default()
        }
    }
}

/// Records `t` into `cmd`. The caller owns the tracked layout.
pub fn transition(device: &ash::Device, cmd: vk::CommandBuffer, t: &Transition) {
    let barrier = t.barrier();
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            t.src_stage,
            t.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }
}

/// Creation side of the device context.
pub struct ResourceFactory<'a> {
    ctx: &'a DeviceContext,
}

impl DeviceContext {
    pub fn factory(&self) -> ResourceFactory<'_> {
        ResourceFactory { ctx: self }
    }
}

impl<'a> ResourceFactory<'a> {
    fn device(&self) -> &'a Arc<Device> {
        &self.ctx.device
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> RenderResult<Buffer> {
        if size == 0 {
            return Err(RenderError::Invalid("zero-sized buffer"));
        }
        let device = self.device();
        let d = &device.raw;
        let bci = vk::BufferCreateInfo {
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buf = d.create_buffer(&bci, None).ctx("create_buffer")?;
            let req = d.get_buffer_memory_requirements(buf);
            let memory = match device
                .find_memory_type(req.memory_type_bits, props)
                .and_then(|idx| allocate(d, req.size, idx))
            {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_buffer(buf, None);
                    return Err(e);
                }
            };
            device.ledger.created(HandleKind::Buffer);
            device.ledger.created(HandleKind::Memory);
            let buffer = Buffer {
                device: Arc::clone(device),
                raw: buf,
                memory,
                size,
                mapped: std::ptr::null_mut(),
            };
            d.bind_buffer_memory(buf, memory, 0)
                .ctx("bind_buffer_memory")?;
            Ok(buffer)
        }
    }

    /// Host-visible, coherent, mapped for its whole life.
    pub fn create_mapped_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<Buffer> {
        let mut buf = self.create_buffer(size, usage, HOST_COHERENT)?;
        buf.map_persistent()?;
        Ok(buf)
    }

    pub fn create_image(&self, desc: &ImageDesc) -> RenderResult<Image> {
        if desc.cube && desc.layers != 6 {
            return Err(RenderError::Invalid("cube images need exactly 6 layers"));
        }
        let device = self.device();
        let d = &device.raw;
        let ci = vk::ImageCreateInfo {
            flags: if desc.cube {
                vk::ImageCreateFlags::CUBE_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            },
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: desc.levels,
            array_layers: desc.layers,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: desc.tiling,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let image = d.create_image(&ci, None).ctx("create_image")?;
            let req = d.get_image_memory_requirements(image);
            let memory = match device
                .find_memory_type(req.memory_type_bits, desc.memory)
                .and_then(|idx| allocate(d, req.size, idx))
            {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_image(image, None);
                    return Err(e);
                }
            };
            device.ledger.created(HandleKind::Image);
            device.ledger.created(HandleKind::Memory);
            let out = Image {
                device: Arc::clone(device),
                raw: image,
                memory,
                format: desc.format,
                width: desc.width,
                height: desc.height,
                mip_levels: desc.levels,
                layers: desc.layers,
            };
            d.bind_image_memory(image, memory, 0)
                .ctx("bind_image_memory")?;
            Ok(out)
        }
    }

    pub fn create_view(
        &self,
        image: &Image,
        aspect: vk::ImageAspectFlags,
        base_level: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> RenderResult<ImageView> {
        self.create_view_typed(
            image,
            view_type_for_layers(layer_count),
            aspect,
            base_level,
            level_count,
            base_layer,
            layer_count,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_view_typed(
        &self,
        image: &Image,
        view_type: vk::ImageViewType,
        aspect: vk::ImageAspectFlags,
        base_level: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> RenderResult<ImageView> {
        wrap_view(
            self.device(),
            image.raw,
            image.format,
            view_type,
            vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: base_level,
                level_count,
                base_array_layer: base_layer,
                layer_count,
            },
        )
    }

    /// Fills a device-local buffer through a temporary staging buffer.
    pub fn upload(&self, dst: &Buffer, bytes: &[u8]) -> RenderResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let staging = self.staging(bytes)?;
        let size = bytes.len() as vk::DeviceSize;
        self.ctx.one_shot(|d, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { d.cmd_copy_buffer(cmd, staging.raw, dst.raw, std::slice::from_ref(&region)) };
            Ok(())
        })
    }

    /// Device-local buffer initialised with `bytes`.
    pub fn buffer_with_data(&self, bytes: &[u8], usage: vk::BufferUsageFlags) -> RenderResult<Buffer> {
        // An empty model still gets a handle.
        let buf = self.create_buffer(
            buffer_size(bytes.len()),
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.upload(&buf, bytes)?;
        Ok(buf)
    }

    pub fn staging(&self, bytes: &[u8]) -> RenderResult<Buffer> {
        let mut staging = self.create_buffer(
            buffer_size(bytes.len()),
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_COHERENT,
        )?;
        staging.write_bytes(bytes)?;
        Ok(staging)
    }
}

pub(crate) fn wrap_view(
    device: &Arc<Device>,
    image: vk::Image,
    format: vk::Format,
    view_type: vk::ImageViewType,
    range: vk::ImageSubresourceRange,
) -> RenderResult<ImageView> {
    let ci = vk::ImageViewCreateInfo {
        image,
        view_type,
        format,
        subresource_range: range,
        ..Default::default()
    };
    let raw = unsafe {
        device
            .raw
            .create_image_view(&ci, None)
            .ctx("create_image_view")?
    };
    device.ledger.created(HandleKind::ImageView);
    Ok(ImageView {
        device: Arc::clone(device),
        raw,
    })
}

unsafe fn allocate(d: &ash::Device, size: vk::DeviceSize, type_index: u32) -> RenderResult<vk::DeviceMemory> {
    let mai = vk::MemoryAllocateInfo {
        allocation_size: size,
        memory_type_index: type_index,
        ..Default::default()
    };
    d.allocate_memory(&mai, None).ctx("allocate_memory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, MIN_BUFFER_SIZE)]
    #[case(1, MIN_BUFFER_SIZE)]
    #[case(16, 16)]
    #[case(192, 192)]
    fn buffers_are_never_zero_sized(#[case] len: usize, #[case] want: vk::DeviceSize) {
        assert_eq!(buffer_size(len), want);
    }

    #[rstest]
    #[case(1, vk::ImageViewType::TYPE_2D)]
    #[case(6, vk::ImageViewType::CUBE)]
    #[case(2, vk::ImageViewType::TYPE_2D_ARRAY)]
    #[case(12, vk::ImageViewType::TYPE_2D_ARRAY)]
    fn view_type_follows_layer_count(#[case] layers: u32, #[case] want: vk::ImageViewType) {
        assert_eq!(view_type_for_layers(layers), want);
    }

    #[test]
    fn compute_write_barrier_matches_dispatch_setup() {
        let t = Transition::between(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            0,
            1,
        );
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(t.dst_access, vk::AccessFlags::SHADER_WRITE);
    }

    #[test]
    fn upload_then_sample_barrier() {
        let t = Transition::between(
            vk::Image::null(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            0,
            vk::REMAINING_MIP_LEVELS,
        );
        let b = t.barrier();
        assert_eq!(b.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(b.dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(b.subresource_range.layer_count, vk::REMAINING_ARRAY_LAYERS);
        assert_eq!(b.subresource_range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(b.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn host_coherent_has_both_bits() {
        assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
    }
}
