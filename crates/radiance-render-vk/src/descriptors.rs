//! Descriptor pool and the scene/skybox set layouts.

use std::sync::Arc;

use ash::vk;
use radiance_render::{MaterialDesc, ModelStats};
use tracing::debug;

use crate::device::Device;
use crate::error::{RenderResult, VkContext};
use crate::ledger::HandleKind;

/// Capacities of the single descriptor pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSizing {
    pub max_sets: u32,
    pub samplers: u32,
    pub uniforms: u32,
}

impl PoolSizing {
    /// Sized from model statistics and the swapchain image count.
    pub fn from_stats(stats: ModelStats, swap_images: u32) -> Self {
        let m = stats.materials as u32;
        let k = stats.meshes as u32;
        let s = swap_images;
        PoolSizing {
            max_sets: (2 + k + m) * s,
            samplers: 5 * m * s + 2,
            uniforms: (4 + k) * s,
        }
    }

    /// What per-slot material sets plus per-slot skybox sets actually consume.
    pub fn required(materials: u32, frame_slots: u32) -> Self {
        let per_material = MaterialDesc::SLOTS as u32;
        PoolSizing {
            max_sets: (materials + 1) * frame_slots,
            samplers: (per_material * materials + 1) * frame_slots,
            uniforms: (materials + 1) * frame_slots,
        }
    }

    pub fn max(self, other: Self) -> Self {
        PoolSizing {
            max_sets: self.max_sets.max(other.max_sets),
            samplers: self.samplers.max(other.samplers),
            uniforms: self.uniforms.max(other.uniforms),
        }
    }

    pub fn pool_sizes(&self) -> [vk::DescriptorPoolSize; 2] {
        [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: self.uniforms.max(1),
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: self.samplers.max(1),
            },
        ]
    }
}

fn binding(
    index: u32,
    ty: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding {
        binding: index,
        descriptor_type: ty,
        descriptor_count: 1,
        stage_flags: stages,
        ..Default::default()
    }
}

/// Binding 0 UBO (vertex), 1..=5 material samplers (fragment).
pub fn scene_bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    std::iter::once(binding(
        0,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::ShaderStageFlags::VERTEX,
    ))
    .chain((1..=MaterialDesc::SLOTS as u32).map(|i| {
        binding(
            i,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )
    }))
    .collect()
}

/// Binding 0 UBO (vertex), 1 environment cube (fragment).
pub fn skybox_bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    vec![
        binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        ),
        binding(
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ]
}

pub struct SetLayout {
    device: Arc<Device>,
    pub raw: vk::DescriptorSetLayout,
}

impl SetLayout {
    pub fn create(
        device: &Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RenderResult<Self> {
        let ci = vk::DescriptorSetLayoutCreateInfo {
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe {
            device
                .raw
                .create_descriptor_set_layout(&ci, None)
                .ctx("create_descriptor_set_layout")?
        };
        device.ledger.created(HandleKind::DescriptorSetLayout);
        Ok(SetLayout {
            device: Arc::clone(device),
            raw,
        })
    }
}

impl Drop for SetLayout {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_descriptor_set_layout(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::DescriptorSetLayout);
    }
}

/// Sets are never freed individually; destroying the pool releases them.
pub struct DescriptorPool {
    device: Arc<Device>,
    pub raw: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn create(
        device: &Arc<Device>,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<Self> {
        let ci = vk::DescriptorPoolCreateInfo {
            max_sets: max_sets.max(1),
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe {
            device
                .raw
                .create_descriptor_pool(&ci, None)
                .ctx("create_descriptor_pool")?
        };
        device.ledger.created(HandleKind::DescriptorPool);
        Ok(DescriptorPool {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let layouts = vec![layout; count];
        let ai = vk::DescriptorSetAllocateInfo {
            descriptor_pool: self.raw,
            descriptor_set_count: count as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .raw
                .allocate_descriptor_sets(&ai)
                .ctx("allocate_descriptor_sets")
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_descriptor_pool(self.raw, None) };
        self.device.ledger.destroyed(HandleKind::DescriptorPool);
    }
}

fn write_buffer(
    set: vk::DescriptorSet,
    binding: u32,
    info: &vk::DescriptorBufferInfo,
) -> vk::WriteDescriptorSet<'_> {
    vk::WriteDescriptorSet {
        dst_set: set,
        dst_binding: binding,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        p_buffer_info: info,
        ..Default::default()
    }
}

fn write_image(
    set: vk::DescriptorSet,
    binding: u32,
    info: &vk::DescriptorImageInfo,
) -> vk::WriteDescriptorSet<'_> {
    vk::WriteDescriptorSet {
        dst_set: set,
        dst_binding: binding,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        p_image_info: info,
        ..Default::default()
    }
}

/// Pool sized once at creation plus the two graphics layouts. Append-only
/// until the renderer is destroyed.
pub struct DescriptorAllocator {
    device: Arc<Device>,
    pub pool: DescriptorPool,
    pub scene_layout: SetLayout,
    pub skybox_layout: SetLayout,
    pub sizing: PoolSizing,
}

impl DescriptorAllocator {
    pub fn create(device: &Arc<Device>, sizing: PoolSizing) -> RenderResult<Self> {
        let scene_layout = SetLayout::create(device, &scene_bindings())?;
        let skybox_layout = SetLayout::create(device, &skybox_bindings())?;
        let pool = DescriptorPool::create(device, sizing.max_sets, &sizing.pool_sizes())?;
        debug!(
            "descriptor pool: sets={} samplers={} uniforms={}",
            sizing.max_sets, sizing.samplers, sizing.uniforms
        );
        Ok(DescriptorAllocator {
            device: Arc::clone(device),
            pool,
            scene_layout,
            skybox_layout,
            sizing,
        })
    }

    pub fn allocate_scene(&self, count: usize) -> RenderResult<Vec<vk::DescriptorSet>> {
        self.pool.allocate(self.scene_layout.raw, count)
    }

    pub fn allocate_skybox(&self, count: usize) -> RenderResult<Vec<vk::DescriptorSet>> {
        self.pool.allocate(self.skybox_layout.raw, count)
    }

    /// UBO at 0 and the five material images at 1..=5, in slot order.
    pub fn write_scene_set(
        &self,
        set: vk::DescriptorSet,
        ubo: &vk::DescriptorBufferInfo,
        images: &[vk::DescriptorImageInfo; MaterialDesc::SLOTS],
    ) {
        let mut writes = Vec::with_capacity(1 + images.len());
        writes.push(write_buffer(set, 0, ubo));
        for (i, info) in images.iter().enumerate() {
            writes.push(write_image(set, i as u32 + 1, info));
        }
        unsafe { self.device.raw.update_descriptor_sets(&writes, &[]) };
    }

    pub fn write_skybox_set(
        &self,
        set: vk::DescriptorSet,
        ubo: &vk::DescriptorBufferInfo,
        environment: &vk::DescriptorImageInfo,
    ) {
        let writes = [write_buffer(set, 0, ubo), write_image(set, 1, environment)];
        unsafe { self.device.raw.update_descriptor_sets(&writes, &[]) };
    }
}
