//! A `SceneModel` resident on the GPU.

use ash::vk;
use radiance_render::{draw_nodes, DrawRecorder, MaterialDesc, SceneModel, TextureId};
use tracing::debug;

use crate::descriptors::DescriptorAllocator;
use crate::device::DeviceContext;
use crate::error::RenderResult;
use crate::resources::Buffer;
use crate::texture::{ColorSpace, Texture};

/// Arena slot for a material texture reference. Slot 0 is the 1x1 default.
pub fn texture_slot(id: Option<TextureId>, arena_len: usize) -> usize {
    match id {
        Some(i) if i + 1 < arena_len => i + 1,
        _ => 0,
    }
}

/// The model's materials, or a single all-default one when it has none.
pub fn material_descs(model: &SceneModel) -> Vec<MaterialDesc> {
    if model.materials.is_empty() {
        vec![MaterialDesc::default()]
    } else {
        model.materials.clone()
    }
}

/// Regroups per-material set lists into one list per frame slot.
fn slot_major(materials: &[GpuMaterial], slots: usize) -> Vec<Vec<vk::DescriptorSet>> {
    (0..slots)
        .map(|slot| {
            materials
                .iter()
                .filter_map(|m| m.descriptor_sets.get(slot).copied())
                .collect()
        })
        .collect()
}

/// Colour space per model texture: sRGB when any material samples it as
/// base colour or emissive.
pub fn texture_spaces(model: &SceneModel) -> Vec<ColorSpace> {
    let mut spaces = vec![ColorSpace::Linear; model.textures.len()];
    for m in &model.materials {
        for (id, srgb) in m.slots().into_iter().zip(MaterialDesc::SRGB_SLOTS) {
            if let Some(space) = id.filter(|_| srgb).and_then(|i| spaces.get_mut(i)) {
                *space = ColorSpace::Srgb;
            }
        }
    }
    spaces
}

pub struct GpuMaterial {
    pub desc: MaterialDesc,
    /// One set per frame slot.
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

pub struct GpuModel {
    pub cpu: SceneModel,
    pub materials: Vec<GpuMaterial>,
    /// `slot_sets[slot][material]`, filled by `allocate_material_sets`.
    slot_sets: Vec<Vec<vk::DescriptorSet>>,
    pub textures: Vec<Texture>,
    pub indices: Buffer,
    pub vertices: Buffer,
}

impl GpuModel {
    pub fn upload(ctx: &DeviceContext, cpu: SceneModel) -> RenderResult<Self> {
        let factory = ctx.factory();
        let vertices = factory.buffer_with_data(
            bytemuck::cast_slice(&cpu.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = factory.buffer_with_data(
            bytemuck::cast_slice(&cpu.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let mut textures = Vec::with_capacity(cpu.textures.len() + 1);
        textures.push(Texture::solid(ctx, [255; 4])?);
        for (src, space) in cpu.textures.iter().zip(texture_spaces(&cpu)) {
            textures.push(Texture::from_image_data(
                ctx,
                &src.image,
                &src.sampler,
                space,
                true,
            )?);
        }

        let materials = material_descs(&cpu)
            .into_iter()
            .map(|desc| GpuMaterial {
                desc,
                descriptor_sets: Vec::new(),
            })
            .collect();

        debug!(
            "model uploaded: {} vertices, {} indices, {} textures",
            cpu.vertices.len(),
            cpu.indices.len(),
            cpu.textures.len()
        );
        Ok(GpuModel {
            cpu,
            materials,
            slot_sets: Vec::new(),
            textures,
            indices,
            vertices,
        })
    }

    pub fn texture(&self, id: Option<TextureId>) -> &Texture {
        &self.textures[texture_slot(id, self.textures.len())]
    }

    /// Allocates and writes one scene set per material per frame slot. Slot
    /// `i` binds `ubos[i]`.
    pub fn allocate_material_sets(
        &mut self,
        alloc: &DescriptorAllocator,
        ubos: &[vk::DescriptorBufferInfo],
    ) -> RenderResult<()> {
        for i in 0..self.materials.len() {
            let sets = alloc.allocate_scene(ubos.len())?;
            let images = self.materials[i]
                .desc
                .slots()
                .map(|id| *self.texture(id).descriptor());
            for (&set, ubo) in sets.iter().zip(ubos) {
                alloc.write_scene_set(set, ubo, &images);
            }
            self.materials[i].descriptor_sets = sets;
        }
        self.slot_sets = slot_major(&self.materials, ubos.len());
        Ok(())
    }

    /// The material sets for one frame slot, indexed like `materials`.
    /// Empty before `allocate_material_sets`.
    pub fn material_sets(&self, slot: usize) -> &[vk::DescriptorSet] {
        self.slot_sets.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn bind_buffers(&self, d: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.raw], &[0]);
            d.cmd_bind_index_buffer(cmd, self.indices.raw, 0, vk::IndexType::UINT32);
        }
    }

    /// Binds the buffers and walks the node tree. `sets` may be empty when
    /// the caller has already bound a set for the whole model.
    pub fn draw(
        &self,
        d: &ash::Device,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        self.bind_buffers(d, cmd);
        let mut rec = CmdRecorder::new(d, cmd, layout, sets);
        draw_nodes(&self.cpu, &mut rec);
    }
}

/// Turns the traversal into `cmd_bind_descriptor_sets` / `cmd_draw_indexed`.
pub struct CmdRecorder<'a> {
    d: &'a ash::Device,
    cmd: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    sets: &'a [vk::DescriptorSet],
    bound: Option<usize>,
}

impl<'a> CmdRecorder<'a> {
    pub fn new(
        d: &'a ash::Device,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &'a [vk::DescriptorSet],
    ) -> Self {
        CmdRecorder {
            d,
            cmd,
            layout,
            sets,
            bound: None,
        }
    }
}

impl DrawRecorder for CmdRecorder<'_> {
    fn bind_material(&mut self, material: usize) {
        if self.bound == Some(material) {
            return;
        }
        if let Some(&set) = self.sets.get(material) {
            unsafe {
                self.d.cmd_bind_descriptor_sets(
                    self.cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.layout,
                    0,
                    &[set],
                    &[],
                );
            }
            self.bound = Some(material);
        }
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
        unsafe {
            self.d
                .cmd_draw_indexed(self.cmd, index_count, 1, first_index, 0, 0)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiance_render::scene::TextureSource;
    use radiance_render::{ImageData, SamplerDesc};
    use rstest::rstest;

    #[rstest]
    #[case(None, 4, 0)]
    #[case(Some(0), 4, 1)]
    #[case(Some(2), 4, 3)]
    #[case(Some(3), 4, 0)]
    #[case(Some(0), 1, 0)]
    fn texture_refs_shift_past_default(
        #[case] id: Option<TextureId>,
        #[case] arena: usize,
        #[case] want: usize,
    ) {
        assert_eq!(texture_slot(id, arena), want);
    }

    #[test]
    fn material_less_model_gets_default_material() {
        let cube = SceneModel::unit_cube();
        let descs = material_descs(&cube);
        assert_eq!(descs, vec![MaterialDesc::default()]);
        assert!(descs[0].slots().iter().all(Option::is_none));
    }

    #[test]
    fn colour_slots_upload_as_srgb() {
        let mut model = SceneModel::unit_cube();
        model.textures = vec![
            TextureSource {
                image: ImageData::solid_rgba8([255; 4]),
                sampler: SamplerDesc::default(),
            };
            5
        ];
        model.materials = vec![
            MaterialDesc {
                base_color: Some(0),
                metallic_roughness: Some(1),
                normal: Some(2),
                ..Default::default()
            },
            MaterialDesc {
                occlusion: Some(3),
                emissive: Some(4),
                // Out of range references are ignored.
                base_color: Some(9),
                ..Default::default()
            },
        ];
        use ColorSpace::{Linear, Srgb};
        assert_eq!(texture_spaces(&model), vec![Srgb, Linear, Linear, Linear, Srgb]);
    }

    #[test]
    fn sets_regroup_by_frame_slot() {
        use ash::vk::Handle;
        let set = |raw: u64| vk::DescriptorSet::from_raw(raw);
        let materials = vec![
            GpuMaterial {
                desc: MaterialDesc::default(),
                descriptor_sets: vec![set(1), set(2)],
            },
            GpuMaterial {
                desc: MaterialDesc::default(),
                descriptor_sets: vec![set(3), set(4)],
            },
        ];
        let by_slot = slot_major(&materials, 2);
        assert_eq!(by_slot, vec![vec![set(1), set(3)], vec![set(2), set(4)]]);
        assert!(slot_major(&materials, 0).is_empty());
    }

    #[test]
    fn model_materials_are_kept_in_order() {
        let mut model = SceneModel::unit_cube();
        model.materials = vec![
            MaterialDesc {
                base_color: Some(1),
                ..Default::default()
            },
            MaterialDesc {
                normal: Some(0),
                ..Default::default()
            },
        ];
        let descs = material_descs(&model);
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[1].normal, Some(0));
    }
}
