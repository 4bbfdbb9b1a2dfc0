// SPDX-License-Identifier: CEPL-1.0
//! CPU-side scene description consumed by the GPU backends.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Interleaved vertex, one binding, five attributes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    pub const OFFSET_POS: u32 = 0;
    pub const OFFSET_NORMAL: u32 = 12;
    pub const OFFSET_UV0: u32 = 24;
    pub const OFFSET_UV1: u32 = 32;
    pub const OFFSET_COLOR: u32 = 40;
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub fn at(pos: [f32; 3]) -> Self {
        Self {
            pos,
            color: [1.0; 4],
            ..Default::default()
        }
    }
}

/// Per-frame uniform shared by the scene and skybox pipelines.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneUbo {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl SceneUbo {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            model: Mat4::IDENTITY,
            view,
            proj,
        }
    }
}

pub type NodeId = usize;
pub type MeshId = usize;
pub type TextureId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Primitive {
    pub first_index: u32,
    pub index_count: u32,
    /// `-1` selects the default material.
    pub material_index: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub local: Mat4,
    pub mesh: Option<MeshId>,
    pub children: Vec<NodeId>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            local: Mat4::IDENTITY,
            mesh: None,
            children: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerDesc {
    pub mag: Filter,
    pub min: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pixels {
    Rgba8(Vec<u8>),
    Rgba32F(Vec<f32>),
}

/// Decoded, tightly packed RGBA pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Pixels,
}

impl ImageData {
    pub fn solid_rgba8(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: Pixels::Rgba8(rgba.to_vec()),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.pixels {
            Pixels::Rgba8(p) => p,
            Pixels::Rgba32F(p) => bytemuck::cast_slice(p),
        }
    }

    pub fn is_hdr(&self) -> bool {
        matches!(self.pixels, Pixels::Rgba32F(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureSource {
    pub image: ImageData,
    pub sampler: SamplerDesc,
}

/// The five PBR slots. `None` resolves to the backend's 1x1 default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterialDesc {
    pub base_color: Option<TextureId>,
    pub metallic_roughness: Option<TextureId>,
    pub normal: Option<TextureId>,
    pub occlusion: Option<TextureId>,
    pub emissive: Option<TextureId>,
}

impl MaterialDesc {
    pub const SLOTS: usize = 5;
    /// Slots holding sRGB-encoded colour (base colour, emissive); the rest
    /// are linear data.
    pub const SRGB_SLOTS: [bool; Self::SLOTS] = [true, false, false, false, true];

    /// Slot order matches scene layout bindings 1..=5.
    pub fn slots(&self) -> [Option<TextureId>; Self::SLOTS] {
        [
            self.base_color,
            self.metallic_roughness,
            self.normal,
            self.occlusion,
            self.emissive,
        ]
    }
}

/// Counts the descriptor pool is sized from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelStats {
    pub materials: usize,
    /// Linear nodes that carry a mesh.
    pub meshes: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneModel {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub nodes: Vec<Node>,
    pub roots: Vec<NodeId>,
    /// Pre-order flattening of the node tree.
    pub linear: Vec<NodeId>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<MaterialDesc>,
    pub textures: Vec<TextureSource>,
}

impl SceneModel {
    pub fn stats(&self) -> ModelStats {
        ModelStats {
            materials: self.materials.len(),
            meshes: self
                .linear
                .iter()
                .filter(|&&n| self.nodes[n].mesh.is_some())
                .count(),
        }
    }

    pub fn push_node(&mut self, node: Node, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        match parent {
            Some(p) => self.nodes[p].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn rebuild_linear(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        self.linear = order;
    }

    /// Axis-aligned unit cube around the origin, faces wound counter-clockwise
    /// when seen from inside. One mesh, one primitive, no materials.
    pub fn unit_cube() -> Self {
        const CORNERS: [[f32; 3]; 8] = [
            [-1.0, -1.0, -1.0],
            [1.0, -1.0, -1.0],
            [1.0, 1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ];
        #[rustfmt::skip]
        const FACES: [u32; 36] = [
            0, 1, 2, 2, 3, 0, // -z
            5, 4, 7, 7, 6, 5, // +z
            4, 0, 3, 3, 7, 4, // -x
            1, 5, 6, 6, 2, 1, // +x
            4, 5, 1, 1, 0, 4, // -y
            3, 2, 6, 6, 7, 3, // +y
        ];

        let mut model = SceneModel {
            vertices: CORNERS.iter().map(|&p| Vertex::at(p)).collect(),
            indices: FACES.to_vec(),
            meshes: vec![Mesh {
                primitives: vec![Primitive {
                    first_index: 0,
                    index_count: FACES.len() as u32,
                    material_index: -1,
                }],
            }],
            ..Default::default()
        };
        model.push_node(
            Node {
                mesh: Some(0),
                ..Default::default()
            },
            None,
        );
        model.rebuild_linear();
        model
    }

    /// Reverses every triangle, turning inside-facing geometry outward.
    pub fn flip_winding(&mut self) {
        for tri in self.indices.chunks_exact_mut(3) {
            tri.swap(1, 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_attribute_offsets() {
        assert_eq!(Vertex::STRIDE, 56);
        let v = Vertex::default();
        let base = &v as *const Vertex as usize;
        assert_eq!(&v.normal as *const _ as usize - base, Vertex::OFFSET_NORMAL as usize);
        assert_eq!(&v.uv0 as *const _ as usize - base, Vertex::OFFSET_UV0 as usize);
        assert_eq!(&v.uv1 as *const _ as usize - base, Vertex::OFFSET_UV1 as usize);
        assert_eq!(&v.color as *const _ as usize - base, Vertex::OFFSET_COLOR as usize);
    }

    #[test]
    fn ubo_is_three_matrices() {
        assert_eq!(std::mem::size_of::<SceneUbo>(), 3 * 64);
        assert_eq!(SceneUbo::new(Mat4::IDENTITY, Mat4::IDENTITY).model, Mat4::IDENTITY);
    }

    #[test]
    fn linear_order_is_pre_order() {
        let mut m = SceneModel::default();
        let a = m.push_node(Node::default(), None);
        let b = m.push_node(Node::default(), Some(a));
        let c = m.push_node(Node::default(), Some(b));
        let d = m.push_node(Node::default(), Some(a));
        let e = m.push_node(Node::default(), None);
        m.rebuild_linear();
        assert_eq!(m.linear, vec![a, b, c, d, e]);
    }

    #[test]
    fn stats_count_mesh_nodes_only() {
        let mut m = SceneModel::unit_cube();
        m.push_node(Node::default(), None);
        m.materials.push(MaterialDesc::default());
        m.rebuild_linear();
        assert_eq!(
            m.stats(),
            ModelStats {
                materials: 1,
                meshes: 1
            }
        );
    }

    #[test]
    fn unit_cube_is_closed() {
        let cube = SceneModel::unit_cube();
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
        assert_eq!(cube.meshes[0].primitives[0].index_count, 36);
        assert!(cube.materials.is_empty());
    }

    #[test]
    fn colour_slots_are_base_and_emissive() {
        let m = MaterialDesc {
            base_color: Some(0),
            metallic_roughness: Some(1),
            normal: Some(2),
            occlusion: Some(3),
            emissive: Some(4),
        };
        let srgb: Vec<_> = m
            .slots()
            .into_iter()
            .zip(MaterialDesc::SRGB_SLOTS)
            .filter_map(|(id, srgb)| srgb.then_some(id))
            .collect();
        assert_eq!(srgb, vec![Some(0), Some(4)]);
    }

    #[test]
    fn flip_winding_swaps_two_corners() {
        let mut cube = SceneModel::unit_cube();
        cube.flip_winding();
        assert_eq!(&cube.indices[..6], &[0, 2, 1, 2, 0, 3]);
        cube.flip_winding();
        assert_eq!(cube.indices, SceneModel::unit_cube().indices);
    }

    #[test]
    fn hdr_bytes_are_float_sized() {
        let img = ImageData {
            width: 1,
            height: 1,
            pixels: Pixels::Rgba32F(vec![1.0, 0.5, 0.25, 1.0]),
        };
        assert!(img.is_hdr());
        assert_eq!(img.bytes().len(), 16);
        assert_eq!(ImageData::solid_rgba8([255; 4]).bytes(), &[255; 4]);
    }
}
