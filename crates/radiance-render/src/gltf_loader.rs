// SPDX-License-Identifier: CEPL-1.0
//! glTF 2.0 import into a [`SceneModel`].
//!
//! Mesh vertices are baked into world space per node instance, so the
//! renderer can draw every primitive with an identity model matrix.

use std::path::{Path, PathBuf};

use glam::{Mat3, Mat4, Vec3};
use gltf::image::Format;
use gltf::texture::{MagFilter, MinFilter, WrappingMode};
use tracing::{info, warn};

use crate::error::LoadError;
use crate::scene::{
    AddressMode, Filter, ImageData, MaterialDesc, Mesh, Node, NodeId, Pixels, Primitive,
    SamplerDesc, SceneModel, TextureSource, Vertex,
};

pub fn load_gltf(path: &Path) -> Result<SceneModel, LoadError> {
    let (doc, buffers, images) = gltf::import(path).map_err(|e| gltf_error(path, e))?;
    let model = build_model(path, &doc, &buffers, &images)?;
    info!(
        "loaded {}: {} vertices, {} indices, {} nodes, {} materials, {} textures",
        path.display(),
        model.vertices.len(),
        model.indices.len(),
        model.nodes.len(),
        model.materials.len(),
        model.textures.len()
    );
    Ok(model)
}

fn gltf_error(path: &Path, e: gltf::Error) -> LoadError {
    match e {
        gltf::Error::Io(source) => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => LoadError::Gltf {
            path: path.to_path_buf(),
            source,
        },
    }
}

struct Builder<'a> {
    path: PathBuf,
    buffers: &'a [gltf::buffer::Data],
    model: SceneModel,
}

pub(crate) fn build_model(
    path: &Path,
    doc: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    images: &[gltf::image::Data],
) -> Result<SceneModel, LoadError> {
    let scene = doc
        .default_scene()
        .or_else(|| doc.scenes().next())
        .ok_or_else(|| LoadError::EmptyScene {
            path: path.to_path_buf(),
        })?;

    let mut b = Builder {
        path: path.to_path_buf(),
        buffers,
        model: SceneModel::default(),
    };

    b.model.textures = doc
        .textures()
        .map(|tex| {
            let index = tex.source().index();
            Ok(TextureSource {
                image: convert_image(path, index, &images[index])?,
                sampler: sampler_desc(&tex.sampler()),
            })
        })
        .collect::<Result<_, LoadError>>()?;
    b.model.materials = doc.materials().map(|m| material_desc(&m)).collect();

    for node in scene.nodes() {
        b.visit(&node, Mat4::IDENTITY, None)?;
    }
    b.model.rebuild_linear();
    Ok(b.model)
}

impl Builder<'_> {
    fn visit(
        &mut self,
        node: &gltf::Node<'_>,
        parent_world: Mat4,
        parent: Option<NodeId>,
    ) -> Result<(), LoadError> {
        let local = Mat4::from_cols_array_2d(&node.transform().matrix());
        let world = parent_world * local;

        let mesh = match node.mesh() {
            Some(m) => Some(self.load_mesh(&m, world)?),
            None => None,
        };
        let id = self.model.push_node(
            Node {
                local,
                mesh,
                children: Vec::new(),
            },
            parent,
        );
        for child in node.children() {
            self.visit(&child, world, Some(id))?;
        }
        Ok(())
    }

    fn load_mesh(&mut self, mesh: &gltf::Mesh<'_>, world: Mat4) -> Result<usize, LoadError> {
        let normal_mat = if world.determinant().abs() > f32::EPSILON {
            Mat3::from_mat4(world).inverse().transpose()
        } else {
            Mat3::from_mat4(world)
        };

        let mut out = Mesh::default();
        for prim in mesh.primitives() {
            if prim.mode() != gltf::mesh::Mode::Triangles {
                warn!("mesh {}: skipping {:?} primitive", mesh.index(), prim.mode());
                continue;
            }
            let buffers = self.buffers;
            let reader = prim.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
            let positions = reader
                .read_positions()
                .ok_or_else(|| LoadError::MissingPositions {
                    path: self.path.clone(),
                    mesh: mesh.index(),
                })?;

            let base = self.model.vertices.len() as u32;
            let mut normals = reader.read_normals();
            let mut uv0 = reader.read_tex_coords(0).map(|t| t.into_f32());
            let mut uv1 = reader.read_tex_coords(1).map(|t| t.into_f32());
            let mut colors = reader.read_colors(0).map(|c| c.into_rgba_f32());

            for pos in positions {
                let n = normals.as_mut().and_then(Iterator::next).unwrap_or_default();
                let n = (normal_mat * Vec3::from(n)).normalize_or_zero();
                self.model.vertices.push(Vertex {
                    pos: world.transform_point3(Vec3::from(pos)).to_array(),
                    normal: n.to_array(),
                    uv0: uv0.as_mut().and_then(Iterator::next).unwrap_or_default(),
                    uv1: uv1.as_mut().and_then(Iterator::next).unwrap_or_default(),
                    color: colors.as_mut().and_then(Iterator::next).unwrap_or([1.0; 4]),
                });
            }
            let count = self.model.vertices.len() as u32 - base;

            let first_index = self.model.indices.len() as u32;
            match reader.read_indices() {
                Some(idx) => self
                    .model
                    .indices
                    .extend(idx.into_u32().map(|i| i + base)),
                None => self.model.indices.extend(base..base + count),
            }
            out.primitives.push(Primitive {
                first_index,
                index_count: self.model.indices.len() as u32 - first_index,
                material_index: prim
                    .material()
                    .index()
                    .and_then(|i| i32::try_from(i).ok())
                    .unwrap_or(-1),
            });
        }

        self.model.meshes.push(out);
        Ok(self.model.meshes.len() - 1)
    }
}

fn material_desc(m: &gltf::Material<'_>) -> MaterialDesc {
    let pbr = m.pbr_metallic_roughness();
    MaterialDesc {
        base_color: pbr.base_color_texture().map(|t| t.texture().index()),
        metallic_roughness: pbr.metallic_roughness_texture().map(|t| t.texture().index()),
        normal: m.normal_texture().map(|t| t.texture().index()),
        occlusion: m.occlusion_texture().map(|t| t.texture().index()),
        emissive: m.emissive_texture().map(|t| t.texture().index()),
    }
}

fn sampler_desc(s: &gltf::texture::Sampler<'_>) -> SamplerDesc {
    let mag = match s.mag_filter() {
        Some(MagFilter::Nearest) => Filter::Nearest,
        _ => Filter::Linear,
    };
    let min = match s.min_filter() {
        Some(MinFilter::Nearest | MinFilter::NearestMipmapNearest | MinFilter::NearestMipmapLinear) => {
            Filter::Nearest
        }
        _ => Filter::Linear,
    };
    let v = address_mode(s.wrap_t());
    SamplerDesc {
        mag,
        min,
        address_u: address_mode(s.wrap_s()),
        address_v: v,
        address_w: v,
    }
}

fn address_mode(w: WrappingMode) -> AddressMode {
    match w {
        WrappingMode::ClampToEdge => AddressMode::ClampToEdge,
        WrappingMode::MirroredRepeat => AddressMode::MirroredRepeat,
        WrappingMode::Repeat => AddressMode::Repeat,
    }
}

/// Expands any glTF pixel layout to 8-bit RGBA.
fn convert_image(
    path: &Path,
    index: usize,
    img: &gltf::image::Data,
) -> Result<ImageData, LoadError> {
    let bad = |reason| LoadError::BadImage {
        path: path.to_path_buf(),
        image: index,
        reason,
    };
    let texels = img
        .width
        .checked_mul(img.height)
        .map(|n| n as usize)
        .filter(|&n| n > 0)
        .ok_or_else(|| bad("no texels"))?;
    let (channels, stride, to_u8): (usize, usize, fn(&[u8]) -> u8) = match img.format {
        Format::R8 => (1, 1, |b| b[0]),
        Format::R8G8 => (2, 1, |b| b[0]),
        Format::R8G8B8 => (3, 1, |b| b[0]),
        Format::R8G8B8A8 => (4, 1, |b| b[0]),
        Format::R16 => (1, 2, u16_to_u8),
        Format::R16G16 => (2, 2, u16_to_u8),
        Format::R16G16B16 => (3, 2, u16_to_u8),
        Format::R16G16B16A16 => (4, 2, u16_to_u8),
        Format::R32G32B32FLOAT => (3, 4, f32_to_u8),
        Format::R32G32B32A32FLOAT => (4, 4, f32_to_u8),
    };
    let expected = texels
        .checked_mul(channels * stride)
        .ok_or_else(|| bad("dimensions overflow"))?;
    if img.pixels.len() != expected {
        return Err(bad("pixel data does not match the dimensions"));
    }

    let mut out = Vec::with_capacity(texels * 4);
    for px in img.pixels.chunks_exact(stride * channels).take(texels) {
        let mut rgba = [0u8, 0, 0, 255];
        for (c, ch) in px.chunks_exact(stride).enumerate() {
            rgba[c] = to_u8(ch);
        }
        if channels == 1 {
            rgba[1] = rgba[0];
            rgba[2] = rgba[0];
        }
        out.extend_from_slice(&rgba);
    }
    Ok(ImageData {
        width: img.width,
        height: img.height,
        pixels: Pixels::Rgba8(out),
    })
}

fn u16_to_u8(b: &[u8]) -> u8 {
    (u16::from_ne_bytes([b[0], b[1]]) >> 8) as u8
}

fn f32_to_u8(b: &[u8]) -> u8 {
    let v = f32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}
