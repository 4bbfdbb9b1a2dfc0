// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;

use crate::scene::SceneModel;

bitflags! {
    /// Which draw paths the frame recorder emits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DrawPasses: u8 {
        const SCENE  = 1 << 0;
        const SKYBOX = 1 << 1;
    }
}

impl Default for DrawPasses {
    fn default() -> Self {
        DrawPasses::all()
    }
}

/// Sink for the commands produced by a node traversal.
pub trait DrawRecorder {
    fn bind_material(&mut self, material: usize);
    fn draw_indexed(&mut self, index_count: u32, first_index: u32);
}

/// Out-of-range and negative indices fall back to material 0.
pub fn resolve_material(material_index: i32, material_count: usize) -> usize {
    match usize::try_from(material_index) {
        Ok(i) if i < material_count => i,
        _ => 0,
    }
}

/// Emits one bind + draw per primitive, following the pre-order `linear`
/// list so tree depth costs no stack.
pub fn draw_nodes<R: DrawRecorder + ?Sized>(model: &SceneModel, recorder: &mut R) {
    let meshes = model
        .linear
        .iter()
        .filter_map(|&id| model.nodes.get(id)?.mesh)
        .filter_map(|m| model.meshes.get(m));
    for mesh in meshes {
        for prim in &mesh.primitives {
            recorder.bind_material(resolve_material(prim.material_index, model.materials.len()));
            recorder.draw_indexed(prim.index_count, prim.first_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MaterialDesc, Mesh, Node, Primitive};
    use rstest::rstest;

    #[derive(Debug, PartialEq)]
    enum Cmd {
        Bind(usize),
        Draw(u32, u32),
    }

    #[derive(Default)]
    struct Log(Vec<Cmd>);

    impl DrawRecorder for Log {
        fn bind_material(&mut self, material: usize) {
            self.0.push(Cmd::Bind(material));
        }
        fn draw_indexed(&mut self, index_count: u32, first_index: u32) {
            self.0.push(Cmd::Draw(index_count, first_index));
        }
    }

    fn prim(first_index: u32, material_index: i32) -> Primitive {
        Primitive {
            first_index,
            index_count: 3,
            material_index,
        }
    }

    fn mesh_node(mesh: usize) -> Node {
        Node {
            mesh: Some(mesh),
            ..Default::default()
        }
    }

    #[rstest]
    #[case(-1, 3, 0)]
    #[case(0, 3, 0)]
    #[case(2, 3, 2)]
    #[case(3, 3, 0)]
    #[case(i32::MAX, 3, 0)]
    #[case(5, 0, 0)]
    fn material_index_is_clamped(#[case] index: i32, #[case] count: usize, #[case] want: usize) {
        assert_eq!(resolve_material(index, count), want);
    }

    #[test]
    fn draws_follow_pre_order() {
        let mut m = SceneModel {
            meshes: vec![
                Mesh {
                    primitives: vec![prim(0, 0), prim(3, 1)],
                },
                Mesh {
                    primitives: vec![prim(6, 2)],
                },
                Mesh {
                    primitives: vec![prim(9, 1)],
                },
            ],
            materials: vec![MaterialDesc::default(); 3],
            ..Default::default()
        };
        // root(mesh0) -> [empty -> [mesh1], mesh2]
        let root = m.push_node(mesh_node(0), None);
        let group = m.push_node(Node::default(), Some(root));
        m.push_node(mesh_node(1), Some(group));
        m.push_node(mesh_node(2), Some(root));
        m.rebuild_linear();

        let mut log = Log::default();
        draw_nodes(&m, &mut log);
        let draws: Vec<u32> = log
            .0
            .iter()
            .filter_map(|c| match c {
                Cmd::Draw(_, first) => Some(*first),
                Cmd::Bind(_) => None,
            })
            .collect();
        assert_eq!(draws, vec![0, 3, 6, 9]);
    }

    #[test]
    fn default_material_binds_first_set() {
        let mut m = SceneModel {
            meshes: vec![Mesh {
                primitives: vec![prim(0, -1), prim(3, 7)],
            }],
            materials: vec![MaterialDesc::default(); 2],
            ..Default::default()
        };
        m.push_node(mesh_node(0), None);
        m.rebuild_linear();

        let mut log = Log::default();
        draw_nodes(&m, &mut log);
        assert_eq!(
            log.0,
            vec![Cmd::Bind(0), Cmd::Draw(3, 0), Cmd::Bind(0), Cmd::Draw(3, 3)]
        );
    }

    #[test]
    fn deep_node_chain_draws_without_recursion() {
        const DEPTH: usize = 200_000;
        let mut m = SceneModel {
            meshes: vec![Mesh {
                primitives: vec![prim(0, 0)],
            }],
            ..Default::default()
        };
        let mut parent = None;
        for _ in 0..DEPTH {
            parent = Some(m.push_node(mesh_node(0), parent));
        }
        m.rebuild_linear();

        let mut log = Log::default();
        draw_nodes(&m, &mut log);
        assert_eq!(log.0.len(), 2 * DEPTH);
    }

    #[test]
    fn all_passes_on_by_default() {
        let p = DrawPasses::default();
        assert!(p.contains(DrawPasses::SCENE | DrawPasses::SKYBOX));
    }
}
