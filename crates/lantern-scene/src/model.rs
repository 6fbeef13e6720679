//! Node hierarchies and their GPU resources.
//!
//! A model owns all of its nodes, meshes and textures in flat arenas. Nodes
//! refer to meshes, and primitives to textures, by small integer handles, so
//! the whole model is torn down in one pass.

use crate::error::{keep_first, Result, SceneError};
use crate::loader::ModelData;
use crate::mesh::Mesh;
use crate::texture::Texture;
use ash::vk;
use glam::Mat4;
use lantern_gpu::{push_pod, DescriptorPool, DeviceContext, DrawSurface, Drawable};
use std::path::Path;

/// Descriptor set index the texture set is bound at.
pub const TEXTURE_SET: u32 = 1;

/// Size of the model matrix pushed for each primitive.
pub const MODEL_PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<[f32; 16]>() as u32;

/// Push constant range covering the model matrix.
pub fn model_push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: MODEL_PUSH_CONSTANT_SIZE,
    }
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index of a node in its model.
    NodeId
);
arena_id!(
    /// Index of a mesh (a list of primitives) in its model.
    MeshId
);
arena_id!(
    /// Index of a texture in its model.
    TextureId
);

/// One node of the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Transform relative to the parent.
    pub local: Mat4,
    pub mesh: Option<MeshId>,
    pub children: Vec<NodeId>,
}

/// Validated node tree: every child and root is in range and each node has at most one parent.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    pub fn new(nodes: Vec<Node>, roots: Vec<NodeId>) -> Result<Self> {
        let mut reached = vec![false; nodes.len()];
        let mut stack = roots.clone();
        while let Some(id) = stack.pop() {
            let Some(node) = nodes.get(id.index()) else {
                return Err(SceneError::InvalidData(format!(
                    "node {} out of range ({} nodes)",
                    id.0,
                    nodes.len()
                )));
            };
            if std::mem::replace(&mut reached[id.index()], true) {
                return Err(SceneError::InvalidData(format!(
                    "node {} is reachable twice",
                    id.0
                )));
            }
            stack.extend(node.children.iter().copied());
        }
        Ok(Self { nodes, roots })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Visit every node reachable from the roots, depth first, with its world
    /// transform `parent_world * local`. Stops at the first error.
    pub fn try_visit<E>(
        &self,
        root_transform: Mat4,
        mut visit: impl FnMut(NodeId, &Node, Mat4) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        let mut stack: Vec<(NodeId, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|&id| (id, root_transform))
            .collect();

        while let Some((id, parent)) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            let world = parent * node.local;
            visit(id, node, world)?;
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }
        Ok(())
    }

    /// World transforms of every reachable node, in visiting order.
    pub fn world_transforms(&self, root_transform: Mat4) -> Vec<(NodeId, Mat4)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let _ = self.try_visit::<()>(root_transform, |id, _, world| {
            out.push((id, world));
            Ok(())
        });
        out
    }
}

/// A drawable mesh and the texture sampled for its base colour.
pub struct Primitive {
    pub mesh: Mesh,
    pub texture: Option<TextureId>,
}

/// A glTF model in GPU memory.
pub struct Model {
    graph: SceneGraph,
    meshes: Vec<Vec<Primitive>>,
    textures: Vec<Texture>,
    fallback: Texture,
    transform: Mat4,
}

impl Model {
    /// Import a glTF file and upload it.
    pub fn load(
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        texture_layout: vk::DescriptorSetLayout,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let data = ModelData::load(path)?;
        Self::upload(ctx, pool, texture_layout, &data)
    }

    /// Upload meshes and referenced images of `data`. Everything created so far
    /// is released if any upload fails.
    pub fn upload(
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        texture_layout: vk::DescriptorSetLayout,
        data: &ModelData,
    ) -> Result<Self> {
        let fallback = Texture::white(ctx, pool, texture_layout)?;
        let mut model = Self {
            graph: data.graph.clone(),
            meshes: Vec::with_capacity(data.meshes.len()),
            textures: Vec::new(),
            fallback,
            transform: Mat4::IDENTITY,
        };

        if let Err(e) = model.populate(ctx, pool, texture_layout, data) {
            if let Err(cleanup) = model.destroy(ctx, pool) {
                tracing::warn!("Failed to release partially uploaded model: {cleanup}");
            }
            return Err(e);
        }

        tracing::debug!(
            meshes = model.meshes.len(),
            textures = model.textures.len(),
            "Uploaded model"
        );
        Ok(model)
    }

    fn populate(
        &mut self,
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        texture_layout: vk::DescriptorSetLayout,
        data: &ModelData,
    ) -> Result<()> {
        // glTF image index -> uploaded texture, only for images a primitive uses.
        let mut uploaded: Vec<Option<TextureId>> = vec![None; data.images.len()];

        for (mesh_index, primitives) in data.meshes.iter().enumerate() {
            let mut gpu_primitives = Vec::with_capacity(primitives.len());
            for (primitive_index, primitive) in primitives.iter().enumerate() {
                let texture = match primitive.image {
                    Some(image_index) => Some(self.texture_for(
                        ctx,
                        pool,
                        texture_layout,
                        data,
                        &mut uploaded,
                        image_index,
                    )?),
                    None => None,
                };
                let mesh = Mesh::upload(
                    ctx,
                    &primitive.mesh,
                    &format!("mesh {mesh_index}.{primitive_index}"),
                )?;
                gpu_primitives.push(Primitive { mesh, texture });
            }
            self.meshes.push(gpu_primitives);
        }
        Ok(())
    }

    fn texture_for(
        &mut self,
        ctx: &DeviceContext,
        pool: &DescriptorPool,
        texture_layout: vk::DescriptorSetLayout,
        data: &ModelData,
        uploaded: &mut [Option<TextureId>],
        image_index: usize,
    ) -> Result<TextureId> {
        let slot = uploaded.get_mut(image_index).ok_or_else(|| {
            SceneError::InvalidData(format!("image {image_index} out of range"))
        })?;
        if let Some(id) = *slot {
            return Ok(id);
        }

        let image = &data.images[image_index];
        let texture = Texture::from_rgba8(
            ctx,
            pool,
            texture_layout,
            image.width,
            image.height,
            &image.pixels,
            &format!("image {image_index}"),
        )?;
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(texture);
        *slot = Some(id);
        Ok(id)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        graph: SceneGraph,
        meshes: Vec<Vec<Primitive>>,
        textures: Vec<Texture>,
        fallback: Texture,
    ) -> Self {
        Self {
            graph,
            meshes,
            textures,
            fallback,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn mesh(&self, id: MeshId) -> Option<&[Primitive]> {
        self.meshes.get(id.index()).map(Vec::as_slice)
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.index())
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Model matrix applied above the root nodes.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    /// Free every mesh and texture. Nothing may still be drawing the model.
    ///
    /// A failed release does not stop the others; the first failure is returned.
    pub fn destroy(&mut self, ctx: &DeviceContext, pool: &DescriptorPool) -> Result<()> {
        let mut result = Ok(());
        for mut primitive in self.meshes.drain(..).flatten() {
            keep_first(&mut result, primitive.mesh.destroy(ctx));
        }
        for mut texture in self.textures.drain(..) {
            keep_first(&mut result, texture.destroy(ctx, pool));
        }
        keep_first(&mut result, self.fallback.destroy(ctx, pool));
        result
    }

    fn descriptor_set(&self, texture: Option<TextureId>) -> vk::DescriptorSet {
        texture
            .and_then(|id| self.texture(id))
            .unwrap_or(&self.fallback)
            .descriptor_set()
    }
}

impl Drawable for Model {
    fn record(&self, surface: &mut dyn DrawSurface) -> lantern_gpu::Result<()> {
        self.graph.try_visit(self.transform, |_, node, world| {
            let Some(primitives) = node.mesh.and_then(|id| self.mesh(id)) else {
                return Ok(());
            };
            let matrix = world.to_cols_array();
            for primitive in primitives {
                let set = self.descriptor_set(primitive.texture);
                surface.bind_descriptor_sets(TEXTURE_SET, &[set])?;
                push_pod(surface, vk::ShaderStageFlags::VERTEX, &matrix)?;
                primitive.mesh.record(surface)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::fake_buffer;
    use approx::assert_relative_eq;
    use ash::vk::Handle;
    use glam::Vec3;
    use lantern_gpu::GpuImage;
    use lantern_test::{DrawCommand, RecordingSurface};

    fn node(local: Mat4, mesh: Option<u32>, children: &[u32]) -> Node {
        Node {
            local,
            mesh: mesh.map(MeshId),
            children: children.iter().copied().map(NodeId).collect(),
        }
    }

    fn fake_texture(set: u64) -> Texture {
        Texture {
            image: GpuImage {
                image: vk::Image::null(),
                allocation: None,
                format: crate::texture::TEXTURE_FORMAT,
                extent: vk::Extent3D {
                    width: 1,
                    height: 1,
                    depth: 1,
                },
            },
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            descriptor_set: vk::DescriptorSet::from_raw(set),
        }
    }

    #[test]
    fn child_transform_composes_parent_first() {
        let translate = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let rotate = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let graph = SceneGraph::new(
            vec![node(translate, None, &[1]), node(rotate, None, &[])],
            vec![NodeId(0)],
        )
        .unwrap();

        let transforms = graph.world_transforms(Mat4::IDENTITY);
        assert_eq!(transforms.len(), 2);

        // Rotate in the child's frame, then translate by the parent.
        let p = transforms[1].1.transform_point3(Vec3::X);
        assert_relative_eq!(p.x, 10.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn root_transform_applies_to_every_root() {
        let graph = SceneGraph::new(
            vec![node(Mat4::IDENTITY, None, &[]), node(Mat4::IDENTITY, None, &[])],
            vec![NodeId(0), NodeId(1)],
        )
        .unwrap();
        let root = Mat4::from_scale(Vec3::splat(3.0));
        let transforms = graph.world_transforms(root);
        assert_eq!(transforms[0].0, NodeId(0));
        assert!(transforms.iter().all(|(_, world)| *world == root));
    }

    #[test]
    fn graph_rejects_bad_references() {
        let out_of_range =
            SceneGraph::new(vec![node(Mat4::IDENTITY, None, &[5])], vec![NodeId(0)]);
        assert!(matches!(out_of_range, Err(SceneError::InvalidData(_))));

        let cycle = SceneGraph::new(
            vec![node(Mat4::IDENTITY, None, &[1]), node(Mat4::IDENTITY, None, &[0])],
            vec![NodeId(0)],
        );
        assert!(cycle.is_err());
    }

    #[test]
    fn draws_each_primitive_with_its_texture_or_fallback() {
        let translate = Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0));
        let graph = SceneGraph::new(
            vec![node(Mat4::IDENTITY, None, &[1]), node(translate, Some(0), &[])],
            vec![NodeId(0)],
        )
        .unwrap();
        let meshes = vec![vec![
            Primitive {
                mesh: Mesh::from_parts(fake_buffer(1), fake_buffer(2), 3),
                texture: Some(TextureId(0)),
            },
            Primitive {
                mesh: Mesh::from_parts(fake_buffer(3), fake_buffer(4), 6),
                texture: None,
            },
        ]];
        let model = Model::from_parts(graph, meshes, vec![fake_texture(100)], fake_texture(200));

        let mut surface = RecordingSurface::new(800, 600);
        model.record(&mut surface).unwrap();

        let sets: Vec<_> = surface
            .commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::BindDescriptorSets { first_set, sets } => Some((*first_set, sets[0])),
                _ => None,
            })
            .collect();
        assert_eq!(
            sets,
            [
                (TEXTURE_SET, vk::DescriptorSet::from_raw(100)),
                (TEXTURE_SET, vk::DescriptorSet::from_raw(200)),
            ]
        );

        let pushes = surface.push_constants();
        assert_eq!(pushes.len(), 2);
        let matrix: Vec<f32> = bytemuck::pod_collect_to_vec(pushes[0]);
        assert_eq!(matrix, translate.to_cols_array());
        assert_eq!(surface.draw_count(), 2);
    }

    #[test]
    fn drawing_without_a_pipeline_fails() {
        let graph =
            SceneGraph::new(vec![node(Mat4::IDENTITY, Some(0), &[])], vec![NodeId(0)]).unwrap();
        let meshes = vec![vec![Primitive {
            mesh: Mesh::from_parts(fake_buffer(1), fake_buffer(2), 3),
            texture: None,
        }]];
        let model = Model::from_parts(graph, meshes, Vec::new(), fake_texture(1));

        let mut surface = RecordingSurface::new(800, 600).without_pipeline();
        assert!(model.record(&mut surface).is_err());
        assert_eq!(surface.draw_count(), 0);
    }

    #[test]
    fn push_constant_range_holds_a_matrix() {
        let range = model_push_constant_range();
        assert_eq!(range.size, 64);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }
}
