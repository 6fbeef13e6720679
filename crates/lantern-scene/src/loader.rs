//! glTF import into CPU-side model data.

use crate::error::{Result, SceneError};
use crate::mesh::MeshData;
use crate::model::{MeshId, Node, NodeId, SceneGraph};
use crate::vertex::{compute_normals, Vertex};
use glam::Mat4;
use std::path::Path;

/// One triangle list and the image its base colour comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveData {
    pub mesh: MeshData,
    /// Index into [`ModelData::images`].
    pub image: Option<usize>,
}

/// Decoded image, always RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Everything needed to build a [`Model`](crate::Model), before any GPU upload.
#[derive(Debug, Clone)]
pub struct ModelData {
    /// Primitives of each glTF mesh, indexed by [`MeshId`].
    pub meshes: Vec<Vec<PrimitiveData>>,
    pub images: Vec<ImageData>,
    pub graph: SceneGraph,
}

impl ModelData {
    /// Import a `.gltf` or `.glb` file together with its buffers and images.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (document, buffers, images) = gltf::import(path)?;
        let data = Self::from_gltf(&document, &buffers, &images)?;
        tracing::info!(
            path = %path.display(),
            meshes = data.meshes.len(),
            nodes = data.graph.len(),
            images = data.images.len(),
            "Loaded glTF model"
        );
        Ok(data)
    }

    /// Import from in-memory glTF or GLB bytes. External URIs are not resolved.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let (document, buffers, images) = gltf::import_slice(bytes)?;
        Self::from_gltf(&document, &buffers, &images)
    }

    pub fn from_gltf(
        document: &gltf::Document,
        buffers: &[gltf::buffer::Data],
        images: &[gltf::image::Data],
    ) -> Result<Self> {
        let meshes = document
            .meshes()
            .map(|mesh| read_mesh(&mesh, buffers))
            .collect::<Result<Vec<_>>>()?;

        let images = images.iter().map(convert_image).collect::<Result<Vec<_>>>()?;

        let nodes = document
            .nodes()
            .map(|node| Node {
                local: Mat4::from_cols_array_2d(&node.transform().matrix()),
                mesh: node.mesh().map(|m| MeshId(m.index() as u32)),
                children: node.children().map(|c| NodeId(c.index() as u32)).collect(),
            })
            .collect::<Vec<_>>();

        let roots = match document.default_scene().or_else(|| document.scenes().next()) {
            Some(scene) => scene.nodes().map(|n| NodeId(n.index() as u32)).collect(),
            None => parentless(&nodes),
        };

        Ok(Self {
            meshes,
            images,
            graph: SceneGraph::new(nodes, roots)?,
        })
    }

    pub fn primitive_count(&self) -> usize {
        self.meshes.iter().map(Vec::len).sum()
    }
}

fn read_mesh(mesh: &gltf::Mesh<'_>, buffers: &[gltf::buffer::Data]) -> Result<Vec<PrimitiveData>> {
    let mut primitives = Vec::new();
    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            tracing::warn!(
                mesh = mesh.index(),
                mode = ?primitive.mode(),
                "Skipping non-triangle primitive"
            );
            continue;
        }

        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));

        let positions = reader
            .read_positions()
            .ok_or(SceneError::MissingAttribute("POSITION"))?;
        let mut vertices: Vec<Vertex> = positions
            .map(|position| Vertex {
                position,
                ..Vertex::default()
            })
            .collect();

        if let Some(tex_coords) = reader.read_tex_coords(0) {
            for (vertex, uv) in vertices.iter_mut().zip(tex_coords.into_f32()) {
                vertex.tex_coord = uv;
            }
        }
        if let Some(colors) = reader.read_colors(0) {
            for (vertex, color) in vertices.iter_mut().zip(colors.into_rgb_f32()) {
                vertex.color = color;
            }
        }

        let indices: Vec<u32> = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            None => (0..vertices.len() as u32).collect(),
        };

        match reader.read_normals() {
            Some(normals) => {
                for (vertex, normal) in vertices.iter_mut().zip(normals) {
                    vertex.normal = normal;
                }
            }
            None => compute_normals(&mut vertices, &indices),
        }

        let image = primitive
            .material()
            .pbr_metallic_roughness()
            .base_color_texture()
            .map(|info| info.texture().source().index());

        let data = MeshData { vertices, indices };
        data.validate()?;
        primitives.push(PrimitiveData { mesh: data, image });
    }
    Ok(primitives)
}

fn convert_image(image: &gltf::image::Data) -> Result<ImageData> {
    Ok(ImageData {
        width: image.width,
        height: image.height,
        pixels: rgba8_pixels(image.format, &image.pixels)?,
    })
}

/// Expand 8-bit glTF pixel data to RGBA8.
pub(crate) fn rgba8_pixels(format: gltf::image::Format, pixels: &[u8]) -> Result<Vec<u8>> {
    use gltf::image::Format;
    let rgba = match format {
        Format::R8G8B8A8 => pixels.to_vec(),
        Format::R8G8B8 => pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        Format::R8G8 => pixels
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[1], 0, 255])
            .collect(),
        Format::R8 => pixels.iter().flat_map(|&l| [l, l, l, 255]).collect(),
        other => {
            return Err(SceneError::InvalidData(format!(
                "unsupported image format {other:?}"
            )))
        }
    };
    Ok(rgba)
}

/// Nodes no other node lists as a child.
fn parentless(nodes: &[Node]) -> Vec<NodeId> {
    let mut has_parent = vec![false; nodes.len()];
    for child in nodes.iter().flat_map(|n| &n.children) {
        if let Some(flag) = has_parent.get_mut(child.index()) {
            *flag = true;
        }
    }
    (0..nodes.len())
        .filter(|&i| !has_parent[i])
        .map(|i| NodeId(i as u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    /// One triangle with `u16` indices and no normals, under a translated parent.
    const TRIANGLE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [
            { "translation": [1.0, 2.0, 3.0], "children": [1] },
            { "mesh": 0, "scale": [2.0, 2.0, 2.0] }
        ],
        "meshes": [{
            "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }]
        }],
        "buffers": [{
            "byteLength": 42,
            "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIA"
        }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
            },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
        ]
    }"#;

    #[test]
    fn imports_triangle_with_computed_normals() {
        let data = ModelData::from_slice(TRIANGLE_GLTF.as_bytes()).unwrap();
        assert_eq!(data.meshes.len(), 1);
        assert_eq!(data.primitive_count(), 1);

        let primitive = &data.meshes[0][0];
        assert_eq!(primitive.mesh.indices, [0, 1, 2]);
        assert_eq!(primitive.mesh.vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(primitive.image, None);
        for vertex in &primitive.mesh.vertices {
            assert_relative_eq!(vertex.normal[2], 1.0);
            assert_eq!(vertex.color, [1.0; 3]);
        }
    }

    #[test]
    fn imports_node_hierarchy_from_default_scene() {
        let data = ModelData::from_slice(TRIANGLE_GLTF.as_bytes()).unwrap();
        assert_eq!(data.graph.roots(), [NodeId(0)]);

        let transforms = data.graph.world_transforms(Mat4::IDENTITY);
        let (child, world) = transforms[1];
        assert_eq!(child, NodeId(1));
        let p = world.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 3.0);
        assert_relative_eq!(p.y, 2.0);
        assert_relative_eq!(p.z, 3.0);
    }

    #[test]
    fn rgb_images_gain_an_opaque_alpha() {
        let rgba = rgba8_pixels(gltf::image::Format::R8G8B8, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(rgba, [1, 2, 3, 255, 4, 5, 6, 255]);
        let gray = rgba8_pixels(gltf::image::Format::R8, &[9]).unwrap();
        assert_eq!(gray, [9, 9, 9, 255]);
        assert!(rgba8_pixels(gltf::image::Format::R16, &[0, 0]).is_err());
    }

    #[test]
    fn roots_default_to_parentless_nodes() {
        let node = |children: Vec<u32>| Node {
            local: Mat4::IDENTITY,
            mesh: None,
            children: children.into_iter().map(NodeId).collect(),
        };
        let nodes = vec![node(vec![2]), node(vec![]), node(vec![])];
        assert_eq!(parentless(&nodes), [NodeId(0), NodeId(1)]);
    }
}
