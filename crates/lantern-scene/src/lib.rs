//! Drawable scene content for the Lantern renderer.
//!
//! This crate provides:
//! - The [`Vertex`] format and normal generation
//! - Device-local [`Mesh`]es and sampled [`Texture`]s
//! - glTF import into [`ModelData`] and upload into an arena-backed [`Model`]
//! - A perspective [`Camera`] and its uniform payload

pub mod camera;
pub mod error;
pub mod loader;
pub mod mesh;
pub mod model;
pub mod texture;
pub mod vertex;

pub use camera::{Camera, CameraUniforms};
pub use error::{Result, SceneError};
pub use loader::{ImageData, ModelData, PrimitiveData};
pub use mesh::{Mesh, MeshData};
pub use model::{
    model_push_constant_range, MeshId, Model, Node, NodeId, Primitive, SceneGraph, TextureId,
    MODEL_PUSH_CONSTANT_SIZE, TEXTURE_SET,
};
pub use texture::{Texture, TEXTURE_BINDING, TEXTURE_FORMAT};
pub use vertex::{compute_normals, Vertex};
