//! Scene error types.

use lantern_gpu::GpuError;
use thiserror::Error;

/// Errors raised while loading or uploading scene assets.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Primitive is missing the {0} attribute")]
    MissingAttribute(&'static str),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, SceneError>;

/// Record `next` into `first` unless an earlier failure is already held.
///
/// Used by teardown paths that must keep releasing after one release fails.
pub(crate) fn keep_first(first: &mut Result<()>, next: Result<()>) {
    if let Err(e) = next {
        if first.is_ok() {
            *first = Err(e);
        } else {
            tracing::warn!("Further release failure: {e}");
        }
    }
}
