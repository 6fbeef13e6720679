//! Application framework for the Lantern renderer.
//!
//! Opens a winit window, builds the device context and frame engine for it
//! and drives the frame cycle, calling into a [`LanternApp`] implementation.

pub mod app;
pub mod config;
pub mod context;
pub mod runner;
pub mod window;

pub use app::{FrameInfo, LanternApp};
pub use config::AppConfig;
pub use context::AppContext;
pub use runner::run_app;
pub use window::WindowState;

pub use winit;
