//! Test harness for the Lantern frame engine.
//!
//! Provides a scriptable in-memory device, a window with a settable size and
//! a draw surface that records commands, so the frame cycle can be exercised
//! without a GPU.

pub mod mock_device;
pub mod mock_window;
pub mod recording;

pub use mock_device::{MockCall, MockDevice, ScriptedAcquire};
pub use mock_window::MockWindow;
pub use recording::{DrawCommand, RecordingSurface};

use lantern_gpu::{FrameEngine, FrameEngineConfig, Result};
use std::sync::Arc;

/// A mock device and window of the same size, plus an engine driving them.
pub fn engine_fixture(
    width: u32,
    height: u32,
    config: FrameEngineConfig,
) -> Result<(Arc<MockDevice>, MockWindow, FrameEngine<MockDevice>)> {
    let device = Arc::new(MockDevice::new(width, height));
    let window = MockWindow::new(width, height);
    let engine = FrameEngine::new(device.clone(), &window, config)?;
    Ok((device, window, engine))
}

/// Run one frame with no draws. Returns whether a frame was recorded.
pub fn run_empty_frame(
    engine: &mut FrameEngine<MockDevice>,
    window: &mut MockWindow,
) -> Result<bool> {
    match engine.begin_frame(&mut *window)? {
        Some(frame) => {
            frame.end(window)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
