//! Lantern model viewer
//!
//! Renders a glTF model, or a textured quad when no model is given, spinning
//! around the Z axis in front of a fixed camera.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p lantern-viewer -- [OPTIONS] [MODEL.gltf]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod args;

use lantern_app::{run_app, AppConfig};

use crate::app::Viewer;
use crate::args::ViewerArgs;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    let args = ViewerArgs::from_env()?;
    if args.help {
        print_help();
        return Ok(());
    }

    run_app::<Viewer>(
        AppConfig::new("Lantern Viewer")
            .with_size(WIDTH, HEIGHT)
            .with_vsync(!args.no_vsync),
    )
}

fn print_help() {
    eprintln!(
        "Lantern model viewer

USAGE:
    cargo run -p lantern-viewer -- [OPTIONS] [MODEL.gltf]

Without a model a textured quad is shown.

OPTIONS:
    --no-vsync              Present with MAILBOX instead of FIFO
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
