//! Command line parsing.

use anyhow::bail;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ViewerArgs {
    pub model: Option<PathBuf>,
    pub no_vsync: bool,
    pub help: bool,
}

impl ViewerArgs {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Self::default();
        for arg in args {
            match arg.as_str() {
                "-h" | "--help" => parsed.help = true,
                "--no-vsync" => parsed.no_vsync = true,
                flag if flag.starts_with('-') => bail!("unknown option {flag}"),
                path => {
                    if parsed.model.is_some() {
                        bail!("only one model can be viewed at a time");
                    }
                    parsed.model = Some(PathBuf::from(path));
                }
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ViewerArgs> {
        ViewerArgs::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn no_arguments_show_the_quad_with_vsync() {
        assert_eq!(parse(&[]).unwrap(), ViewerArgs::default());
    }

    #[test]
    fn model_path_and_flags() {
        let args = parse(&["--no-vsync", "scene.gltf"]).unwrap();
        assert_eq!(args.model, Some(PathBuf::from("scene.gltf")));
        assert!(args.no_vsync);
        assert!(!args.help);
    }

    #[test]
    fn rejects_unknown_flags_and_second_model() {
        assert!(parse(&["--fast"]).is_err());
        assert!(parse(&["a.gltf", "b.gltf"]).is_err());
    }
}
