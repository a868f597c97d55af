mod gui;

use clap::Parser;
use eframe::egui;
use gui::PlayerApp;
use nox_player::core::PlayerConfig;

/// Play a video URL, page URL or local file, synchronised to its audio track
#[derive(Parser, Debug)]
#[command(name = "nox-player")]
#[command(version)]
struct Args {
    /// Page URL, direct media URL or local path
    source: String,

    /// Start position in seconds
    #[arg(default_value_t = 0.0)]
    start: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let config = PlayerConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({}), using defaults", e);
        PlayerConfig::default()
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 780.0])
            .with_title("nox-player"),
        ..Default::default()
    };

    let Args { source, start } = args;
    eframe::run_native(
        "nox-player",
        options,
        Box::new(move |cc| Ok(Box::new(PlayerApp::new(cc, config, source, start)))),
    ).map_err(|e| anyhow::anyhow!("Failed to run player: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_start_defaults_to_zero() {
        let args = Args::try_parse_from(["nox-player", "https://example.com/watch?v=1"]).unwrap();
        assert_eq!(args.source, "https://example.com/watch?v=1");
        assert_eq!(args.start, 0.0);
    }

    #[test]
    fn test_start_position_is_parsed() {
        let args = Args::try_parse_from(["nox-player", "/videos/clip.mkv", "42.5"]).unwrap();
        assert_eq!(args.start, 42.5);
    }

    #[test]
    fn test_help_is_not_treated_as_a_source() {
        let err = Args::try_parse_from(["nox-player", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_bad_input_is_rejected() {
        assert!(Args::try_parse_from(["nox-player"]).is_err());
        assert!(Args::try_parse_from(["nox-player", "clip.mkv", "soon"]).is_err());
        assert!(Args::try_parse_from(["nox-player", "clip.mkv", "1", "extra"]).is_err());
    }
}
