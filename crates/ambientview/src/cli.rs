use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use immersive::ConfigPatch;

#[derive(Parser, Debug)]
#[command(
    name = "ambientview",
    author,
    version,
    about = "Blurred, slowly drifting artwork as an ambient window background",
    arg_required_else_help = false,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Artwork to show: local image paths or `http(s)://` URLs, cycled in order.
    #[arg(value_name = "SOURCE")]
    pub sources: Vec<String>,

    /// How long each source stays on screen when several are given (e.g. `30s`, `2m`).
    #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = parse_duration)]
    pub interval: Duration,

    /// Initial window size.
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "1280x720", value_parser = parse_size)]
    pub size: (u32, u32),

    /// Frame cap for the render loop (persisted).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// Drift and zoom strength between 0 and 1 (persisted).
    #[arg(long, value_name = "AMOUNT")]
    pub intensity: Option<f32>,

    /// Blur sigma applied to the artwork before upload (persisted).
    #[arg(long, value_name = "SIGMA")]
    pub blur: Option<f32>,

    /// Crossfade length between sources, `0s` to swap instantly (persisted).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub crossfade: Option<Duration>,

    /// Draw the frame-rate bar along the top edge (persisted).
    #[arg(long)]
    pub overlay: bool,

    /// Keep rendering while the window is occluded (persisted).
    #[arg(long)]
    pub no_pause_when_hidden: bool,
}

impl RunArgs {
    /// Config overrides carried by the flags; empty when none were given.
    pub fn config_patch(&self) -> ConfigPatch {
        ConfigPatch {
            target_fps: self.fps,
            motion_intensity: self.intensity,
            pause_when_hidden: self.no_pause_when_hidden.then_some(false),
            debug_overlay: self.overlay.then_some(true),
            crossfade: self.crossfade,
            blur_radius: self.blur,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or edit the persisted renderer configuration.
    Config(ConfigCommand),
    /// Turn the ambient background on.
    Enable,
    /// Turn the ambient background off; the window shows a static colour.
    Disable,
}

#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration and where it is stored.
    Show,
    /// Set one configuration key (camelCase, e.g. `targetFps 30`).
    Set(SetArgs),
}

#[derive(Args, Debug)]
pub struct SetArgs {
    #[arg(value_name = "KEY")]
    pub key: String,
    /// JSON value; anything that is not valid JSON is stored as a string.
    #[arg(value_name = "VALUE")]
    pub value: String,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Ok(Duration::from_secs_f64(seconds));
        }
        return Err(format!("duration must be non-negative, got {raw}"));
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration '{raw}': {err}"))
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (width, height) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{raw}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{raw}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("size must be non-zero, got '{raw}'"));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_seconds_and_humantime() {
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("1.5"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration("-3").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn sizes_parse_width_by_height() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size("640X480"), Ok((640, 480)));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x10").is_err());
    }

    #[test]
    fn flags_map_onto_config_patch() {
        let cli = Cli::try_parse_from([
            "ambientview",
            "--fps",
            "24",
            "--overlay",
            "--no-pause-when-hidden",
            "--crossfade",
            "500ms",
            "cover.png",
        ])
        .unwrap();
        let patch = cli.run.config_patch();
        assert_eq!(patch.target_fps, Some(24));
        assert_eq!(patch.debug_overlay, Some(true));
        assert_eq!(patch.pause_when_hidden, Some(false));
        assert_eq!(patch.crossfade, Some(Duration::from_millis(500)));
        assert_eq!(patch.motion_intensity, None);
        assert_eq!(cli.run.sources, vec!["cover.png".to_string()]);
    }

    #[test]
    fn no_flags_means_empty_patch() {
        let cli = Cli::try_parse_from(["ambientview"]).unwrap();
        assert!(cli.run.config_patch().is_empty());
        assert!(cli.command.is_none());
    }
}
