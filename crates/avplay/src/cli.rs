use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "avplay", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Engine tuning file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Resampler input chunk size in frames
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Output buffer between the engine and the device callback, in seconds
    #[arg(long, default_value_t = 0.5)]
    pub output_buffer_seconds: f32,

    /// Print a status line every N milliseconds (0 disables)
    #[arg(long, default_value_t = 1000)]
    pub status_interval_ms: u64,

    /// Print status as JSON instead of a log line
    #[arg(long)]
    pub json_status: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local media file
    Play {
        /// Path or file:// URL of the media
        path: PathBuf,

        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,

        /// Restart from the beginning at end of file
        #[arg(long = "loop")]
        loop_playback: bool,

        /// Discard decoded audio before the start/seek target
        #[arg(long)]
        accurate_seek: bool,

        /// Decode on the reading thread instead of a per-track thread
        #[arg(long)]
        sync_decode: bool,

        /// Container hint when the extension is missing or misleading
        #[arg(long)]
        format: Option<String>,
    },
}
