use clap::Parser;
use std::path::PathBuf;

// Decode backend info (compile-time)
#[cfg(feature = "ffmpeg")]
const VIDEO_BACKEND: &str = "playa-ffmpeg 8.0 (static)";
#[cfg(not(feature = "ffmpeg"))]
const VIDEO_BACKEND: &str = "synthetic only (build with --features ffmpeg)";

#[cfg(feature = "cpal")]
const AUDIO_BACKEND: &str = "cpal 0.17";
#[cfg(not(feature = "cpal"))]
const AUDIO_BACKEND: &str = "null (build with --features cpal)";

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Video:  ", VIDEO_BACKEND, "\n",
    "Audio:  ", AUDIO_BACKEND, "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Side-by-side video comparison
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Videos to compare, in panel order (`synthetic:NAME?frames=..` opens a test pattern)
    #[arg(value_name = "VIDEO")]
    pub videos: Vec<PathBuf>,

    /// Additional videos (can be specified multiple times)
    #[arg(long = "videos", value_name = "VIDEO", num_args = 1..)]
    pub more_videos: Vec<PathBuf>,

    /// Comma-separated panel captions, in load order
    #[arg(long = "captions", value_name = "A,B,..")]
    pub captions: Option<String>,

    /// Filter assignment `ID:FILTER[:k=v,..]` (keys: ref=N, all); repeatable
    #[arg(long = "filters", value_name = "SPEC")]
    pub filters: Vec<String>,

    /// Video id whose audio track plays
    #[arg(long = "audio-source", value_name = "ID")]
    pub audio_source: Option<u32>,

    /// Export the comparison grid as PNG frames + WAV into DIR and exit
    #[arg(short = 'e', long = "export", value_name = "DIR")]
    pub export: Option<PathBuf>,

    /// Export width in pixels (height follows the widest source aspect)
    #[arg(long = "export-width", value_name = "PX")]
    pub export_width: Option<usize>,

    /// Export height in pixels
    #[arg(long = "export-height", value_name = "PX")]
    pub export_height: Option<usize>,

    /// Grid rows
    #[arg(long = "rows", value_name = "N")]
    pub rows: Option<usize>,

    /// Start frame number (0-based)
    #[arg(long = "frame", value_name = "N")]
    pub start_frame: Option<usize>,

    /// Playback speed multiplier (0.1 - 10)
    #[arg(long = "speed", value_name = "X")]
    pub speed: Option<f64>,

    /// Auto-play on startup
    #[arg(short = 'a', long = "autoplay")]
    pub autoplay: bool,

    /// Enable debug logging to file (default: vcompare.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Prefetch worker threads (0 = auto)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,
}

impl Args {
    /// Positional and `--videos` paths, in order
    pub fn all_videos(&self) -> Vec<PathBuf> {
        self.videos.iter().chain(self.more_videos.iter()).cloned().collect()
    }

    /// Split `--captions`, keeping empty entries as "use default"
    pub fn caption_list(&self) -> Vec<Option<String>> {
        self.captions
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(|c| Some(c.trim().to_string()).filter(|c| !c.is_empty()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let args = Args::try_parse_from([
            "vcompare",
            "a.mp4",
            "b.mp4",
            "--captions",
            "Ref,,Test",
            "--filters",
            "1:difference_heatmap:ref=0,colormap=HOT",
            "--export",
            "out",
            "--export-width",
            "1920",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.all_videos(), vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")]);
        assert_eq!(
            args.caption_list(),
            vec![Some("Ref".to_string()), None, Some("Test".to_string())]
        );
        assert_eq!(args.filters.len(), 1);
        assert_eq!(args.export, Some(PathBuf::from("out")));
        assert_eq!(args.export_width, Some(1920));
        assert_eq!(args.verbosity, 2);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_log_flag_without_path() {
        let args = Args::try_parse_from(["vcompare", "--log"]).unwrap();
        assert_eq!(args.log_file, Some(None));
    }
}
