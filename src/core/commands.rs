//! Text command API for the interactive loop
//!
//! Lines read from stdin parse into [`Command`], travel over a channel to the
//! thread that owns the [`Session`], and run there through [`execute`].
//!
//! ```text
//! load PATH | remove ID | clear | caption ID TEXT
//! filter ID:FILTER[:k=v,...]   (keys: ref=N, all)
//! unfilter [ID] | audio ID|off
//! play | pause | toggle | scrub N | step [+-N] | speed X
//! select X0 Y0 X1 Y1 [ID] | zoom X Y STEPS [ID] | pan DX DY [ID] | reset
//! rows N | status | filters | warnings | snapshot FILE | quit
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use glam::DVec2;
use serde::Serialize;

use crate::core::session::{CommandError, LoadError, Session};
use crate::entities::filters::{FilterAssignment, FilterInfo};
use crate::entities::stream::VideoId;
use crate::entities::viewport::Roi;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load(PathBuf),
    Remove(VideoId),
    Clear,
    Caption(VideoId, String),
    Filter(VideoId, FilterAssignment),
    /// None clears every filter
    Unfilter(Option<VideoId>),
    /// None mutes audio
    Audio(Option<VideoId>),
    Play,
    Pause,
    Toggle,
    Scrub(f64),
    Step(i64),
    Speed(f64),
    /// Gestures carry the panel they happened on (None = first video)
    Select { panel: Option<VideoId>, start: DVec2, end: DVec2 },
    Zoom { panel: Option<VideoId>, cursor: DVec2, steps: f64 },
    Pan { panel: Option<VideoId>, delta: DVec2 },
    Reset,
    Rows(usize),
    Status,
    Filters,
    Warnings,
    Snapshot(PathBuf),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

fn arg<T: FromStr>(args: &[&str], i: usize, what: &str) -> Result<T, ParseError> {
    let raw = args
        .get(i)
        .ok_or_else(|| ParseError(format!("missing {}", what)))?;
    raw.parse()
        .map_err(|_| ParseError(format!("invalid {} '{}'", what, raw)))
}

/// Like `arg`, but rejects NaN and infinities (which `f64::from_str` accepts)
fn num(args: &[&str], i: usize, what: &str) -> Result<f64, ParseError> {
    let value: f64 = arg(args, i, what)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ParseError(format!("invalid {} '{}'", what, args[i])))
    }
}

fn video_id(raw: &str) -> Result<VideoId, ParseError> {
    raw.trim()
        .parse()
        .map(VideoId)
        .map_err(|_| ParseError(format!("invalid video id '{}'", raw)))
}

fn optional_panel(args: &[&str], i: usize) -> Result<Option<VideoId>, ParseError> {
    args.get(i).map(|raw| video_id(raw)).transpose()
}

/// Parse `ID:FILTER[:k=v,k=v]`.
///
/// `ref=N` sets the reference video, a bare `all` (or `all=1`) applies the
/// filter to every video except the reference; other keys are parameters.
pub fn parse_filter_spec(spec: &str) -> Result<(VideoId, FilterAssignment), ParseError> {
    let mut parts = spec.trim().splitn(3, ':');
    let id = video_id(parts.next().unwrap_or_default())?;
    let filter_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError(format!("missing filter id in '{}'", spec)))?;

    let mut assignment = FilterAssignment::new(filter_id.trim());
    for pair in parts.next().unwrap_or_default().split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, "1"));
        match key.trim() {
            "ref" => assignment.reference = Some(video_id(value)?),
            "all" => assignment.apply_to_all_except_reference = matches!(value.trim(), "1" | "true" | "yes"),
            key => {
                assignment.params.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    Ok((id, assignment))
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        let cmd = match name.to_ascii_lowercase().as_str() {
            "load" | "open" if !rest.is_empty() => Command::Load(PathBuf::from(rest)),
            "remove" | "rm" => Command::Remove(video_id(args.first().copied().unwrap_or_default())?),
            "clear" => Command::Clear,
            "caption" => {
                let (id, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                Command::Caption(video_id(id)?, text.trim().to_string())
            }
            "filter" => {
                let (id, assignment) = parse_filter_spec(rest)?;
                Command::Filter(id, assignment)
            }
            "unfilter" => Command::Unfilter(optional_panel(&args, 0)?),
            "audio" => match args.first() {
                Some(&"off") | Some(&"none") => Command::Audio(None),
                _ => Command::Audio(Some(video_id(args.first().copied().unwrap_or_default())?)),
            },
            "play" => Command::Play,
            "pause" => Command::Pause,
            "toggle" | "space" => Command::Toggle,
            "scrub" | "seek" | "frame" => Command::Scrub(num(&args, 0, "frame index")?),
            "step" => Command::Step(if args.is_empty() { 1 } else { arg(&args, 0, "step")? }),
            "next" => Command::Step(1),
            "prev" => Command::Step(-1),
            "speed" => Command::Speed(num(&args, 0, "speed")?),
            "select" => Command::Select {
                start: DVec2::new(num(&args, 0, "x0")?, num(&args, 1, "y0")?),
                end: DVec2::new(num(&args, 2, "x1")?, num(&args, 3, "y1")?),
                panel: optional_panel(&args, 4)?,
            },
            "zoom" => Command::Zoom {
                cursor: DVec2::new(num(&args, 0, "x")?, num(&args, 1, "y")?),
                steps: num(&args, 2, "steps")?,
                panel: optional_panel(&args, 3)?,
            },
            "pan" => Command::Pan {
                delta: DVec2::new(num(&args, 0, "dx")?, num(&args, 1, "dy")?),
                panel: optional_panel(&args, 2)?,
            },
            "reset" => Command::Reset,
            "rows" => Command::Rows(arg(&args, 0, "rows")?),
            "status" => Command::Status,
            "filters" => Command::Filters,
            "warnings" => Command::Warnings,
            "snapshot" if !rest.is_empty() => Command::Snapshot(PathBuf::from(rest)),
            "quit" | "exit" | "q" => Command::Quit,
            "" => return Err(ParseError("empty command".into())),
            other => return Err(ParseError(format!("unknown command '{}'", other))),
        };
        Ok(cmd)
    }
}

/// JSON-serializable view of the session for `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub frame: f64,
    pub playing: bool,
    pub speed: f64,
    pub max_frame_count: usize,
    pub roi: Roi,
    pub audio_source: Option<VideoId>,
    pub videos: Vec<VideoSnapshot>,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoSnapshot {
    pub id: VideoId,
    pub caption: String,
    pub displayed_index: usize,
    pub frame_count: usize,
    pub filter: Option<String>,
    pub seeks: u64,
    pub sequential_reads: u64,
}

pub fn snapshot(session: &Session) -> StatusSnapshot {
    let videos = session
        .videos()
        .iter()
        .map(|v| {
            let stats = session.cache().decode_stats(v.id).unwrap_or_default();
            VideoSnapshot {
                id: v.id,
                caption: session.caption(v.id).unwrap_or_default().to_string(),
                displayed_index: session.displayed_index(v.id).unwrap_or(0),
                frame_count: v.frame_count,
                filter: session.filter_assignment(v.id).map(|a| a.filter_id.clone()),
                seeks: stats.seeks,
                sequential_reads: stats.sequential_reads,
            }
        })
        .collect();
    StatusSnapshot {
        status: session.status_text(),
        frame: session.current_frame_index(),
        playing: session.is_playing(),
        speed: session.player().speed(),
        max_frame_count: session.player().max_frame_count(),
        roi: session.roi(),
        audio_source: session.audio_source(),
        videos,
        cache_hit_rate: session.cache_stats().hit_rate(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Text(String),
    Quit,
}

#[derive(Debug)]
pub enum ExecError {
    Load(LoadError),
    Command(CommandError),
    NoVideos,
    Snapshot(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Load(e) => write!(f, "{}", e),
            ExecError::Command(e) => write!(f, "{}", e),
            ExecError::NoVideos => write!(f, "No videos loaded"),
            ExecError::Snapshot(msg) => write!(f, "Snapshot failed: {}", msg),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<LoadError> for ExecError {
    fn from(e: LoadError) -> Self {
        ExecError::Load(e)
    }
}

impl From<CommandError> for ExecError {
    fn from(e: CommandError) -> Self {
        ExecError::Command(e)
    }
}

fn panel_or_first(session: &Session, panel: Option<VideoId>) -> Result<VideoId, ExecError> {
    panel
        .or_else(|| session.videos().first().map(|v| v.id))
        .ok_or(ExecError::NoVideos)
}

fn format_filters(list: &[FilterInfo]) -> String {
    list.iter()
        .map(|f| {
            format!(
                "{} ({}){}",
                f.id,
                f.name,
                if f.requires_reference { " [needs ref]" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run one command against the session
pub fn execute(session: &mut Session, cmd: Command) -> Result<Reply, ExecError> {
    match cmd {
        Command::Load(path) => {
            let id = session.load_video(&path)?;
            return Ok(Reply::Text(format!("loaded {} as video {}", path.display(), id)));
        }
        Command::Remove(id) => session.remove_video(id)?,
        Command::Clear => session.clear_videos(),
        Command::Caption(id, text) => session.set_caption(id, &text)?,
        Command::Filter(id, assignment) => {
            let targets = session.set_filter(id, assignment)?;
            let ids: Vec<String> = targets.iter().map(|v| v.to_string()).collect();
            return Ok(Reply::Text(format!("filter set on {}", ids.join(", "))));
        }
        Command::Unfilter(id) => session.clear_filter(id)?,
        Command::Audio(id) => session.set_audio_source(id)?,
        Command::Play => {
            session.play();
        }
        Command::Pause => {
            session.pause();
        }
        Command::Toggle => {
            session.toggle_play();
        }
        Command::Scrub(index) => {
            session.scrub_to(index);
        }
        Command::Step(delta) => {
            session.step(delta);
        }
        Command::Speed(speed) => {
            session.set_speed(speed);
        }
        Command::Select { panel, start, end } => {
            let panel = panel_or_first(session, panel)?;
            session.drag_select_roi(panel, start, end)?;
        }
        Command::Zoom { panel, cursor, steps } => {
            let panel = panel_or_first(session, panel)?;
            session.wheel_zoom(panel, cursor, steps)?;
        }
        Command::Pan { panel, delta } => {
            let panel = panel_or_first(session, panel)?;
            session.pan_roi(panel, delta)?;
        }
        Command::Reset => session.reset_roi(),
        Command::Rows(rows) => session.set_rows(rows),
        Command::Status => {
            let json = serde_json::to_string(&snapshot(session)).unwrap_or_else(|_| session.status_text());
            return Ok(Reply::Text(json));
        }
        Command::Filters => return Ok(Reply::Text(format_filters(&session.filter_registry().list()))),
        Command::Warnings => return Ok(Reply::Text(session.take_warnings().join("\n"))),
        Command::Snapshot(path) => {
            let frame = session.composite().ok_or(ExecError::NoVideos)?;
            frame
                .to_image()
                .save(&path)
                .map_err(|e| ExecError::Snapshot(e.to_string()))?;
            return Ok(Reply::Text(format!("saved {}", path.display())));
        }
        Command::Quit => return Ok(Reply::Quit),
    }
    Ok(Reply::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemoryOutput;
    use crate::config::Settings;
    use crate::core::clock::ManualClock;
    use crate::entities::synthetic::SyntheticService;
    use std::sync::Arc;

    fn session() -> Session {
        Session::with_workers(
            Settings {
                panel_height: 36,
                ..Settings::default()
            },
            Arc::new(SyntheticService::new()),
            Arc::new(ManualClock::new()),
            MemoryOutput::new().factory(),
            None,
        )
    }

    #[test]
    fn test_parse_transport() {
        assert_eq!("play".parse::<Command>(), Ok(Command::Play));
        assert_eq!(" scrub 42 ".parse::<Command>(), Ok(Command::Scrub(42.0)));
        assert_eq!("step".parse::<Command>(), Ok(Command::Step(1)));
        assert_eq!("step -1".parse::<Command>(), Ok(Command::Step(-1)));
        assert_eq!("speed 0.5".parse::<Command>(), Ok(Command::Speed(0.5)));
        assert!("speed fast".parse::<Command>().is_err());
        assert!("scrub NaN".parse::<Command>().is_err());
        assert!("scrub inf".parse::<Command>().is_err());
        assert!("zoom 10 NaN 1".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[test]
    fn test_parse_gestures() {
        assert_eq!(
            "zoom 10 20 -2 1".parse::<Command>(),
            Ok(Command::Zoom {
                panel: Some(VideoId(1)),
                cursor: DVec2::new(10.0, 20.0),
                steps: -2.0
            })
        );
        assert_eq!(
            "pan 5 0".parse::<Command>(),
            Ok(Command::Pan {
                panel: None,
                delta: DVec2::new(5.0, 0.0)
            })
        );
        assert!("select 0 0 10".parse::<Command>().is_err());
    }

    #[test]
    fn test_parse_caption_keeps_spaces() {
        assert_eq!(
            "caption 2 Reference  cut".parse::<Command>(),
            Ok(Command::Caption(VideoId(2), "Reference  cut".into()))
        );
    }

    #[test]
    fn test_parse_filter_spec() {
        let (id, a) = parse_filter_spec("1:difference_heatmap:ref=0,colormap=HOT,all").unwrap();
        assert_eq!(id, VideoId(1));
        assert_eq!(a.filter_id, "difference_heatmap");
        assert_eq!(a.reference, Some(VideoId(0)));
        assert!(a.apply_to_all_except_reference);
        assert_eq!(a.params.get("colormap").map(String::as_str), Some("HOT"));

        let (_, a) = parse_filter_spec("0:brightness_contrast").unwrap();
        assert!(a.params.is_empty());
        assert!(parse_filter_spec("0").is_err());
        assert!(parse_filter_spec("x:brightness_contrast").is_err());
    }

    #[test]
    fn test_execute_roundtrip() {
        let mut s = session();
        let reply = execute(&mut s, "load synthetic:a?frames=20&fps=30&w=64&h=36".parse().unwrap()).unwrap();
        assert_eq!(
            reply,
            Reply::Text("loaded synthetic:a?frames=20&fps=30&w=64&h=36 as video 0".to_string())
        );
        execute(&mut s, "scrub 7".parse().unwrap()).unwrap();
        execute(&mut s, "zoom 32 18 2".parse().unwrap()).unwrap();
        assert!(!s.roi().is_full());
        execute(&mut s, "reset".parse().unwrap()).unwrap();
        assert!(s.roi().is_full());

        let Reply::Text(json) = execute(&mut s, Command::Status).unwrap() else {
            panic!("status returns text");
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["frame"], 7.0);
        assert_eq!(value["videos"][0]["displayed_index"], 7);

        assert!(matches!(
            execute(&mut s, Command::Remove(VideoId(9))),
            Err(ExecError::Command(CommandError::UnknownVideo(_)))
        ));
        assert_eq!(execute(&mut s, Command::Quit).unwrap(), Reply::Quit);
    }

    #[test]
    fn test_gesture_without_videos() {
        let mut s = session();
        assert!(matches!(execute(&mut s, Command::Reset), Ok(Reply::Done)));
        assert!(matches!(
            execute(&mut s, "pan 1 1".parse().unwrap()),
            Err(ExecError::NoVideos)
        ));
    }
}
