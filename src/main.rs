use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, unbounded};
use log::{debug, info, warn};

use vcompare::audio::OutputFactory;
use vcompare::cli::Args;
use vcompare::config::{self, PathConfig, Settings};
use vcompare::core::commands::{self, Command, ParseError, Reply};
use vcompare::core::{Session, SystemClock};
use vcompare::entities::MediaService;
use vcompare::entities::stream::VideoId;
use vcompare::export::{self, ExportOptions, ExportStage, PngSequenceSink};

/// Command loop period; also the playback clock tick
const TICK: Duration = Duration::from_millis(8);

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file(config::LOG_FILE, path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn audio_output() -> OutputFactory {
    #[cfg(feature = "cpal")]
    {
        vcompare::audio::cpal_output::CpalOutput::factory()
    }
    #[cfg(not(feature = "cpal"))]
    {
        vcompare::audio::NullOutput::factory()
    }
}

/// Load videos and apply per-video CLI options
fn setup_session(session: &mut Session, args: &Args) {
    for path in args.all_videos() {
        if let Err(e) = session.load_video(&path) {
            eprintln!("Cannot load {}: {}", path.display(), e);
        }
    }

    let ids: Vec<VideoId> = session.videos().iter().map(|v| v.id).collect();
    for (id, caption) in ids.iter().zip(args.caption_list()) {
        if let Some(text) = caption
            && let Err(e) = session.set_caption(*id, &text)
        {
            warn!("Caption for video {}: {}", id, e);
        }
    }

    for spec in &args.filters {
        let result = commands::parse_filter_spec(spec)
            .map_err(|e| e.to_string())
            .and_then(|(id, assignment)| session.set_filter(id, assignment).map_err(|e| e.to_string()));
        if let Err(e) = result {
            eprintln!("Filter '{}': {}", spec, e);
        }
    }

    if let Some(id) = args.audio_source
        && let Err(e) = session.set_audio_source(Some(VideoId(id)))
    {
        eprintln!("Audio source: {}", e);
    }
    if let Some(frame) = args.start_frame {
        session.scrub_to(frame as f64);
    }
    if let Some(speed) = args.speed {
        session.set_speed(speed);
    }
}

fn run_export(session: &mut Session, args: &Args) -> Result<()> {
    let Some(dir) = args.export.as_ref() else {
        return Ok(());
    };
    let options = ExportOptions {
        width: args.export_width,
        height: args.export_height,
        rows: args.rows,
    };
    let (progress_tx, progress_rx) = unbounded::<export::ExportProgress>();
    let printer = thread::spawn(move || {
        for p in progress_rx {
            if p.stage == ExportStage::Rendering && p.current_frame % 25 != 0 && p.current_frame != p.total_frames {
                continue;
            }
            eprintln!("[{:?}] {}/{}", p.stage, p.current_frame, p.total_frames);
        }
    });

    let mut sink = PngSequenceSink::new(dir);
    let result = export::export(
        session,
        &mut sink,
        &options,
        progress_tx,
        Arc::new(AtomicBool::new(false)),
    );
    let _ = printer.join();
    let frames = result.with_context(|| format!("Export to {} failed", dir.display()))?;
    println!("Exported {} frames to {}", frames, dir.display());
    Ok(())
}

fn print_warnings(session: &mut Session) {
    for w in session.take_warnings() {
        eprintln!("warning: {}", w);
    }
}

/// Line-oriented command loop on stdin, ticking the clock every 8ms.
///
/// Nothing is drawn, but every new position still pulls its frames through
/// the cache so decoding and prefetch run as they would behind a display.
fn run_interactive(session: &mut Session, args: &Args) -> Result<()> {
    let (tx, rx) = unbounded::<Result<Command, ParseError>>();
    thread::Builder::new()
        .name("vcompare-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line.parse()).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    if args.autoplay {
        session.play();
    }
    println!("{}", session.status_text());

    // position whose frames were last pulled through the cache
    let mut shown: Option<usize> = None;
    loop {
        match rx.recv_timeout(TICK) {
            Ok(Ok(cmd)) => {
                debug!("Command: {:?}", cmd);
                // loads, filters and removals change what is on screen
                shown = None;
                match commands::execute(session, cmd) {
                    Ok(Reply::Done) => println!("{}", session.status_text()),
                    Ok(Reply::Text(text)) => println!("{}", text),
                    Ok(Reply::Quit) => break,
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            Ok(Err(e)) => eprintln!("error: {}", e),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let was_playing = session.is_playing();
        session.tick();
        if was_playing && !session.is_playing() {
            println!("{}", session.status_text());
        }

        let position = session.player().display_index();
        if shown != Some(position) && !session.videos().is_empty() {
            session.resolve_frames();
            shown = Some(position);
        }
        print_warnings(session);
    }
    session.pause();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &path_config)?;

    info!("vcompare starting...");
    debug!("Command-line args: {:?}", args);
    info!(
        "Config path: {}",
        config::config_file(config::SETTINGS_FILE, &path_config).display()
    );

    let mut settings = Settings::load_or_default(&path_config);
    if let Some(rows) = args.rows {
        settings.rows = rows.max(1);
    }
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }

    let mut session = Session::new(settings, MediaService::shared(), Arc::new(SystemClock), audio_output());
    setup_session(&mut session, &args);
    print_warnings(&mut session);

    if args.export.is_some() {
        return run_export(&mut session, &args);
    }
    run_interactive(&mut session, &args)
}
