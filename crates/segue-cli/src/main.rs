//! segue CLI: drives the playback core with simulated inputs.
//!
//! Commands:
//!   segue demo [n]                 Play a playlist of n simulated tracks to the end
//!   segue shuffle [n]              Print one random-order pass over n items
//!   segue worker [tasks] [threads] Run sleeping jobs through the preparse pool
//!
//! Options:
//!   --config <path>                JSON settings file
//!   --repeat <none|current|all>    Playlist repeat mode
//!   --random                       Random playback order

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use segue_core::input::sim::SimFactory;
use segue_core::preparser::{ParseResult, ParseWaker};
use segue_core::{
    Config, Media, MediaMeta, MediaParser, ParseOutcome, PlaybackOrder, PlaybackRepeat, PlayerEvent, PlayerState,
    Playlist, PlaylistEvent, Preparser, Randomizer,
};

fn main() {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config = match take_options(&mut args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            return;
        }
    };
    if args.is_empty() {
        print_usage();
        return;
    }

    match args[0].as_str() {
        "demo" => cmd_demo(&config, &args[1..]),
        "shuffle" => cmd_shuffle(&config, &args[1..]),
        "worker" => cmd_worker(&config, &args[1..]),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
        }
    }
}

/// Strip the options out of `args` and build the settings they describe.
fn take_options(args: &mut Vec<String>) -> Result<Config, String> {
    let mut config = None;
    let mut repeat = None;
    let mut random = false;
    let mut rest = Vec::new();

    let mut iter = args.drain(..);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                config = Some(Config::load(path));
            }
            "--repeat" => {
                let mode = iter.next().ok_or("--repeat needs a mode")?;
                repeat = Some(mode.parse::<PlaybackRepeat>()?);
            }
            "--random" => random = true,
            _ => rest.push(arg),
        }
    }
    drop(iter);
    *args = rest;

    let mut config = config.unwrap_or_default();
    if let Some(repeat) = repeat {
        config.playlist.repeat = repeat;
    }
    if random {
        config.playlist.order = PlaybackOrder::Random;
    }
    Ok(config)
}

fn count_arg(args: &[String], index: usize, default: usize) -> usize {
    args.get(index).and_then(|s| s.parse().ok()).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_demo(config: &Config, args: &[String]) {
    let n = count_arg(args, 0, 3).max(1);
    let factory = SimFactory::new().tick(Duration::from_millis(20)).step_ms(250).length_ms(1_000);
    let playlist = match Playlist::new(config, Arc::new(factory)) {
        Ok(playlist) => playlist,
        Err(e) => {
            eprintln!("cannot create playlist: {}", e);
            return;
        }
    };

    let (tx, rx) = unbounded();
    {
        let mut p = playlist.lock();
        let medias = (0..n)
            .map(|i| {
                let meta = MediaMeta { title: Some(format!("Track {}", i + 1)), ..MediaMeta::default() };
                Media::with_meta(format!("sim://demo/{}", i), meta)
            })
            .collect();
        if let Err(e) = p.append(medias) {
            eprintln!("cannot fill playlist: {}", e);
            return;
        }

        p.add_listener(
            |event, status| {
                if let PlaylistEvent::CurrentIndexChanged(index) = event {
                    println!("{}", serde_json::json!({ "playlist": "current", "index": index, "count": status.count }));
                }
            },
            false,
        );
        p.player().add_listener(move |event| match event {
            PlayerEvent::StateChanged(state) => {
                println!("{}", serde_json::json!({ "player": "state", "state": state }));
                let _ = tx.send(*state);
            }
            PlayerEvent::CurrentMediaChanged(Some(media)) => {
                println!("{}", serde_json::json!({ "player": "media", "title": media.display_name() }));
            }
            PlayerEvent::PositionChanged { time_ms, position, .. } => {
                println!("{}", serde_json::json!({ "player": "position", "time": fmt_time(*time_ms), "position": position }));
            }
            _ => {}
        });

        println!(
            "{}",
            serde_json::json!({ "playlist": "ready", "count": p.count(), "repeat": p.playback_repeat(), "order": p.playback_order() })
        );
        if let Err(e) = p.start() {
            eprintln!("cannot start: {}", e);
            return;
        }
    }

    // Repeat-all never stops on its own: give it a few passes.
    let deadline = Instant::now() + Duration::from_secs(5 * n as u64);
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(PlayerState::Stopped) | Ok(PlayerState::Error) => break,
            Ok(_) => {}
            Err(_) => {
                log::info!("segue: demo time is up, stopping");
                if let Err(e) = playlist.lock().player().stop(true) {
                    log::warn!("segue: stop failed: {}", e);
                }
                break;
            }
        }
    }
}

fn cmd_shuffle(config: &Config, args: &[String]) {
    let n = count_arg(args, 0, 10);
    let mut randomizer = match config.playlist.random_seed {
        Some(seed) => Randomizer::with_seed(seed),
        None => Randomizer::new(),
    };
    randomizer.add(0..n);

    let mut order = Vec::with_capacity(n);
    while let Some(item) = randomizer.next() {
        order.push(item);
    }
    let mut back = Vec::with_capacity(n);
    while let Some(item) = randomizer.prev() {
        back.push(item);
    }
    println!("{}", serde_json::json!({ "order": order, "history": back }));
}

/// A parser that does nothing but take its time.
struct SleepParser {
    delay: Duration,
}

impl MediaParser for SleepParser {
    type Job = Instant;

    fn start(&self, _media: &Media, waker: ParseWaker) -> Option<Instant> {
        let delay = self.delay;
        let due = Instant::now() + delay;
        thread::spawn(move || {
            thread::sleep(delay);
            waker.wake();
        });
        Some(due)
    }

    fn is_done(&self, due: &mut Instant) -> bool {
        Instant::now() >= *due
    }

    fn finish(&self, _due: Instant) -> Option<ParseResult> {
        Some(ParseResult::default())
    }
}

fn cmd_worker(config: &Config, args: &[String]) {
    let tasks = count_arg(args, 0, 8);
    let mut worker = config.worker.clone();
    worker.max_threads = count_arg(args, 1, worker.max_threads).max(1);

    let preparser = Preparser::new(&worker, SleepParser { delay: Duration::from_millis(100) });
    let started = Instant::now();
    let (tx, rx) = unbounded();
    for id in 0..tasks {
        let tx = tx.clone();
        let media = Media::new(format!("sim://job/{}", id));
        let pushed = preparser.push(media, id as u64, None, move |media, outcome| {
            let _ = tx.send((media.uri().to_string(), outcome));
        });
        if let Err(e) = pushed {
            eprintln!("cannot queue job {}: {}", id, e);
        }
    }
    drop(tx);

    for (uri, outcome) in rx.iter() {
        let outcome = match outcome {
            ParseOutcome::Done(_) => "done",
            ParseOutcome::Failed => "failed",
            ParseOutcome::Cancelled => "cancelled",
            ParseOutcome::TimedOut => "timed_out",
        };
        println!(
            "{}",
            serde_json::json!({ "job": uri, "outcome": outcome, "elapsed_ms": started.elapsed().as_millis() as u64 })
        );
    }
    println!(
        "{}",
        serde_json::json!({ "tasks": tasks, "threads": worker.max_threads, "total_ms": started.elapsed().as_millis() as u64 })
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fmt_time(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage() {
    println!("segue - playback core driver");
    println!();
    println!("usage: segue [options] <command> [args]");
    println!();
    println!("commands:");
    println!("  demo [n]                  Play n simulated tracks through the playlist");
    println!("  shuffle [n]               Print a random-order pass over n items");
    println!("  worker [tasks] [threads]  Exercise the background worker pool");
    println!();
    println!("options:");
    println!("  --config <path>           JSON settings file");
    println!("  --repeat <none|current|all>");
    println!("  --random                  Random playback order");
}
