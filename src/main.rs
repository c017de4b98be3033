use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use tokio::time::{interval, Duration, Instant};

use pose_tracker_rs::feedback::LogFeedback;
use pose_tracker_rs::math;
use pose_tracker_rs::{RunState, SessionController, SimulatedSource, Snapshot, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "pose_tracker")]
#[command(about = "Live pose tracking against a simulated motion sensor", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "10")]
    duration: u64,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sensor update rate (10-120 Hz)
    #[arg(long)]
    sample_hz: Option<f64>,

    /// Orientation smoothing (0-0.98)
    #[arg(long)]
    smoothing: Option<f64>,

    /// Fraction of velocity removed per sample (0-0.1)
    #[arg(long)]
    damping: Option<f64>,

    /// Speed limit in m/s (1-20)
    #[arg(long)]
    max_speed: Option<f64>,

    /// Per-axis position limit in meters (0.5-10)
    #[arg(long)]
    max_range: Option<f64>,

    /// Write a per-session CSV log
    #[arg(long)]
    log: bool,

    /// Directory for session logs (implies --log)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Disable saturation pulses
    #[arg(long)]
    no_haptics: bool,

    /// Hide the position trail
    #[arg(long)]
    no_trails: bool,

    /// Calibrate to the device pose after this many seconds
    #[arg(long)]
    calibrate_after: Option<f64>,

    /// Rewrite this file with the latest snapshot once per second
    #[arg(long)]
    snapshot_json: Option<PathBuf>,
}

impl Args {
    fn tracker_config(&self) -> Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => TrackerConfig::default(),
        };
        if let Some(v) = self.sample_hz {
            config.sample_hz = v;
        }
        if let Some(v) = self.smoothing {
            config.smoothing = v;
        }
        if let Some(v) = self.damping {
            config.damping = v;
        }
        if let Some(v) = self.max_speed {
            config.max_speed = v;
        }
        if let Some(v) = self.max_range {
            config.max_range = v;
        }
        if self.log || self.log_dir.is_some() {
            config.logging_enabled = true;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir.clone();
        }
        if self.no_haptics {
            config.haptics_enabled = false;
        }
        if self.no_trails {
            config.show_trails = false;
        }
        Ok(config.sanitized())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.tracker_config()?;

    println!("[{}] Pose Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=until Ctrl-C)", args.duration);
    println!("  Sample rate: {:.0} Hz", config.sample_hz);
    println!(
        "  Limits: {:.1} m/s, ±{:.2} m, damping {:.3}",
        config.max_speed, config.max_range, config.damping
    );
    println!("  Smoothing: {:.2}", config.smoothing);
    println!("  Logging: {}", config.logging_enabled);

    let mut controller = SessionController::new(config, Box::new(SimulatedSource::new()))
        .with_feedback(Arc::new(LogFeedback));
    let mut snapshots = controller.subscribe();
    controller.start()?;
    if let Some(path) = controller.log_path()? {
        println!("  Log file: {}", path.display());
    }

    let start = Instant::now();
    let deadline = (args.duration > 0).then(|| start + Duration::from_secs(args.duration));
    let mut calibrate_at = args.calibrate_after.map(|s| start + Duration::from_secs_f64(s.max(0.0)));
    let mut status_tick = interval(Duration::from_secs(1));
    let mut frames = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = status_tick.tick() => {
                let snapshot = controller.latest();
                print_status(&snapshot);
                if let Some(path) = &args.snapshot_json {
                    if let Err(e) = snapshot.save(path) {
                        warn!("snapshot write failed: {}", e);
                    }
                }
                if snapshot.state == RunState::Idle {
                    println!("[{}] Session ended: {}", ts_now(), snapshot.status);
                    break;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                frames += 1;
            }
        }

        let now = Instant::now();
        if let Some(at) = calibrate_at {
            if now >= at {
                if controller.calibrate()? {
                    println!("[{}] Calibrated to current pose", ts_now());
                }
                calibrate_at = None;
            }
        }
        if deadline.map_or(false, |d| now >= d) {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }
    }

    let final_snapshot = controller.latest();
    controller.stop()?;

    println!("\n=== Final Stats ===");
    println!("Samples: {}", final_snapshot.sample_count);
    println!("Frames observed: {}", frames);
    println!(
        "Position: ({:+.3}, {:+.3}, {:+.3}) m",
        final_snapshot.position.x, final_snapshot.position.y, final_snapshot.position.z
    );
    println!("Speed: {:.3} m/s", final_snapshot.velocity.norm());
    if let Some(path) = &args.snapshot_json {
        final_snapshot.save(path)?;
    }

    Ok(())
}

fn print_status(snapshot: &Snapshot) {
    let [qx, qy, qz, qw] = math::quat_to_xyzw(&snapshot.orientation);
    println!(
        "[{}] {} | n={} | q=({:+.3},{:+.3},{:+.3},{:+.3}) | p=({:+.3},{:+.3},{:+.3}) m | |v|={:.3} m/s | lat={:.1} ms{}",
        ts_now(),
        snapshot.status,
        snapshot.sample_count,
        qx,
        qy,
        qz,
        qw,
        snapshot.position.x,
        snapshot.position.y,
        snapshot.position.z,
        snapshot.velocity.norm(),
        snapshot.sample_latency_ms,
        if snapshot.saturated { " | SAT" } else { "" }
    );
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
