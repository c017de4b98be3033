use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;

use pose_tracker_rs::feedback::FeedbackGate;
use pose_tracker_rs::log_sink::{self, LogRecord};
use pose_tracker_rs::{FusionEvent, SensorFusion, TrackerConfig};

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.csv[.gz] log
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of session logs to batch replay (processes session_*.csv[.gz])
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Orientation smoothing override
    #[arg(long)]
    smoothing: Option<f64>,

    /// Damping override
    #[arg(long)]
    damping: Option<f64>,

    /// Speed limit override (m/s)
    #[arg(long)]
    max_speed: Option<f64>,

    /// Range limit override (m)
    #[arg(long)]
    max_range: Option<f64>,

    /// Include the full snapshot (trail included) in the output
    #[arg(long, default_value_t = false)]
    full: bool,
}

#[derive(Default)]
struct ReplayStats {
    samples: usize,
    speed_clamps: usize,
    range_clamps: usize,
    brakes: usize,
    resets: usize,
    pulses: usize,
    /// Largest distance between the logged position and the replayed one.
    max_position_diff: f64,
}

fn replay(records: &[LogRecord], config: &TrackerConfig) -> (SensorFusion, ReplayStats) {
    let mut gate = FeedbackGate::new(config.haptic_interval_secs);
    let mut stats = ReplayStats::default();

    let fusion = log_sink::replay_records(records, config, |record, output, fusion| {
        stats.samples += 1;
        for event in &output.events {
            match event {
                FusionEvent::SpeedClamped { .. } => stats.speed_clamps += 1,
                FusionEvent::RangeClamped { .. } => stats.range_clamps += 1,
                FusionEvent::BoundaryBrake { .. } => stats.brakes += 1,
                FusionEvent::VelocityReset | FusionEvent::FilterReset => stats.resets += 1,
            }
        }
        if output.saturated() && gate.ready_and_touch(record.timestamp) {
            stats.pulses += 1;
        }
        let p = fusion.position();
        let diff = ((p.x - record.position[0]).powi(2)
            + (p.y - record.position[1]).powi(2)
            + (p.z - record.position[2]).powi(2))
        .sqrt();
        if diff.is_finite() {
            stats.max_position_diff = stats.max_position_diff.max(diff);
        }
    });
    (fusion, stats)
}

fn replay_file(path: &Path, config: &TrackerConfig, full: bool) -> Result<serde_json::Value> {
    let records = log_sink::read_log(path).with_context(|| format!("reading {}", path.display()))?;
    let (fusion, stats) = replay(&records, config);
    let snapshot = fusion.snapshot("Replay", 0.0);

    let mut out = json!({
        "log": path.display().to_string(),
        "samples": stats.samples,
        "speed_clamps": stats.speed_clamps,
        "range_clamps": stats.range_clamps,
        "boundary_brakes": stats.brakes,
        "resets": stats.resets,
        "feedback_pulses": stats.pulses,
        "max_position_diff_m": stats.max_position_diff,
        "final_position": [snapshot.position.x, snapshot.position.y, snapshot.position.z],
        "final_velocity": [snapshot.velocity.x, snapshot.velocity.y, snapshot.velocity.z],
    });
    if full {
        out["snapshot"] = serde_json::to_value(&snapshot)?;
    }
    Ok(out)
}

fn is_session_log(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.starts_with("session_") && (name.ends_with(".csv") || name.ends_with(".csv.gz"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(v) = args.smoothing {
        config.smoothing = v;
    }
    if let Some(v) = args.damping {
        config.damping = v;
    }
    if let Some(v) = args.max_speed {
        config.max_speed = v;
    }
    if let Some(v) = args.max_range {
        config.max_range = v;
    }
    let config = config.sanitized();

    let paths: Vec<PathBuf> = match (&args.log, &args.log_dir) {
        (Some(log), _) => vec![log.clone()],
        (None, Some(dir)) => {
            let mut paths: Vec<PathBuf> = fs::read_dir(dir)
                .with_context(|| format!("listing {}", dir.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_session_log(p))
                .collect();
            paths.sort();
            paths
        }
        (None, None) => bail!("pass --log <file> or --log-dir <dir>"),
    };

    let mut results = Vec::with_capacity(paths.len());
    for path in &paths {
        results.push(replay_file(path, &config, args.full)?);
    }

    let output = if results.len() == 1 {
        results.remove(0)
    } else {
        json!({ "logs": results })
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
