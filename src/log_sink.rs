//! Per-session CSV log.
//!
//! One row per integrated sample:
//!
//! ```text
//! timestamp,qx,qy,qz,qw,ax,ay,az,px,py,pz
//! ```
//!
//! Rows are formatted on the sensor thread and handed to a writer thread
//! through a bounded channel. A full channel or a failing write drops the row;
//! the pipeline never waits on the disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam::channel::{bounded, Sender, TrySendError};
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::math;
use crate::sensor_fusion::{FusionOutput, SensorFusion};
use crate::types::{Quat, Sample, Vec3};

pub const HEADER: &str = "timestamp,qx,qy,qz,qw,ax,ay,az,px,py,pz";

/// Rows buffered between the sensor thread and the writer.
const CHANNEL_CAPACITY: usize = 1024;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Session identifier used in log file names. Unique within the process even
/// for sessions started in the same millisecond.
pub fn session_id_now() -> String {
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}_{:03}", Utc::now().format("%Y%m%d_%H%M%S_%3f"), seq % 1000)
}

pub fn log_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("session_{}.csv", session_id))
}

/// Format one row with six decimals per field, no trailing newline.
pub fn format_row(timestamp: f64, attitude: &Quat, user_accel: &Vec3, position: &Vec3) -> String {
    let [qx, qy, qz, qw] = math::quat_to_xyzw(attitude);
    format!(
        "{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
        timestamp,
        qx,
        qy,
        qz,
        qw,
        user_accel.x,
        user_accel.y,
        user_accel.z,
        position.x,
        position.y,
        position.z
    )
}

pub struct CsvLogSink {
    path: PathBuf,
    tx: Option<Sender<String>>,
    writer: Option<JoinHandle<u64>>,
    dropped: u64,
}

impl CsvLogSink {
    /// Open (or create) `session_<id>.csv` under `dir` and start the writer.
    /// The header goes in only when the file is empty.
    pub fn create(dir: impl AsRef<Path>, session_id: &str) -> TrackerResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| TrackerError::LogSink(e.to_string()))?;
        let path = log_path(dir, session_id);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrackerError::LogSink(format!("{}: {}", path.display(), e)))?;
        let empty = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|e| TrackerError::LogSink(e.to_string()))?;

        let mut out = BufWriter::new(file);
        if empty {
            writeln!(out, "{}", HEADER).map_err(|e| TrackerError::LogSink(e.to_string()))?;
        }

        let (tx, rx) = bounded::<String>(CHANNEL_CAPACITY);
        let writer = thread::Builder::new()
            .name("csv-log".to_string())
            .spawn(move || {
                let mut written = 0u64;
                let mut failed = false;
                for row in rx {
                    if failed {
                        continue;
                    }
                    if writeln!(out, "{}", row).is_err() {
                        debug!("[log] write failed, dropping remaining rows");
                        failed = true;
                        continue;
                    }
                    written += 1;
                }
                let _ = out.flush();
                written
            })
            .map_err(|e| TrackerError::LogSink(e.to_string()))?;

        info!("[log] writing {}", path.display());
        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
            dropped: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows dropped because the writer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Queue a row without blocking.
    pub fn append(&mut self, timestamp: f64, attitude: &Quat, user_accel: &Vec3, position: &Vec3) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(format_row(timestamp, attitude, user_accel, position)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped % 100 == 1 {
                    debug!("[log] writer behind, {} rows dropped", self.dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
            }
        }
    }

    /// Flush everything queued and close the file. Returns rows written.
    pub fn close(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.tx.take();
        match self.writer.take().map(|handle| handle.join()) {
            Some(Ok(written)) => {
                info!("[log] closed {} ({} rows)", self.path.display(), written);
                written
            }
            Some(Err(_)) => {
                warn!("[log] writer thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for CsvLogSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Reading logs back ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: f64,
    pub attitude: [f64; 4],
    pub user_accel: [f64; 3],
    pub position: [f64; 3],
}

impl LogRecord {
    /// The sample this row was produced from. The logged attitude is the
    /// calibrated one.
    pub fn to_sample(&self) -> Sample {
        Sample::from_raw(self.timestamp, self.attitude, self.user_accel)
    }
}

/// The unlogged first sample of a session: it only seeded the timestamp, so
/// it sits one interval before the first row. The interval is taken from the
/// first two rows, or `fallback_interval` for a single-row log.
pub fn seed_sample(records: &[LogRecord], fallback_interval: f64) -> Option<Sample> {
    let first = records.first()?;
    let interval = match records.get(1) {
        Some(second) if second.timestamp > first.timestamp => second.timestamp - first.timestamp,
        _ => fallback_interval,
    };
    Some(Sample::from_raw(
        first.timestamp - interval,
        first.attitude,
        [0.0, 0.0, 0.0],
    ))
}

/// Run logged rows back through a fresh pipeline. `on_row` sees each row with
/// the pipeline output and state right after it.
pub fn replay_records<F>(records: &[LogRecord], config: &TrackerConfig, mut on_row: F) -> SensorFusion
where
    F: FnMut(&LogRecord, &FusionOutput, &SensorFusion),
{
    let mut fusion = SensorFusion::new(config.clone());
    fusion.start_session();
    if let Some(seed) = seed_sample(records, config.sample_interval().as_secs_f64()) {
        fusion.feed_sample(&seed);
    }
    for record in records {
        let output = fusion.feed_sample(&record.to_sample());
        on_row(record, &output, &fusion);
    }
    fusion
}

fn parse_record(line: &str) -> Option<LogRecord> {
    let fields: Vec<f64> = line
        .split(',')
        .map(|f| f.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() != 11 {
        return None;
    }
    Some(LogRecord {
        timestamp: fields[0],
        attitude: [fields[1], fields[2], fields[3], fields[4]],
        user_accel: [fields[5], fields[6], fields[7]],
        position: [fields[8], fields[9], fields[10]],
    })
}

/// Read a session log, plain or gzipped (`.gz`). Header lines and rows that
/// do not parse are skipped.
pub fn read_log(path: impl AsRef<Path>) -> TrackerResult<Vec<LogRecord>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in BufReader::new(reader).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line == HEADER {
            continue;
        }
        match parse_record(line) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("[log] skipped {} malformed rows in {}", skipped, path.display());
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pose_tracker_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_format_row_six_decimals() {
        let row = format_row(
            1.5,
            &Quat::identity(),
            &Vec3::new(0.1, -0.2, 0.0),
            &Vec3::new(1.0, 0.0, -0.8),
        );
        assert_eq!(
            row,
            "1.500000,0.000000,0.000000,0.000000,1.000000,0.100000,-0.200000,0.000000,1.000000,0.000000,-0.800000"
        );
    }

    #[test]
    fn test_log_path_uses_session_id() {
        let path = log_path(Path::new("/tmp/logs"), "20240101_120000");
        assert_eq!(path, PathBuf::from("/tmp/logs/session_20240101_120000.csv"));
        assert_ne!(session_id_now(), session_id_now());
    }

    #[test]
    fn test_header_once_and_rows_appended() {
        let dir = scratch_dir("log_append");
        let mut sink = CsvLogSink::create(&dir, "s1").unwrap();
        for i in 0..3 {
            sink.append(i as f64, &Quat::identity(), &Vec3::zeros(), &Vec3::zeros());
        }
        assert_eq!(sink.close(), 3);

        // Reopening the same session appends without a second header.
        let mut sink = CsvLogSink::create(&dir, "s1").unwrap();
        sink.append(3.0, &Quat::identity(), &Vec3::zeros(), &Vec3::zeros());
        let path = sink.path().to_path_buf();
        drop(sink);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.iter().filter(|l| **l == HEADER).count(), 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_read_log_back() {
        let dir = scratch_dir("log_read");
        let mut sink = CsvLogSink::create(&dir, "s2").unwrap();
        let attitude = Quat::from_euler_angles(0.1, 0.2, 0.3);
        sink.append(0.25, &attitude, &Vec3::new(0.5, 0.0, -0.5), &Vec3::new(0.0, 0.1, 0.0));
        let path = sink.path().to_path_buf();
        sink.close();

        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.timestamp, 0.25);
        assert_eq!(record.user_accel, [0.5, 0.0, -0.5]);
        let sample = record.to_sample();
        assert!(sample.attitude.angle_to(&attitude) < 1e-5);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_read_gzipped_log() {
        let dir = scratch_dir("log_gz");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        writeln!(encoder, "{}", HEADER).unwrap();
        writeln!(encoder, "0.000000,0,0,0,1,0,0,0,0,0,0").unwrap();
        writeln!(encoder, "garbage").unwrap();
        writeln!(encoder, "0.016000,0,0,0,1,0.1,0,0,0,0,0").unwrap();
        encoder.finish().unwrap();

        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].user_accel[0], 0.1);
        let _ = fs::remove_dir_all(&dir);
    }

    fn record(timestamp: f64, accel_x: f64) -> LogRecord {
        LogRecord {
            timestamp,
            attitude: [0.0, 0.0, 0.0, 1.0],
            user_accel: [accel_x, 0.0, 0.0],
            position: [0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn test_seed_sample_sits_one_interval_early() {
        let records = [record(1.0, 0.3), record(1.02, 0.3)];
        let seed = seed_sample(&records, 0.5).unwrap();
        assert!((seed.timestamp - 0.98).abs() < 1e-12);
        assert_eq!(seed.user_accel, Vec3::zeros());

        let single = seed_sample(&records[..1], 0.5).unwrap();
        assert_eq!(single.timestamp, 0.5);
        assert!(seed_sample(&[], 0.5).is_none());
    }

    #[test]
    fn test_replay_integrates_first_row() {
        let records = [record(1.0, 0.3), record(1.02, 0.3)];
        let mut integrated = Vec::new();
        replay_records(&records, &TrackerConfig::default(), |_, output, _| {
            integrated.push(output.report.integrated);
        });
        assert_eq!(integrated, vec![true, true]);
    }

    #[test]
    fn test_unwritable_dir_is_log_sink_error() {
        let dir = scratch_dir("log_blocked");
        fs::create_dir_all(dir.parent().unwrap()).unwrap();
        // A regular file where the directory should be.
        fs::write(&dir, b"not a dir").unwrap();
        let result = CsvLogSink::create(&dir, "s3");
        let _ = fs::remove_file(&dir);
        assert!(matches!(result, Err(TrackerError::LogSink(_))));
    }
}
