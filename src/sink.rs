//! Destinations for decoded samples
//!
//! A sink receives samples one at a time in arrival order and is closed
//! exactly once when its capture session ends, whatever the reason.

use crate::error::{Mpu6050Error, Result};
use crate::sample::Sample;
use log::{error, info};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

/// Upper bound on `_N` suffixes tried for one timestamp
const MAX_NAME_SUFFIX: u32 = 1000;

/// Local-time capture name `mpu6050_YYYYmmdd-HHMMSS` for a session starting now
pub(crate) fn timestamped_stem() -> String {
    chrono::Local::now().format("mpu6050_%Y%m%d-%H%M%S").to_string()
}

/// `stem.ext`, then `stem_1.ext`, `stem_2.ext`, ...
fn candidate_path(dir: &Path, stem: &str, ext: &str, suffix: u32) -> PathBuf {
    if suffix == 0 {
        dir.join(format!("{}.{}", stem, ext))
    } else {
        dir.join(format!("{}_{}.{}", stem, suffix, ext))
    }
}

/// Create a new file in `dir` without touching existing ones.
///
/// `create` must fail with `AlreadyExists` when the path is taken; the next
/// suffix is tried in that case.
pub(crate) fn create_unique<R>(
    dir: &Path,
    stem: &str,
    ext: &str,
    mut create: impl FnMut(&Path) -> Result<R>,
) -> Result<(R, PathBuf)> {
    for suffix in 0..MAX_NAME_SUFFIX {
        let path = candidate_path(dir, stem, ext, suffix);
        match create(&path) {
            Ok(created) => return Ok((created, path)),
            Err(Mpu6050Error::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(Mpu6050Error::Sink(format!(
        "no free file name for {} in {}",
        stem,
        dir.display()
    )))
}

/// Append-only consumer of decoded samples
pub trait SampleSink: Send {
    fn accept(&mut self, sample: &Sample) -> Result<()>;

    /// Flush and release resources. Called once per session.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        (**self).accept(sample)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Owns a sink for one session and closes it exactly once.
///
/// If the session unwinds before [`SinkGuard::close`] runs, the sink is
/// closed on drop and any error is logged.
pub(crate) struct SinkGuard<S: SampleSink> {
    sink: S,
    closed: bool,
}

impl<S: SampleSink> SinkGuard<S> {
    pub(crate) fn new(sink: S) -> Self {
        Self { sink, closed: false }
    }

    pub(crate) fn sink(&mut self) -> &mut S {
        &mut self.sink
    }

    pub(crate) fn close(mut self) -> Result<()> {
        self.closed = true;
        self.sink.close()
    }
}

impl<S: SampleSink> Drop for SinkGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.sink.close() {
                error!("Failed to close sample sink: {}", e);
            }
        }
    }
}

/// CSV file sink: `elapsed,ax,ay,az,gx,gy,gz` per row
pub struct CsvSink {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    rows: u64,
}

impl CsvSink {
    /// Create (truncate) a CSV file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self::with_file(file, path))
    }

    /// Create `mpu6050_YYYYmmdd-HHMMSS.csv` inside `dir`.
    ///
    /// Never overwrites: a name already taken gets a `_1`, `_2`, ... suffix.
    pub fn in_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let (file, path) = create_unique(dir.as_ref(), &timestamped_stem(), "csv", |path| {
            Ok(OpenOptions::new().write(true).create_new(true).open(path)?)
        })?;
        Ok(Self::with_file(file, path))
    }

    fn with_file(file: File, path: PathBuf) -> Self {
        info!("Logfile opened: {}", path.display());
        Self {
            writer: Some(BufWriter::new(file)),
            path,
            rows: 0,
        }
    }

    /// Local-time file name for a capture starting now
    pub fn timestamped_name() -> String {
        format!("{}.csv", timestamped_stem())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl SampleSink for CsvSink {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Mpu6050Error::Sink(format!("{} is closed", self.path.display())))?;
        writeln!(
            writer,
            "{:.3},{:.5},{:.5},{:.5},{:.5},{:.5},{:.5}",
            sample.elapsed,
            sample.accel.x,
            sample.accel.y,
            sample.accel.z,
            sample.gyro.x,
            sample.gyro.y,
            sample.gyro.z
        )?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("Logfile closed: {} ({} rows)", self.path.display(), self.rows);
        }
        Ok(())
    }
}

/// Forwards samples over a channel, e.g. to a display thread
pub struct ChannelSink {
    tx: Sender<Sample>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Sample>) -> Self {
        Self { tx }
    }
}

impl SampleSink for ChannelSink {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        self.tx
            .send(*sample)
            .map_err(|_| Mpu6050Error::Sink("receiver dropped".to_string()))
    }
}

/// Shared in-memory buffer. Clones see the same samples.
#[derive(Clone, Default)]
pub struct MemorySink {
    samples: Arc<Mutex<Vec<Sample>>>,
    closes: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times the sink has been closed
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SampleSink for MemorySink {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(*sample);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Vector3;
    use std::sync::mpsc;

    fn sample(elapsed: f64) -> Sample {
        Sample {
            elapsed,
            accel: Vector3::new(0.0, 0.1, 9.80665),
            gyro: Vector3::new(-1.0, 0.0, 0.5),
        }
    }

    #[test]
    fn test_csv_rows() {
        let path = std::env::temp_dir().join(format!("mpu6050_sink_test_{}.csv", std::process::id()));
        let mut sink = CsvSink::create(&path).unwrap();
        sink.accept(&sample(0.1234)).unwrap();
        sink.accept(&sample(1.0)).unwrap();
        sink.close().unwrap();
        assert_eq!(sink.rows(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "0.123,0.00000,0.10000,9.80665,-1.00000,0.00000,0.50000");
        assert!(lines[1].starts_with("1.000,"));

        // Writes after close are rejected; closing twice is harmless
        assert!(sink.accept(&sample(2.0)).is_err());
        sink.close().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_timestamped_name() {
        let name = CsvSink::timestamped_name();
        assert!(name.starts_with("mpu6050_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "mpu6050_20240101-120000.csv".len());
    }

    #[test]
    fn test_in_directory_never_overwrites() {
        let dir = std::env::temp_dir().join(format!("mpu6050_unique_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        // Same stem twice in a row, as for a restart within one second
        let stem = timestamped_stem();
        std::fs::write(dir.join(format!("{}.csv", stem)), "kept\n").unwrap();
        let (_, first) = create_unique(&dir, &stem, "csv", |p| {
            Ok(OpenOptions::new().write(true).create_new(true).open(p)?)
        })
        .unwrap();
        let (_, second) = create_unique(&dir, &stem, "csv", |p| {
            Ok(OpenOptions::new().write(true).create_new(true).open(p)?)
        })
        .unwrap();

        assert_eq!(first, dir.join(format!("{}_1.csv", stem)));
        assert_eq!(second, dir.join(format!("{}_2.csv", stem)));
        assert_eq!(std::fs::read_to_string(dir.join(format!("{}.csv", stem))).unwrap(), "kept\n");

        let mut a = CsvSink::in_directory(&dir).unwrap();
        let mut b = CsvSink::in_directory(&dir).unwrap();
        assert_ne!(a.path(), b.path());
        a.close().unwrap();
        b.close().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_create_unique_passes_other_errors() {
        let dir = std::env::temp_dir();
        let result = create_unique(&dir, "mpu6050_never", "csv", |_| -> Result<()> {
            Err(Mpu6050Error::Sink("denied".to_string()))
        });
        assert!(matches!(result, Err(Mpu6050Error::Sink(_))));
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = mpsc::channel();
        let mut sink = ChannelSink::new(tx);
        sink.accept(&sample(3.0)).unwrap();
        assert_eq!(rx.recv().unwrap().elapsed, 3.0);
        drop(rx);
        assert!(sink.accept(&sample(4.0)).is_err());
    }

    #[test]
    fn test_guard_closes_once() {
        let memory = MemorySink::new();
        let mut guard = SinkGuard::new(memory.clone());
        guard.sink().accept(&sample(0.0)).unwrap();
        guard.close().unwrap();
        assert_eq!(memory.close_count(), 1);

        {
            let _guard = SinkGuard::new(memory.clone());
        }
        assert_eq!(memory.close_count(), 2);
        assert_eq!(memory.len(), 1);
    }
}
