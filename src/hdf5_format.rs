//! HDF5 sample storage
//!
//! Layout:
//! ```text
//! /metadata            attrs: start_time, sample_rate_hz, accel_range_g,
//!                             gyro_range_dps, elapsed_scale, version
//! /samples/elapsed     f64, chunked + deflate
//! /samples/accel_{x,y,z}   f64 m/s²
//! /samples/gyro_{x,y,z}    f64 °/s
//! ```

use crate::error::{Mpu6050Error, Result};
use crate::registers::{AccelRange, GyroRange};
use crate::sample::{Sample, Vector3, ELAPSED_SCALE};
use crate::sink::{create_unique, timestamped_stem, SampleSink};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group};
use log::info;
use std::io;
use std::path::{Path, PathBuf};

const FORMAT_VERSION: &str = "2.0";
const CHUNK_SIZE: usize = 1024;
const COLUMNS: [&str; 7] = ["elapsed", "accel_x", "accel_y", "accel_z", "gyro_x", "gyro_y", "gyro_z"];

fn h5_err(what: &str, e: hdf5::Error) -> Mpu6050Error {
    Mpu6050Error::Sink(format!("{}: {}", what, e))
}

fn unicode(value: &str) -> Result<VarLenUnicode> {
    value
        .parse()
        .map_err(|e| Mpu6050Error::Sink(format!("invalid HDF5 string {:?}: {}", value, e)))
}

/// Metadata stored alongside the samples
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub start_time: String,
    pub sample_rate_hz: f64,
    pub accel_range_g: u16,
    pub gyro_range_dps: u16,
    pub elapsed_scale: f64,
    pub version: String,
}

impl Metadata {
    /// Metadata for a capture starting now
    pub fn new(sample_rate_hz: f64, accel_range: AccelRange, gyro_range: GyroRange) -> Self {
        Self {
            start_time: chrono::Local::now().to_rfc3339(),
            sample_rate_hz,
            accel_range_g: accel_range.full_scale_g(),
            gyro_range_dps: gyro_range.full_scale_dps(),
            elapsed_scale: ELAPSED_SCALE,
            version: FORMAT_VERSION.to_string(),
        }
    }

    fn write(&self, group: &Group) -> Result<()> {
        let text = [
            ("start_time", self.start_time.as_str()),
            ("version", self.version.as_str()),
        ];
        for (name, value) in text {
            let value = unicode(value)?;
            group
                .new_attr::<VarLenUnicode>()
                .create(name)
                .and_then(|attr| attr.write_scalar(&value))
                .map_err(|e| h5_err(name, e))?;
        }

        let numbers = [
            ("sample_rate_hz", self.sample_rate_hz),
            ("elapsed_scale", self.elapsed_scale),
        ];
        for (name, value) in numbers {
            group
                .new_attr::<f64>()
                .create(name)
                .and_then(|attr| attr.write_scalar(&value))
                .map_err(|e| h5_err(name, e))?;
        }

        for (name, value) in [("accel_range_g", self.accel_range_g), ("gyro_range_dps", self.gyro_range_dps)] {
            group
                .new_attr::<u16>()
                .create(name)
                .and_then(|attr| attr.write_scalar(&value))
                .map_err(|e| h5_err(name, e))?;
        }
        Ok(())
    }

    fn read(group: &Group) -> Result<Self> {
        let text = |name: &str| -> Result<String> {
            group
                .attr(name)
                .and_then(|attr| attr.read_scalar::<VarLenUnicode>())
                .map(|s| s.to_string())
                .map_err(|e| h5_err(name, e))
        };
        let float = |name: &str| -> Result<f64> {
            group
                .attr(name)
                .and_then(|attr| attr.read_scalar::<f64>())
                .map_err(|e| h5_err(name, e))
        };
        let word = |name: &str| -> Result<u16> {
            group
                .attr(name)
                .and_then(|attr| attr.read_scalar::<u16>())
                .map_err(|e| h5_err(name, e))
        };

        Ok(Self {
            start_time: text("start_time")?,
            sample_rate_hz: float("sample_rate_hz")?,
            accel_range_g: word("accel_range_g")?,
            gyro_range_dps: word("gyro_range_dps")?,
            elapsed_scale: float("elapsed_scale")?,
            version: text("version")?,
        })
    }
}

/// Buffered HDF5 sink. Rows are written one chunk at a time and on close.
pub struct Hdf5Sink {
    file: Option<File>,
    datasets: Vec<Dataset>,
    pending: Vec<Sample>,
    written: usize,
    path: PathBuf,
}

impl Hdf5Sink {
    /// Create (truncate) an HDF5 file at `path`
    pub fn create<P: AsRef<Path>>(path: P, metadata: &Metadata) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| h5_err("create file", e))?;
        Self::with_file(file, path, metadata)
    }

    /// Create `mpu6050_YYYYmmdd-HHMMSS.h5` inside `dir`.
    ///
    /// Never overwrites: a name already taken gets a `_1`, `_2`, ... suffix.
    pub fn in_directory<P: AsRef<Path>>(dir: P, metadata: &Metadata) -> Result<Self> {
        let (file, path) = create_unique(dir.as_ref(), &timestamped_stem(), "h5", |path| {
            if path.exists() {
                return Err(Mpu6050Error::Io(io::ErrorKind::AlreadyExists.into()));
            }
            // Exclusive create still fails if another writer got there first
            File::create_excl(path).map_err(|e| {
                if path.exists() {
                    Mpu6050Error::Io(io::ErrorKind::AlreadyExists.into())
                } else {
                    h5_err("create file", e)
                }
            })
        })?;
        Self::with_file(file, path, metadata)
    }

    fn with_file(file: File, path: PathBuf, metadata: &Metadata) -> Result<Self> {
        let metadata_group = file.create_group("metadata").map_err(|e| h5_err("metadata group", e))?;
        metadata.write(&metadata_group)?;

        let data_group = file.create_group("samples").map_err(|e| h5_err("samples group", e))?;
        let datasets = COLUMNS
            .iter()
            .map(|name| {
                data_group
                    .new_dataset::<f64>()
                    .shape((0..,))
                    .chunk((CHUNK_SIZE,))
                    .deflate(4)
                    .create(*name)
                    .map_err(|e| h5_err(name, e))
            })
            .collect::<Result<Vec<_>>>()?;

        info!("HDF5 file opened: {}", path.display());
        Ok(Self {
            file: Some(file),
            datasets,
            pending: Vec::with_capacity(CHUNK_SIZE),
            written: 0,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows accepted so far, including unflushed ones
    pub fn sample_count(&self) -> usize {
        self.written + self.pending.len()
    }

    fn write_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let new_size = self.written + self.pending.len();
        let columns: [fn(&Sample) -> f64; 7] = [
            |s| s.elapsed,
            |s| s.accel.x,
            |s| s.accel.y,
            |s| s.accel.z,
            |s| s.gyro.x,
            |s| s.gyro.y,
            |s| s.gyro.z,
        ];

        for (dataset, column) in self.datasets.iter().zip(columns) {
            let values: Vec<f64> = self.pending.iter().map(column).collect();
            dataset.resize((new_size,)).map_err(|e| h5_err("resize", e))?;
            dataset
                .write_slice(&values, self.written..new_size)
                .map_err(|e| h5_err("write", e))?;
        }

        self.written = new_size;
        self.pending.clear();
        Ok(())
    }
}

impl SampleSink for Hdf5Sink {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        if self.file.is_none() {
            return Err(Mpu6050Error::Sink(format!("{} is closed", self.path.display())));
        }
        self.pending.push(*sample);
        if self.pending.len() >= CHUNK_SIZE {
            self.write_pending()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.write_pending()?;
        if let Some(file) = self.file.take() {
            file.flush().map_err(|e| h5_err("flush", e))?;
            info!("HDF5 file closed: {} ({} samples)", self.path.display(), self.written);
        }
        Ok(())
    }
}

/// Reads files written by [`Hdf5Sink`]
pub struct Hdf5Reader {
    datasets: Vec<Dataset>,
    metadata: Metadata,
}

impl Hdf5Reader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(|e| h5_err("open file", e))?;
        let metadata = Metadata::read(&file.group("metadata").map_err(|e| h5_err("metadata group", e))?)?;
        let data_group = file.group("samples").map_err(|e| h5_err("samples group", e))?;
        let datasets = COLUMNS
            .iter()
            .map(|name| data_group.dataset(name).map_err(|e| h5_err(name, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { datasets, metadata })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn total_samples(&self) -> usize {
        self.datasets[0].size()
    }

    /// Up to `count` samples starting at `start`
    pub fn read_range(&self, start: usize, count: usize) -> Result<Vec<Sample>> {
        let total = self.total_samples();
        if start >= total {
            return Ok(Vec::new());
        }
        let end = start + count.min(total - start);

        let columns = self
            .datasets
            .iter()
            .map(|dataset| {
                dataset
                    .read_slice_1d::<f64, _>(start..end)
                    .map(|values| values.to_vec())
                    .map_err(|e| h5_err("read", e))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((0..end - start)
            .map(|i| Sample {
                elapsed: columns[0][i],
                accel: Vector3::new(columns[1][i], columns[2][i], columns[3][i]),
                gyro: Vector3::new(columns[4][i], columns[5][i], columns[6][i]),
            })
            .collect())
    }

    /// The last `count` samples
    pub fn read_latest(&self, count: usize) -> Result<Vec<Sample>> {
        let start = self.total_samples().saturating_sub(count);
        self.read_range(start, count)
    }
}
