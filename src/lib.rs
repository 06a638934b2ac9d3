//! MPU6050 FIFO capture driver
//!
//! Configures an MPU6050 6-axis motion sensor over an addressed register bus
//! and streams accelerometer + gyroscope samples out of its hardware FIFO into
//! a sink, one capture session at a time.
//!
//! # Quick Start
//!
//! ## One-shot reading
//! ```no_run
//! use mpu6050_capture::{AccelUnit, DeviceHandle, SimulatedMpu6050};
//!
//! let mut device = DeviceHandle::open(SimulatedMpu6050::at_rest(100.0))?;
//! let reading = device.read_instant()?;
//! println!("Accel Z: {:.2} m/s²", reading.sample.accel.z);
//! println!("Gyro X: {:.2} °/s", device.read_gyro()?.x);
//! println!("Accel Z: {:.2} g", device.read_accel(AccelUnit::G)?.z);
//! # Ok::<(), mpu6050_capture::Mpu6050Error>(())
//! ```
//!
//! ## Capture session into a CSV file
//! ```no_run
//! use mpu6050_capture::{CaptureController, CaptureSettings, DeviceHandle, SimulatedMpu6050};
//! use std::time::Duration;
//!
//! let device = DeviceHandle::open(SimulatedMpu6050::at_rest(100.0))?;
//! let mut controller = CaptureController::new(device, CaptureSettings::default());
//!
//! controller.start_csv(".")?;
//! std::thread::sleep(Duration::from_secs(2));
//! controller.stop();
//!
//! if let Some(report) = controller.wait()? {
//!     println!("{} samples, {} overflow resets", report.samples, report.overflow_resets);
//! }
//! # Ok::<(), mpu6050_capture::Mpu6050Error>(())
//! ```

pub mod bus;
pub mod common;
pub mod controller;
pub mod device;
pub mod error;
pub mod fifo;
pub mod registers;
pub mod sample;
pub mod sim;
pub mod sink;
pub mod transport;

#[cfg(feature = "ft232h")]
mod ffi;

#[cfg(feature = "hdf5")]
pub mod hdf5_format;

// Re-export public API
pub use common::{create_bar, TimeKeeper};
pub use controller::{CaptureController, CaptureReport, CaptureSettings, EndReason};
pub use device::{AccelUnit, AxisOffsets, DeviceConfig, DeviceHandle};
pub use error::{Mpu6050Error, Result};
pub use fifo::{CaptureStats, DesyncPolicy, FifoCapture, SessionState, StepOutcome};
pub use registers::{AccelRange, Axis, FifoChannels, FilterMode, GyroRange, InterruptSources};
pub use sample::{FifoPacket, InstantReading, Sample, Vector3, ELAPSED_SCALE, GRAVITY_MS2};
pub use sim::SimulatedMpu6050;
pub use sink::{ChannelSink, CsvSink, MemorySink, SampleSink};
pub use transport::{BusSelection, Transport};

#[cfg(feature = "ft232h")]
pub use transport::Ft232hTransport;

#[cfg(feature = "rpi")]
pub use transport::RppalTransport;

#[cfg(feature = "hdf5")]
pub use hdf5_format::{Hdf5Reader, Hdf5Sink, Metadata};
