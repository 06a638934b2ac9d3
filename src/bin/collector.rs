//! MPU6050 Data Collector
//!
//! Runs one FIFO capture session into a timestamped file in the output
//! directory until Ctrl+C, the requested duration, or the safety cutoff.
//!
//! Usage:
//!   collector --bus rpi:1 --output-dir logs --safety-limit 600
//!   collector --bus sim --duration 3

use clap::{Parser, ValueEnum};
use log::{info, warn};
use mpu6050_capture::{
    AccelRange, AxisOffsets, BusSelection, CaptureController, CaptureSettings, DesyncPolicy, DeviceConfig,
    DeviceHandle, EndReason, FilterMode, GyroRange,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Csv,
    Hdf5,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OnDesync {
    Resync,
    Abort,
}

#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(about = "Capture MPU6050 FIFO samples to a file", long_about = None)]
struct Args {
    /// Bus to open: sim[:RATE], ft232h[:CHANNEL] or rpi[:BUS]
    #[arg(short, long, default_value = "sim")]
    bus: BusSelection,

    /// Directory for the mpu6050_YYYYmmdd-HHMMSS file
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: Format,

    /// Duration in seconds (runs until Ctrl+C or the safety cutoff if omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Session stops itself once elapsed (seconds × 10) exceeds this
    #[arg(long, default_value = "60")]
    safety_limit: f64,

    /// Accelerometer full scale in g (2, 4, 8, 16)
    #[arg(long, default_value = "2")]
    accel_range: u16,

    /// Gyroscope full scale in °/s (250, 500, 1000, 2000)
    #[arg(long, default_value = "250")]
    gyro_range: u16,

    /// Digital low-pass filter mode (0-6)
    #[arg(long, default_value = "3")]
    filter: u8,

    /// Sample rate divider
    #[arg(long, default_value = "10")]
    divider: u8,

    /// Calibration offsets: accel X Y Z, gyro X Y Z
    #[arg(long, num_args = 6, value_names = ["AX", "AY", "AZ", "GX", "GY", "GZ"], allow_negative_numbers = true)]
    offsets: Option<Vec<i16>>,

    /// What to do when the FIFO count is not a whole number of packets
    #[arg(long, value_enum, default_value = "resync")]
    on_desync: OnDesync,
}

impl Args {
    fn settings(&self) -> mpu6050_capture::Result<CaptureSettings> {
        let offsets = match self.offsets.as_deref() {
            Some(&[accel_x, accel_y, accel_z, gyro_x, gyro_y, gyro_z]) => AxisOffsets {
                accel_x,
                accel_y,
                accel_z,
                gyro_x,
                gyro_y,
                gyro_z,
            },
            _ => AxisOffsets::FACTORY,
        };

        Ok(CaptureSettings {
            device: DeviceConfig {
                offsets,
                accel_range: AccelRange::from_full_scale_g(self.accel_range)?,
                gyro_range: GyroRange::from_full_scale_dps(self.gyro_range)?,
                filter_mode: FilterMode::try_from(self.filter)?,
                sample_rate_divider: self.divider,
            },
            safety_limit: self.safety_limit,
            desync_policy: match self.on_desync {
                OnDesync::Resync => DesyncPolicy::Resync,
                OnDesync::Abort => DesyncPolicy::Abort,
            },
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let settings = args.settings()?;

    println!("MPU6050 Data Collector");
    println!("======================");
    println!("Bus: {:?}", args.bus);
    println!("Output directory: {}", args.output_dir.display());
    println!("Format: {:?}", args.format);
    match args.duration {
        Some(duration) => println!("Duration: {} seconds", duration),
        None => println!("Duration: until Ctrl+C"),
    }
    println!("Safety cutoff: {:.1} s", settings.safety_limit / mpu6050_capture::ELAPSED_SCALE);
    println!();

    std::fs::create_dir_all(&args.output_dir)?;

    info!("Initializing sensor...");
    let device = DeviceHandle::open(args.bus.open()?)?;
    let mut controller = CaptureController::new(device, settings);
    controller.configure(settings)?;
    let rate_hz = controller.device()?.effective_sample_rate_hz();

    match args.format {
        Format::Csv => controller.start_csv(&args.output_dir)?,
        Format::Hdf5 => start_hdf5(&mut controller, &args, rate_hz)?,
    }

    if let Some(stop) = controller.stop_handle() {
        ctrlc::set_handler(move || {
            println!("\nReceived Ctrl+C, stopping collection...");
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    println!("Capturing at {:.1} Hz, press Ctrl+C to stop\n", rate_hz);
    let started = Instant::now();
    let deadline = args.duration.map(|d| started + Duration::from_secs(d));

    while controller.is_capturing() {
        if deadline.is_some_and(|end| Instant::now() >= end) {
            info!("Duration reached");
            controller.stop();
        }
        thread::sleep(Duration::from_millis(50));
    }

    let wall = started.elapsed().as_secs_f64();
    let Some(report) = controller.wait()? else {
        return Ok(());
    };

    println!("\nCollection complete!");
    println!("Total samples: {}", report.samples);
    println!("Elapsed time: {:.2} seconds", wall);
    println!("Actual sample rate: {:.1} Hz", report.samples as f64 / wall);
    println!("Overflow resets: {}", report.overflow_resets);
    println!("Desync events: {}", report.desync_events);

    match &report.end_reason {
        EndReason::Stopped => Ok(()),
        EndReason::SafetyCutoff => {
            warn!("Session hit the safety cutoff at elapsed {:.3}", report.final_elapsed);
            Ok(())
        }
        EndReason::Failed(e) => Err(format!("capture failed: {}", e).into()),
    }
}

#[cfg(feature = "hdf5")]
fn start_hdf5<T: mpu6050_capture::Transport + 'static>(
    controller: &mut CaptureController<T>,
    args: &Args,
    rate_hz: f64,
) -> mpu6050_capture::Result<()> {
    use mpu6050_capture::{Hdf5Sink, Metadata};

    let device = controller.settings().device;
    let metadata = Metadata::new(rate_hz, device.accel_range, device.gyro_range);
    let dir = args.output_dir.clone();
    controller.start(move || Hdf5Sink::in_directory(dir, &metadata))
}

#[cfg(not(feature = "hdf5"))]
fn start_hdf5<T: mpu6050_capture::Transport + 'static>(
    _controller: &mut CaptureController<T>,
    _args: &Args,
    _rate_hz: f64,
) -> mpu6050_capture::Result<()> {
    Err(mpu6050_capture::Mpu6050Error::InvalidConfiguration(
        "HDF5 output requires building with --features hdf5".to_string(),
    ))
}
