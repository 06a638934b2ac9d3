//! MPU6050 sensor reader - live one-shot readings on the console
//!
//! Applies the capture configuration, then reads accel, gyro and temperature
//! registers in a loop and draws them as bar graphs.
//!
//! Usage:
//!   mpu6050-reader --bus rpi:1
//!   mpu6050-reader --bus sim

use clap::Parser;
use log::{error, info};
use mpu6050_capture::{
    create_bar, BusSelection, DeviceConfig, DeviceHandle, Mpu6050Error, TimeKeeper, GRAVITY_MS2,
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mpu6050-reader")]
#[command(about = "Live MPU6050 accelerometer and gyroscope display", long_about = None)]
struct Args {
    /// Bus to open: sim[:RATE], ft232h[:CHANNEL] or rpi[:BUS]
    #[arg(short, long, default_value = "sim")]
    bus: BusSelection,

    /// Delay between readings in milliseconds
    #[arg(short, long, default_value = "20")]
    interval_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("MPU6050 Sensor Reader");
    println!("====================");
    info!("Opening {:?}", args.bus);

    let mut device = match args.bus.open().and_then(DeviceHandle::open) {
        Ok(device) => device,
        Err(Mpu6050Error::NoChannelsFound) => {
            eprintln!("Error: No FT232H devices found.");
            eprintln!("Please check:");
            eprintln!("  1. FT232H is connected via USB");
            eprintln!("  2. FTDI drivers are installed");
            eprintln!("  3. No other application is using the device");
            return Err(Box::new(Mpu6050Error::NoChannelsFound));
        }
        Err(Mpu6050Error::InvalidDeviceId(id)) => {
            eprintln!("Error: Invalid MPU6050 device ID: 0x{:02X}", id);
            eprintln!("Please check:");
            eprintln!("  1. MPU6050 is properly connected to the I2C pins");
            eprintln!("  2. Power supply to MPU6050 is correct (3.3V)");
            eprintln!("  3. Pull-up resistors are present on SDA/SCL lines");
            return Err(Box::new(Mpu6050Error::InvalidDeviceId(id)));
        }
        Err(e) => {
            error!("Error initializing sensor: {}", e);
            return Err(Box::new(e));
        }
    };
    device.apply_config(&DeviceConfig::default())?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

    let accel_max = device.accel_range().full_scale_g() as f64 * GRAVITY_MS2;
    let gyro_max = device.gyro_range().full_scale_dps() as f64;
    let clock = TimeKeeper::new();
    let mut sample_count = 0u64;

    // Clear screen once at start
    print!("\x1B[2J\x1B[H");
    io::stdout().flush()?;

    while running.load(Ordering::SeqCst) {
        match device.read_instant() {
            Ok(reading) => {
                let accel = reading.sample.accel;
                let gyro = reading.sample.gyro;
                sample_count += 1;
                let elapsed = clock.elapsed_secs();
                let rate = if elapsed > 0.0 { sample_count as f64 / elapsed } else { 0.0 };

                // Cursor home without clearing (reduces flicker)
                print!("\x1B[H");
                println!("MPU6050 Sensor Reader - Live Data                              ");
                println!("==================================                              ");
                println!(
                    "Time: {:.2}s | Samples: {} | Rate: {:.1} Hz | Temp: {:.1}°C      ",
                    elapsed, sample_count, rate, reading.temperature_c
                );
                println!();

                println!("ACCELEROMETER (m/s²)      -{:.1} ◄─────────┼─────────► +{:.1}", accel_max, accel_max);
                println!("  X: {:8.3}  [{}]", accel.x, create_bar(accel.x, accel_max, 40));
                println!("  Y: {:8.3}  [{}]", accel.y, create_bar(accel.y, accel_max, 40));
                println!("  Z: {:8.3}  [{}]", accel.z, create_bar(accel.z, accel_max, 40));
                println!();

                println!("GYROSCOPE (°/s)           -{} ◄───────┼───────► +{}", gyro_max, gyro_max);
                println!("  X: {:8.2}  [{}]", gyro.x, create_bar(gyro.x, gyro_max, 40));
                println!("  Y: {:8.2}  [{}]", gyro.y, create_bar(gyro.y, gyro_max, 40));
                println!("  Z: {:8.2}  [{}]", gyro.z, create_bar(gyro.z, gyro_max, 40));
                println!();
                println!("Press Ctrl+C to exit                                           ");

                io::stdout().flush()?;
            }
            Err(e) => {
                error!("Error reading sensor: {}, retrying", e);
                thread::sleep(Duration::from_millis(500));
            }
        }
        thread::sleep(Duration::from_millis(args.interval_ms));
    }

    println!();
    info!("{} readings in {:.1}s", sample_count, clock.elapsed_secs());
    Ok(())
}
