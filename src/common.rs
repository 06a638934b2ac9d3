//! Small utilities shared by the driver and the binaries

use std::time::Instant;

/// Monotonic clock anchored at a session start
#[derive(Debug, Clone, Copy)]
pub struct TimeKeeper {
    start: Instant,
}

impl TimeKeeper {
    /// Start counting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed wall time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Elapsed time multiplied by `scale`
    pub fn elapsed_scaled(&self, scale: f64) -> f64 {
        self.elapsed_secs() * scale
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

/// Horizontal bar graph centred on zero
///
/// # Arguments
/// * `value` - The value to display
/// * `max_value` - Maximum absolute value (defines scale)
/// * `width` - Total width of the bar in characters, excluding the centre marker
///
/// # Example
/// ```
/// use mpu6050_capture::create_bar;
///
/// // +4.9 m/s² on a ±2g (19.6 m/s²) scale
/// let bar = create_bar(4.9, 19.6, 40);
/// println!("[{}]", bar);
/// ```
pub fn create_bar(value: f64, max_value: f64, width: usize) -> String {
    let normalized = (value / max_value).clamp(-1.0, 1.0);
    let center = width / 2;
    let filled = ((normalized.abs() * center as f64) as usize).min(center);

    let (left, right) = if normalized < 0.0 {
        (
            format!("{}{}", " ".repeat(center - filled), "█".repeat(filled)),
            " ".repeat(center),
        )
    } else {
        (
            " ".repeat(center),
            format!("{}{}", "█".repeat(filled), " ".repeat(center - filled)),
        )
    };

    format!("{}|{}", left, right)
}
