/// Relationship between the GPU timestamp counter and the CPU clock.
///
/// `frequency` is in ticks per second. `gpu_to_cpu_offset_ns` is added to a
/// converted GPU time to land on the CPU clock used for task profiling.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct TimestampCalibration {
    pub frequency: u64,
    pub gpu_to_cpu_offset_ns: i64,
}

impl TimestampCalibration {
    pub fn new(frequency: u64, gpu_to_cpu_offset_ns: i64) -> Self {
        Self { frequency, gpu_to_cpu_offset_ns }
    }

    /// Builds a calibration from a tick period in nanoseconds.
    pub fn from_period_ns(period_ns: f32) -> Self {
        let frequency = if period_ns > 0.0 {
            (1.0e9_f64 / period_ns as f64).round() as u64
        } else {
            0
        };
        Self { frequency, gpu_to_cpu_offset_ns: 0 }
    }

    /// Converts a raw GPU tick count to CPU-clock nanoseconds.
    ///
    /// Returns `None` when the frequency is unknown.
    pub fn ticks_to_cpu_ns(&self, ticks: u64) -> Option<i128> {
        if self.frequency == 0 {
            return None;
        }
        let ns = ticks as i128 * 1_000_000_000 / self.frequency as i128;
        Some(ns + self.gpu_to_cpu_offset_ns as i128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_frequency_converts_to_none() {
        assert_eq!(TimestampCalibration::default().ticks_to_cpu_ns(100), None);
    }

    #[test]
    fn converts_with_offset() {
        let cal = TimestampCalibration::new(1_000_000, -500);
        // 1 MHz: one tick is a microsecond.
        assert_eq!(cal.ticks_to_cpu_ns(3), Some(3_000 - 500));
    }

    #[test]
    fn period_to_frequency() {
        assert_eq!(TimestampCalibration::from_period_ns(1.0).frequency, 1_000_000_000);
        assert_eq!(TimestampCalibration::from_period_ns(0.0).frequency, 0);
    }
}
