use std::time::{Duration, Instant};

/// Measures wall-clock time on the monotonic clock from its creation.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Timer {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Run `work` and return its result along with how long it took.
pub fn time<T>(work: impl FnOnce() -> T) -> (T, Duration) {
    let timer = Timer::start();
    let result = work();
    (result, timer.elapsed())
}

/// Fractional milliseconds, keeping sub-microsecond digits.
pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Time spent in each engine stage of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub scale_space: Duration,
    pub detection: Duration,
    pub description: Duration,
}

impl Timings {
    pub fn scale_space_ms(&self) -> f64 {
        millis(self.scale_space)
    }

    /// Scale space construction plus detection.
    pub fn detector_ms(&self) -> f64 {
        millis(self.scale_space + self.detection)
    }

    pub fn descriptor_ms(&self) -> f64 {
        millis(self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    #[test]
    fn time_returns_the_result() {
        let (value, elapsed) = time(|| {
            std::thread::sleep(Duration::from_millis(2));
            42
        });
        assert_eq!(value, 42);
        assert!(elapsed >= Duration::from_millis(2));
    }

    #[test]
    fn millis_keeps_microseconds() {
        assert_close(millis(Duration::from_micros(1500)), 1.5);
        assert_close(millis(Duration::from_micros(1)), 0.001);
    }

    #[test]
    fn detector_time_includes_scale_space() {
        let timings = Timings {
            scale_space: Duration::from_millis(3),
            detection: Duration::from_millis(4),
            description: Duration::from_millis(5),
        };
        assert_close(timings.scale_space_ms(), 3.0);
        assert_close(timings.detector_ms(), 7.0);
        assert_close(timings.descriptor_ms(), 5.0);
    }
}
