// sampler.rs: Frame timing between consecutive present calls.

use std::time::Instant;

/// Time since the previous intercepted present call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub elapsed_ms: f64,
}

/// Holds only the timestamp of the last present call in the session.
///
/// The first call after creation or [`reset`](Self::reset) produces no
/// sample, so N calls yield N-1 samples.
#[derive(Debug, Default)]
pub struct FrameTimingSampler {
    last: Option<Instant>,
}

impl FrameTimingSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self) -> Option<FrameSample> {
        self.observe_at(Instant::now())
    }

    pub fn observe_at(&mut self, now: Instant) -> Option<FrameSample> {
        let previous = self.last.replace(now)?;
        let elapsed = now.saturating_duration_since(previous);
        Some(FrameSample {
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_n_calls_yield_n_minus_one_samples() {
        let mut sampler = FrameTimingSampler::new();
        let samples: Vec<_> = (0..10).filter_map(|_| sampler.observe()).collect();
        assert_eq!(samples.len(), 9);
        assert!(samples.iter().all(|s| s.elapsed_ms >= 0.0));
    }

    #[test]
    fn test_elapsed_matches_timestamps() {
        let start = Instant::now();
        let mut sampler = FrameTimingSampler::new();
        assert_eq!(sampler.observe_at(start), None);
        let sample = sampler.observe_at(start + Duration::from_micros(16_600)).unwrap();
        assert!((sample.elapsed_ms - 16.6).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_order_timestamp_clamps_to_zero() {
        let start = Instant::now() + Duration::from_millis(5);
        let mut sampler = FrameTimingSampler::new();
        sampler.observe_at(start);
        let sample = sampler.observe_at(start - Duration::from_millis(5)).unwrap();
        assert_eq!(sample.elapsed_ms, 0.0);
    }

    #[test]
    fn test_reset_skips_next_sample() {
        let mut sampler = FrameTimingSampler::new();
        sampler.observe();
        assert!(sampler.observe().is_some());
        sampler.reset();
        assert!(sampler.observe().is_none());
    }
}
