//! Frame rate summary over a recorded run.

/// Frame rates derived from frame times in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub average_fps: f64,
    /// Rate over the slowest 10% of frames.
    pub one_percent_low_fps: f64,
    /// Rate over the slowest 1% of frames.
    pub point_one_percent_low_fps: f64,
}

impl FrameStats {
    /// Every mean is clamped to at least 1 ms before conversion, so no rate
    /// exceeds 1000. A "worst" slice that rounds down to zero frames yields 0.
    pub fn from_frame_times(frame_times: &[f64]) -> Self {
        if frame_times.is_empty() {
            return Self::default();
        }

        let mut worst_first = frame_times.to_vec();
        worst_first.sort_by(|a, b| b.total_cmp(a));

        let worst = |fraction: f64| {
            let count = (frame_times.len() as f64 * fraction) as usize;
            fps(&worst_first[..count])
        };

        Self {
            average_fps: fps(frame_times),
            one_percent_low_fps: worst(0.1),
            point_one_percent_low_fps: worst(0.01),
        }
    }
}

fn fps(frame_times: &[f64]) -> f64 {
    if frame_times.is_empty() {
        return 0.0;
    }
    let mean = frame_times.iter().sum::<f64>() / frame_times.len() as f64;
    1000.0 / mean.max(1.0)
}
