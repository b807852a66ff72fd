//! Smoothed values for zipper-free gain and parameter changes.

/// Per-sample linear ramp towards a target value.
///
/// Call [`next_sample()`](SmoothedValue::next_sample) once per sample on the
/// audio thread.
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    step: f32,
    samples_remaining: u32,
    smooth_samples: u32,
}

impl SmoothedValue {
    pub fn new(initial: f32, smooth_time_secs: f32, sample_rate: f32) -> Self {
        let smooth_samples = (smooth_time_secs * sample_rate).max(1.0) as u32;
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            samples_remaining: 0,
            smooth_samples,
        }
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() < f32::EPSILON {
            return;
        }
        self.target = target;
        self.samples_remaining = self.smooth_samples;
        self.step = (self.target - self.current) / self.samples_remaining as f32;
    }

    #[inline]
    pub fn set_direct(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.samples_remaining = 0;
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.samples_remaining > 0 {
            self.current += self.step;
            self.samples_remaining -= 1;
            // Snap to target when done to avoid floating point drift
            if self.samples_remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        self.samples_remaining > 0
    }
}

/// Per-block linear ramp, advanced once per audio chunk.
///
/// Used by the track gain/pan stage: the chunk is rendered with a ramp from
/// [`value()`](BlockSmoother::value) to [`next_value()`](BlockSmoother::next_value).
#[derive(Debug, Clone)]
pub struct BlockSmoother {
    current: f32,
    target: f32,
    step: f32,
    blocks_remaining: u32,
    lag_blocks: u32,
}

impl BlockSmoother {
    /// `lag_time_secs` at `block_rate` blocks per second.
    pub fn new(initial: f32, lag_time_secs: f32, block_rate: f32) -> Self {
        let lag_blocks = (lag_time_secs * block_rate).max(1.0) as u32;
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            blocks_remaining: 0,
            lag_blocks,
        }
    }

    #[inline]
    pub fn set(&mut self, target: f32) {
        if (target - self.target).abs() < f32::EPSILON {
            return;
        }
        self.target = target;
        self.blocks_remaining = self.lag_blocks;
        self.step = (self.target - self.current) / self.blocks_remaining as f32;
    }

    #[inline]
    pub fn set_direct(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.blocks_remaining = 0;
    }

    #[inline]
    pub fn stationary(&self) -> bool {
        self.blocks_remaining == 0
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Advance one block and return the new value.
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.blocks_remaining > 0 {
            self.current += self.step;
            self.blocks_remaining -= 1;
            if self.blocks_remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoothed_value_reaches_target() {
        let mut value = SmoothedValue::new(0.0, 0.001, 1000.0); // 1 sample lag
        value.set_target(1.0);
        assert_eq!(value.next_sample(), 1.0);
        assert!(!value.is_smoothing());
    }

    #[test]
    fn test_smoothed_value_ramps_linearly() {
        let mut value = SmoothedValue::new(0.0, 4.0, 1.0); // 4 sample lag
        value.set_target(1.0);
        assert!((value.next_sample() - 0.25).abs() < 1e-6);
        assert!((value.next_sample() - 0.5).abs() < 1e-6);
        assert!((value.next_sample() - 0.75).abs() < 1e-6);
        assert_eq!(value.next_sample(), 1.0);
        assert_eq!(value.next_sample(), 1.0);
    }

    #[test]
    fn test_block_smoother_settles() {
        let mut smoother = BlockSmoother::new(1.0, 2.0, 1.0); // 2 block lag
        assert!(smoother.stationary());
        smoother.set(0.0);
        assert!(!smoother.stationary());
        smoother.next_value();
        smoother.next_value();
        assert!(smoother.stationary());
        assert_eq!(smoother.value(), 0.0);
    }

    #[test]
    fn test_set_direct_skips_ramp() {
        let mut smoother = BlockSmoother::new(0.0, 10.0, 1.0);
        smoother.set_direct(0.7);
        assert!(smoother.stationary());
        assert_eq!(smoother.value(), 0.7);
    }
}
