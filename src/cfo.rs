use num::Complex;
use std::f64::consts::PI;

/// Take a buffer and a frequency offset (Hz) and return a copy with the offset removed, i.e.
/// sample `n` is multiplied by `exp(-j 2 pi f n / fs)`
pub fn derotate(samps: &[Complex<f64>], offset_hz: f64, sample_rate: f64) -> Vec<Complex<f64>> {
    // Phase is computed per sample rather than by repeatedly multiplying a phasor, so long
    // captures do not accumulate rounding error
    let w = -2. * PI * offset_hz / sample_rate;
    samps
        .iter()
        .enumerate()
        .map(|(n, s)| s * Complex::from_polar(&1., &(w * n as f64)))
        .collect()
}

/// Symmetric grid of frequency offset hypotheses `-k*step, ..., 0, ..., k*step` (Hz), with `k`
/// the largest integer such that `k*step <= search_bandwidth`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyGrid {
    step_hz: f64,
    /// Number of points on either side of 0
    half_len: usize,
}

impl FrequencyGrid {
    /// `search_bandwidth_hz` must be >= 0 and `step_hz` > 0. Both are checked by the search
    /// before a grid is built
    pub fn new(search_bandwidth_hz: f64, step_hz: f64) -> Self {
        // Tolerate rounding in the ratio so that e.g. 150 kHz / 7.5 kHz is exactly 20 steps
        let half_len = (search_bandwidth_hz / step_hz + 1e-9).floor() as usize;
        Self { step_hz, half_len }
    }

    pub fn len(&self) -> usize {
        2 * self.half_len + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn step_hz(&self) -> f64 {
        self.step_hz
    }

    /// Index of the 0 Hz hypothesis
    pub fn zero_index(&self) -> usize {
        self.half_len
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        if idx < self.len() {
            Some((idx as f64 - self.half_len as f64) * self.step_hz)
        } else {
            None
        }
    }

    /// Hypotheses in ascending order. The iterator is lazy and can be restarted by calling `iter`
    /// again
    pub fn iter(&self) -> impl ExactSizeIterator<Item = f64> + Clone {
        let (step, half) = (self.step_hz, self.half_len as f64);
        (0..self.len()).map(move |i| (i as f64 - half) * step)
    }
}
