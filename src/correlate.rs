use num::{Complex, Zero};
use rustfft::{FFTplanner, FFT};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// Extend `samps` with zeros up to `len`. Never truncates; borrows when no padding is needed
pub fn zero_pad(samps: &[Complex<f64>], len: usize) -> Cow<'_, [Complex<f64>]> {
    if samps.len() >= len {
        Cow::Borrowed(samps)
    } else {
        let mut padded = Vec::with_capacity(len);
        padded.extend_from_slice(samps);
        padded.resize(len, Complex::zero());
        Cow::Owned(padded)
    }
}

/// Bring two sequences to a common length by zero-extending the shorter one. Both are returned
/// unchanged if they already have equal length
pub fn align_lengths<'a>(
    a: &'a [Complex<f64>],
    b: &'a [Complex<f64>],
) -> (Cow<'a, [Complex<f64>]>, Cow<'a, [Complex<f64>]>) {
    let len = a.len().max(b.len());
    (zero_pad(a, len), zero_pad(b, len))
}

/// Largest correlation magnitude and the lag at which it first occurs
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CorrelationPeak {
    pub magnitude: f64,
    pub index: usize,
}

/// First maximum of `mags`. An empty input gives a zero peak at index 0
pub fn peak(mags: &[f64]) -> CorrelationPeak {
    let mut best = CorrelationPeak::default();
    for (i, &m) in mags.iter().enumerate() {
        if m > best.magnitude {
            best = CorrelationPeak {
                magnitude: m,
                index: i,
            };
        }
    }
    best
}

/// Cross-correlates signals of a fixed length against one known reference.
///
/// Both sequences are aligned to `len = max(signal_len, reference.len())` and the correlation
/// `c[k] = sum_n signal[n + k] * conj(reference[n])` is returned for the non-negative lags
/// `k = 0..len` only. It is computed through an FFT of at least `2 * len - 1` points so that the
/// circular correlation never wraps. The plans and the reference spectrum are computed once, so
/// the same `Correlator` can be reused across many frequency hypotheses.
pub struct Correlator {
    len: usize,
    fft_len: usize,
    fft: Arc<dyn FFT<f64>>,
    ifft: Arc<dyn FFT<f64>>,
    /// Conjugated spectrum of the zero-padded reference
    ref_spectrum: Vec<Complex<f64>>,
}

impl Correlator {
    pub fn new(reference: &[Complex<f64>], signal_len: usize) -> Self {
        let len = signal_len.max(reference.len());
        let fft_len = (2 * len).saturating_sub(1).max(1).next_power_of_two();

        let fft = FFTplanner::new(false).plan_fft(fft_len);
        let ifft = FFTplanner::new(true).plan_fft(fft_len);

        let mut padded = zero_pad(reference, fft_len).into_owned();
        let mut ref_spectrum = vec![Complex::zero(); fft_len];
        fft.process(&mut padded, &mut ref_spectrum);
        for x in ref_spectrum.iter_mut() {
            *x = x.conj();
        }

        Self {
            len,
            fft_len,
            fft,
            ifft,
            ref_spectrum,
        }
    }

    /// Length both sequences are aligned to; also the number of lags `correlate` returns
    pub fn aligned_len(&self) -> usize {
        self.len
    }

    /// Complex correlation at lags `0..aligned_len()`. `signal` must not be longer than the
    /// aligned length
    pub fn correlate_complex(&self, signal: &[Complex<f64>]) -> Vec<Complex<f64>> {
        assert!(signal.len() <= self.len);
        let mut padded = zero_pad(signal, self.fft_len).into_owned();
        let mut spectrum = vec![Complex::zero(); self.fft_len];
        self.fft.process(&mut padded, &mut spectrum);

        for (s, r) in spectrum.iter_mut().zip(&self.ref_spectrum) {
            *s = *s * r;
        }

        // rustfft's inverse is unnormalized
        let mut corr = vec![Complex::zero(); self.fft_len];
        self.ifft.process(&mut spectrum, &mut corr);
        let scale = 1. / self.fft_len as f64;
        corr.truncate(self.len);
        for c in corr.iter_mut() {
            *c = *c * scale;
        }
        corr
    }

    /// Correlation magnitudes at lags `0..aligned_len()`
    pub fn correlate(&self, signal: &[Complex<f64>]) -> Vec<f64> {
        self.correlate_complex(signal)
            .iter()
            .map(|c| c.norm())
            .collect()
    }
}

/// One-shot non-negative-lag correlation magnitudes of `signal` against `reference`, after
/// zero-extending the shorter of the two
pub fn xcorr(signal: &[Complex<f64>], reference: &[Complex<f64>]) -> Vec<f64> {
    let (signal, reference) = align_lengths(signal, reference);
    Correlator::new(&reference, signal.len()).correlate(&signal)
}
