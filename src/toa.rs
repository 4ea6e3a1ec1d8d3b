use crate::config::{Calibration, PrsConfig};
use crate::correlate::{peak, xcorr};
use crate::error::{invalid, Result};
use num::Complex;

pub const SPEED_OF_LIGHT: f64 = 299_792_458.;

/// Coarse time of arrival of a reference in a (frequency corrected) capture
#[derive(Clone, Debug, PartialEq)]
pub struct ToaEstimate {
    /// Correlation lag of the peak (samples)
    pub lag: usize,
    pub magnitude: f64,
    /// `lag / sample_rate`
    pub delay_s: f64,
    /// Calibrated range (m)
    pub range_m: f64,
    /// Correlation magnitude for every non-negative lag
    pub profile: Vec<f64>,
}

/// Range in metres corresponding to a lag of `lag` samples, after calibration
pub fn lag_to_range(lag: f64, sample_rate: f64, calibration: &Calibration) -> f64 {
    lag / sample_rate * SPEED_OF_LIGHT - calibration.d_est + calibration.d_cal
}

/// Correlate `corrected` with `reference` and take the first peak over the non-negative lags as
/// the arrival. Unlike the frequency search no symbol length offset is added to the lag
pub fn estimate_toa(
    corrected: &[Complex<f64>],
    reference: &[Complex<f64>],
    config: &PrsConfig,
    calibration: &Calibration,
) -> Result<ToaEstimate> {
    if corrected.is_empty() || reference.is_empty() {
        return invalid("cannot estimate ToA from an empty waveform");
    }
    config.validate()?;

    let profile = xcorr(corrected, reference);
    let p = peak(&profile);
    let delay_s = p.index as f64 / config.sample_rate;
    log::debug!("ToA peak at lag {} ({} s), magnitude {}", p.index, delay_s, p.magnitude);

    Ok(ToaEstimate {
        lag: p.index,
        magnitude: p.magnitude,
        delay_s,
        range_m: lag_to_range(p.index as f64, config.sample_rate, calibration),
        profile,
    })
}
