//! Joint search over carrier frequency offset and PRS identity.
//!
//! Every hypothesis on a symmetric frequency grid (step of half a subcarrier) is removed from the
//! received waveform, which is then correlated against each candidate reference. The cell of the
//! resulting (frequency x candidate) surface with the largest correlation magnitude gives the
//! coarse frequency offset and, when several candidates are searched, the PRS identity.

use crate::cfo::{derotate, FrequencyGrid};
use crate::config::PrsConfig;
use crate::correlate::{peak, CorrelationPeak, Correlator};
use crate::error::{invalid, Error, Result};
use crate::PrsId;
use num::Complex;
use serde::Serialize;

/// What the search found. Which variant is returned is fixed by the entry point used
#[derive(Clone, Debug, PartialEq)]
pub enum SearchResult {
    /// From `estimate_cfo`: one known reference, no identity search
    SingleReference {
        corrected: Vec<Complex<f64>>,
        offset_hz: f64,
    },
    /// From `estimate_cfo_and_prs_id`
    MultiReference {
        corrected: Vec<Complex<f64>>,
        offset_hz: f64,
        prs_id: PrsId,
    },
}

impl SearchResult {
    /// Received waveform with the estimated offset removed
    pub fn corrected(&self) -> &[Complex<f64>] {
        match self {
            SearchResult::SingleReference { corrected, .. }
            | SearchResult::MultiReference { corrected, .. } => corrected,
        }
    }

    pub fn offset_hz(&self) -> f64 {
        match *self {
            SearchResult::SingleReference { offset_hz, .. }
            | SearchResult::MultiReference { offset_hz, .. } => offset_hz,
        }
    }

    pub fn prs_id(&self) -> Option<PrsId> {
        match *self {
            SearchResult::SingleReference { .. } => None,
            SearchResult::MultiReference { prs_id, .. } => Some(prs_id),
        }
    }

    pub fn into_corrected(self) -> Vec<Complex<f64>> {
        match self {
            SearchResult::SingleReference { corrected, .. }
            | SearchResult::MultiReference { corrected, .. } => corrected,
        }
    }
}

/// Best correlation for every (frequency hypothesis, candidate) cell. Peak indices include the
/// configured symbol length offset
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorrelationSurface {
    /// Frequency hypotheses (Hz), one per row
    pub frequencies_hz: Vec<f64>,
    pub num_candidates: usize,
    /// Row-major, `frequencies_hz.len() * num_candidates` cells
    pub cells: Vec<CorrelationPeak>,
}

impl CorrelationSurface {
    pub fn get(&self, freq_idx: usize, candidate: usize) -> &CorrelationPeak {
        &self.cells[freq_idx * self.num_candidates + candidate]
    }

    pub fn row(&self, freq_idx: usize) -> &[CorrelationPeak] {
        let start = freq_idx * self.num_candidates;
        &self.cells[start..start + self.num_candidates]
    }

    /// Correlation magnitude against frequency offset for one candidate, e.g. for plotting
    pub fn magnitudes(&self, candidate: usize) -> Vec<f64> {
        (0..self.frequencies_hz.len())
            .map(|f| self.get(f, candidate).magnitude)
            .collect()
    }

    /// Cell with the largest magnitude; ties go to the lowest frequency index, then the lowest
    /// candidate index
    pub fn argmax(&self) -> (usize, usize) {
        let mut best = (0, 0);
        let mut best_mag = f64::NEG_INFINITY;
        for (i, c) in self.cells.iter().enumerate() {
            if c.magnitude > best_mag {
                best_mag = c.magnitude;
                best = (i / self.num_candidates, i % self.num_candidates);
            }
        }
        best
    }

    /// Every cell is exactly zero
    pub fn is_degenerate(&self) -> bool {
        self.cells.iter().all(|c| c.magnitude == 0.)
    }
}

/// Result of a search together with the surface it was selected from
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub result: SearchResult,
    pub surface: CorrelationSurface,
    /// Winning (frequency index, candidate index) cell
    pub best: (usize, usize),
    degenerate: bool,
}

impl SearchOutcome {
    /// True if the surface was identically zero. The result then reports the 0 Hz hypothesis and
    /// the first candidate, which carry no information
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn best_peak(&self) -> &CorrelationPeak {
        self.surface.get(self.best.0, self.best.1)
    }

    /// The result, or `Error::NumericDegenerate` if the surface was identically zero
    pub fn into_checked(self) -> Result<SearchResult> {
        if self.degenerate {
            Err(Error::NumericDegenerate)
        } else {
            Ok(self.result)
        }
    }
}

/// Estimate the frequency offset of `received` against a single known reference waveform
pub fn estimate_cfo(
    received: &[Complex<f64>],
    reference: &[Complex<f64>],
    config: &PrsConfig,
    search_bandwidth_hz: f64,
) -> Result<SearchOutcome> {
    validate(received, &[reference], config, search_bandwidth_hz)?;
    let search = run_search(received, &[reference], config, search_bandwidth_hz);
    Ok(SearchOutcome {
        result: SearchResult::SingleReference {
            corrected: search.corrected,
            offset_hz: search.offset_hz,
        },
        surface: search.surface,
        best: search.best,
        degenerate: search.degenerate,
    })
}

/// Jointly estimate the frequency offset of `received` and which of `references` it carries.
/// `prs_ids[i]` is the identity reported if `references[i]` wins
pub fn estimate_cfo_and_prs_id<R: AsRef<[Complex<f64>]>>(
    received: &[Complex<f64>],
    references: &[R],
    prs_ids: &[PrsId],
    config: &PrsConfig,
    search_bandwidth_hz: f64,
) -> Result<SearchOutcome> {
    let references: Vec<&[Complex<f64>]> = references.iter().map(|r| r.as_ref()).collect();
    validate(received, &references, config, search_bandwidth_hz)?;
    if prs_ids.len() != references.len() {
        return invalid(format!(
            "{} PRS ids given for {} reference waveforms",
            prs_ids.len(),
            references.len()
        ));
    }

    let search = run_search(received, &references, config, search_bandwidth_hz);
    Ok(SearchOutcome {
        result: SearchResult::MultiReference {
            corrected: search.corrected,
            offset_hz: search.offset_hz,
            prs_id: prs_ids[search.best.1],
        },
        surface: search.surface,
        best: search.best,
        degenerate: search.degenerate,
    })
}

fn validate(
    received: &[Complex<f64>],
    references: &[&[Complex<f64>]],
    config: &PrsConfig,
    search_bandwidth_hz: f64,
) -> Result<()> {
    if received.is_empty() {
        return invalid("received waveform is empty");
    }
    if references.is_empty() {
        return invalid("no reference waveforms given");
    }
    if let Some(i) = references.iter().position(|r| r.is_empty()) {
        return invalid(format!("reference waveform {} is empty", i));
    }
    config.validate()?;
    if !(search_bandwidth_hz.is_finite() && search_bandwidth_hz >= 0.) {
        return invalid(format!(
            "search bandwidth must be non-negative, got {}",
            search_bandwidth_hz
        ));
    }
    Ok(())
}

struct RawSearch {
    corrected: Vec<Complex<f64>>,
    offset_hz: f64,
    surface: CorrelationSurface,
    best: (usize, usize),
    degenerate: bool,
}

/// The search proper. Inputs have been validated
fn run_search(
    received: &[Complex<f64>],
    references: &[&[Complex<f64>]],
    config: &PrsConfig,
    search_bandwidth_hz: f64,
) -> RawSearch {
    let grid = FrequencyGrid::new(search_bandwidth_hz, config.grid_step_hz());
    // Reference spectra do not depend on the frequency hypothesis
    let correlators: Vec<_> = references
        .iter()
        .map(|r| Correlator::new(r, received.len()))
        .collect();

    let cells: Vec<CorrelationPeak> = grid
        .iter()
        .flat_map(|f| {
            let rotated = derotate(received, f, config.sample_rate);
            correlators
                .iter()
                .map(|c| {
                    let p = peak(&c.correlate(&rotated));
                    CorrelationPeak {
                        magnitude: p.magnitude,
                        index: p.index.saturating_add(config.symbol_length_offset),
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let surface = CorrelationSurface {
        frequencies_hz: grid.iter().collect(),
        num_candidates: references.len(),
        cells,
    };

    let degenerate = surface.is_degenerate();
    let best = if degenerate {
        log::warn!(
            "Correlation is zero for all {} cells; reporting 0 Hz and the first candidate",
            surface.cells.len()
        );
        (grid.zero_index(), 0)
    } else {
        surface.argmax()
    };
    let offset_hz = surface.frequencies_hz[best.0];
    log::debug!(
        "CFO search over {} offsets x {} candidates: {} Hz, candidate {}, magnitude {}",
        grid.len(),
        references.len(),
        offset_hz,
        best.1,
        surface.get(best.0, best.1).magnitude
    );

    // Recomputed from the original capture so the output never aliases a per-cell buffer
    let corrected = derotate(received, offset_hz, config.sample_rate);
    RawSearch {
        corrected,
        offset_hz,
        surface,
        best,
        degenerate,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use num::Zero;
    use rand::{Rng, SeedableRng};

    fn random_waveform(rng: &mut impl Rng, len: usize) -> Vec<Complex<f64>> {
        (0..len)
            .map(|_| Complex::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
            .collect()
    }

    /// Reference with a carrier offset of `offset_hz` applied
    fn with_offset(samps: &[Complex<f64>], offset_hz: f64, fs: f64) -> Vec<Complex<f64>> {
        derotate(samps, -offset_hz, fs)
    }

    #[test]
    fn end_to_end_exact_grid_hit() {
        let config = PrsConfig {
            sample_rate: 30.72e6,
            subcarrier_spacing_khz: 15.,
            symbol_length_offset: 0,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let reference = random_waveform(&mut rng, 1024);
        let received = with_offset(&reference, -37.5e3, config.sample_rate);

        let outcome = estimate_cfo(&received, &reference, &config, 150e3).unwrap();
        assert!(!outcome.is_degenerate());
        assert_eq!(outcome.surface.frequencies_hz.len(), 41);
        assert_eq!(outcome.surface.frequencies_hz[0], -150e3);
        assert_eq!(outcome.surface.frequencies_hz[40], 150e3);
        assert_eq!(outcome.result.offset_hz(), -37.5e3);
        assert_eq!(outcome.result.prs_id(), None);
        assert_eq!(outcome.best_peak().index, 0);

        let corrected = outcome.result.corrected();
        assert_eq!(corrected.len(), reference.len());
        let amplitude = reference.iter().map(|x| x.norm()).fold(0., f64::max);
        for (c, r) in corrected.iter().zip(&reference) {
            assert!((c - r).norm() < 1e-6 * amplitude);
        }
    }

    #[test]
    fn off_grid_offset_recovered_to_nearest_point() {
        let config = PrsConfig {
            sample_rate: 1.92e6,
            subcarrier_spacing_khz: 15.,
            symbol_length_offset: 0,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let reference = random_waveform(&mut rng, 512);
        let mut received = vec![Complex::zero(); 40];
        received.extend(with_offset(&reference, 16.2e3, config.sample_rate));

        let outcome = estimate_cfo(&received, &reference, &config, 60e3).unwrap();
        let offset = outcome.result.offset_hz();
        assert_eq!(offset, 15e3);
        assert!((offset - 16.2e3).abs() < config.grid_step_hz());
        assert_eq!(outcome.best_peak().index, 40);
    }

    #[test]
    fn identity_selection() {
        let config = PrsConfig {
            sample_rate: 3.84e6,
            subcarrier_spacing_khz: 15.,
            symbol_length_offset: 10,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let bank: Vec<_> = (0..5).map(|_| random_waveform(&mut rng, 256)).collect();
        let ids = [0, 11, 22, 33, 44];

        let delay = 17;
        let mut received = vec![Complex::zero(); delay];
        received.extend(with_offset(&bank[3], -22.5e3, config.sample_rate));
        received.extend(vec![Complex::zero(); 30]);

        let outcome = estimate_cfo_and_prs_id(&received, &bank, &ids, &config, 45e3).unwrap();
        assert_eq!(outcome.result.prs_id(), Some(33));
        assert_eq!(outcome.result.offset_hz(), -22.5e3);
        assert_eq!(outcome.best.1, 3);
        assert_eq!(outcome.best_peak().index, delay + 10);

        // The winner beats every other candidate's best cell
        let win = outcome.best_peak().magnitude;
        for c in 0..bank.len() {
            if c == 3 {
                continue;
            }
            let best_other = outcome
                .surface
                .magnitudes(c)
                .into_iter()
                .fold(0., f64::max);
            assert!(win > best_other);
        }
    }

    #[test]
    fn received_shorter_than_reference() {
        let config = PrsConfig {
            sample_rate: 1.92e6,
            subcarrier_spacing_khz: 30.,
            symbol_length_offset: 0,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(13);
        let reference = random_waveform(&mut rng, 400);
        let received = with_offset(&reference[..250], 30e3, config.sample_rate);

        let outcome = estimate_cfo(&received, &reference, &config, 60e3).unwrap();
        assert_eq!(outcome.result.offset_hz(), 30e3);
        assert_eq!(outcome.best_peak().index, 0);
        // Output keeps the length of the received capture, not the padded length
        assert_eq!(outcome.result.corrected().len(), 250);
    }

    #[test]
    fn single_reference_matches_one_entry_bank() {
        let config = PrsConfig::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(21);
        let reference = random_waveform(&mut rng, 300);
        let received = with_offset(&reference, 7.5e3, config.sample_rate);

        let single = estimate_cfo(&received, &reference, &config, 30e3).unwrap();
        let multi =
            estimate_cfo_and_prs_id(&received, &[reference.clone()], &[5], &config, 30e3)
                .unwrap();

        assert!(matches!(single.result, SearchResult::SingleReference { .. }));
        assert_eq!(multi.result.prs_id(), Some(5));
        assert_eq!(single.result.offset_hz(), multi.result.offset_hz());
        assert_eq!(single.result.corrected(), multi.result.corrected());
        assert_eq!(single.surface, multi.surface);
    }

    #[test]
    fn corrected_output_is_independent_of_input() {
        let config = PrsConfig::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let reference = random_waveform(&mut rng, 128);
        let received = reference.clone();

        let outcome = estimate_cfo(&received, &reference, &config, 15e3).unwrap();
        assert_eq!(outcome.result.offset_hz(), 0.);
        assert_eq!(received, reference);
        assert_ne!(outcome.result.corrected().as_ptr(), received.as_ptr());
    }

    #[test]
    fn tie_break_prefers_first_cell() {
        let surface = CorrelationSurface {
            frequencies_hz: vec![-1., 0., 1.],
            num_candidates: 2,
            cells: [1., 3., 3., 2., 0., 3.]
                .iter()
                .map(|&m| CorrelationPeak {
                    magnitude: m,
                    index: 0,
                })
                .collect(),
        };
        assert_eq!(surface.argmax(), (0, 1));
        assert_eq!(surface.row(1)[0].magnitude, 3.);
        assert_eq!(surface.magnitudes(1), vec![3., 2., 3.]);
    }

    #[test]
    fn all_zero_reference_is_degenerate() {
        let config = PrsConfig {
            symbol_length_offset: 4,
            ..PrsConfig::default()
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let received = random_waveform(&mut rng, 64);
        let bank = vec![vec![Complex::zero(); 64], vec![Complex::zero(); 32]];

        let outcome = estimate_cfo_and_prs_id(&received, &bank, &[3, 4], &config, 15e3).unwrap();
        assert!(outcome.is_degenerate());
        assert_eq!(outcome.result.offset_hz(), 0.);
        assert_eq!(outcome.result.prs_id(), Some(3));
        assert_eq!(outcome.best_peak().index, 4);
        assert!(matches!(
            outcome.into_checked(),
            Err(Error::NumericDegenerate)
        ));
    }

    #[test]
    fn huge_symbol_length_offset_saturates() {
        let config = PrsConfig {
            symbol_length_offset: usize::MAX,
            ..PrsConfig::default()
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);
        let reference = random_waveform(&mut rng, 64);
        let mut received = vec![Complex::zero(); 5];
        received.extend(&reference);

        let outcome = estimate_cfo(&received, &reference, &config, 7.5e3).unwrap();
        assert_eq!(outcome.result.offset_hz(), 0.);
        assert_eq!(outcome.best_peak().index, usize::MAX);
    }

    #[test]
    fn invalid_inputs_rejected() {
        let config = PrsConfig::default();
        let x = vec![Complex::new(1., 0.); 16];
        let empty: Vec<Complex<f64>> = Vec::new();

        let is_invalid = |r: Result<SearchOutcome>| matches!(r, Err(Error::InvalidInput(_)));

        assert!(is_invalid(estimate_cfo(&empty, &x, &config, 15e3)));
        assert!(is_invalid(estimate_cfo(&x, &empty, &config, 15e3)));
        assert!(is_invalid(estimate_cfo(&x, &x, &config, -1.)));
        assert!(is_invalid(estimate_cfo(&x, &x, &config, f64::NAN)));

        let bad_rate = PrsConfig {
            sample_rate: 0.,
            ..config.clone()
        };
        assert!(is_invalid(estimate_cfo(&x, &x, &bad_rate, 15e3)));
        let bad_scs = PrsConfig {
            subcarrier_spacing_khz: 0.,
            ..config.clone()
        };
        assert!(is_invalid(estimate_cfo(&x, &x, &bad_scs, 15e3)));

        let no_refs: Vec<Vec<Complex<f64>>> = Vec::new();
        assert!(is_invalid(estimate_cfo_and_prs_id(
            &x, &no_refs, &[], &config, 15e3
        )));
        assert!(is_invalid(estimate_cfo_and_prs_id(
            &x,
            &[x.clone(), x.clone()],
            &[1],
            &config,
            15e3
        )));
    }
}
