use crate::error::{invalid, Error, Result};
use crate::PrsId;
use num::Complex;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::path::{Path, PathBuf};

/// The read-only scalar bundle describing the transmitted PRS carrier
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PrsConfig {
    /// Sample rate of the captured waveforms (Hz)
    pub sample_rate: f64,
    /// OFDM subcarrier spacing (kHz)
    pub subcarrier_spacing_khz: f64,
    /// Added to every correlation peak lag recorded during the frequency search, to move it from
    /// the correlation output onto the symbol boundary
    #[serde(default)]
    pub symbol_length_offset: usize,
}

impl Default for PrsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 30.72e6,
            subcarrier_spacing_khz: 15.,
            symbol_length_offset: 0,
        }
    }
}

impl PrsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.) {
            return invalid(format!("sample rate must be positive, got {}", self.sample_rate));
        }
        if !(self.subcarrier_spacing_khz.is_finite() && self.subcarrier_spacing_khz > 0.) {
            return invalid(format!(
                "subcarrier spacing must be positive, got {}",
                self.subcarrier_spacing_khz
            ));
        }
        Ok(())
    }

    /// Frequency search step: half a subcarrier, in Hz
    pub fn grid_step_hz(&self) -> f64 {
        self.subcarrier_spacing_khz * 1e3 / 2.
    }
}

/// Range calibration terms measured at a known distance. The estimated range is corrected as
/// `range - d_est + d_cal`
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Calibration {
    /// Range estimated by the system at the calibration point (m)
    pub d_est: f64,
    /// True range at the calibration point (m)
    pub d_cal: f64,
}

/// Experiment description as stored on disk. Reference waveforms are given as filenames and read
/// by `filename_to_cplx_vec` when converting into `ExperimentConfig`
#[derive(Clone, Debug, Deserialize)]
pub struct ExperimentConfigDes {
    /// Folder containing `meas_param.json` and the raw I/Q captures
    pub meas_folder: String,
    /// Receiver position index to process
    pub position: u32,
    pub prs: PrsConfig,
    /// One file per candidate PRS identity
    pub reference_bank: Vec<String>,
    /// Identity of each entry in `reference_bank`. Defaults to `0, 1, ...`
    #[serde(default)]
    pub prs_ids: Option<Vec<PrsId>>,
    /// Search over the identities instead of deriving the identity from the TX beam
    #[serde(default)]
    pub prs_search: bool,
    /// Half-width of the frequency search (Hz). Defaults to ten search steps
    #[serde(default)]
    pub search_bandwidth_hz: Option<f64>,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub tx_position: Option<[f64; 2]>,
    #[serde(default)]
    pub rx_positions: Option<Vec<[f64; 2]>>,
}

impl ExperimentConfigDes {
    /// Make relative filenames relative to `base` (typically the directory of the config file)
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &str| -> String {
            let path = Path::new(p);
            if path.is_absolute() {
                p.to_string()
            } else {
                base.join(path).to_string_lossy().into_owned()
            }
        };
        self.meas_folder = resolve(&self.meas_folder);
        self.reference_bank = self.reference_bank.iter().map(|p| resolve(p)).collect();
    }
}

/// Experiment description with the reference bank loaded into memory
#[derive(Clone, Debug)]
pub struct ExperimentConfig {
    pub meas_folder: PathBuf,
    pub position: u32,
    pub prs: PrsConfig,
    pub reference_bank: Vec<Vec<Complex<f64>>>,
    pub prs_ids: Vec<PrsId>,
    pub prs_search: bool,
    pub search_bandwidth_hz: f64,
    pub calibration: Calibration,
    pub tx_position: Option<[f64; 2]>,
    pub rx_positions: Option<Vec<[f64; 2]>>,
}

impl TryFrom<ExperimentConfigDes> for ExperimentConfig {
    type Error = Error;

    fn try_from(des: ExperimentConfigDes) -> Result<Self> {
        des.prs.validate()?;
        if des.reference_bank.is_empty() {
            return invalid("reference bank is empty");
        }
        let default_bandwidth = 10. * des.prs.grid_step_hz();
        let prs_ids = match des.prs_ids {
            Some(ids) => ids,
            None => (0..des.reference_bank.len() as PrsId).collect(),
        };
        if prs_ids.len() != des.reference_bank.len() {
            return invalid(format!(
                "{} PRS ids given for {} reference waveforms",
                prs_ids.len(),
                des.reference_bank.len()
            ));
        }
        let search_bandwidth_hz = des.search_bandwidth_hz.unwrap_or(default_bandwidth);
        if !(search_bandwidth_hz.is_finite() && search_bandwidth_hz >= 0.) {
            return invalid(format!(
                "search bandwidth must be non-negative, got {}",
                search_bandwidth_hz
            ));
        }

        let reference_bank = des
            .reference_bank
            .iter()
            .map(|f| filename_to_cplx_vec(f))
            .collect::<Result<Vec<_>>>()?;
        log::info!(
            "Loaded {} reference waveforms ({} samples in the first)",
            reference_bank.len(),
            reference_bank[0].len()
        );

        Ok(Self {
            meas_folder: PathBuf::from(des.meas_folder),
            position: des.position,
            prs: des.prs,
            reference_bank,
            prs_ids,
            prs_search: des.prs_search,
            search_bandwidth_hz,
            calibration: des.calibration,
            tx_position: des.tx_position,
            rx_positions: des.rx_positions,
        })
    }
}

impl ExperimentConfig {
    /// Read a JSON experiment description. Relative filenames inside it are taken relative to the
    /// directory holding the file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut des: ExperimentConfigDes = serde_json::from_str(&text)?;
        if let Some(dir) = path.parent() {
            des.resolve_paths(dir);
        }
        Self::try_from(des)
    }

    /// Reference waveform belonging to PRS identity `id`
    pub fn reference_for(&self, id: PrsId) -> Option<&[Complex<f64>]> {
        self.prs_ids
            .iter()
            .position(|&x| x == id)
            .map(|i| self.reference_bank[i].as_slice())
    }

    /// Hand-measured line-of-sight distance between TX and the current RX position, if known
    pub fn true_range(&self) -> Option<f64> {
        let tx = self.tx_position?;
        let rx = self.rx_positions.as_ref()?.get(self.position as usize)?;
        Some(((rx[0] - tx[0]).powi(2) + (rx[1] - tx[1]).powi(2)).sqrt())
    }
}

/// The file storing a waveform is just a list of numbers, each on a separate line. Even entries
/// are the real part and odd ones are the imaginary part
pub fn filename_to_cplx_vec<P: AsRef<Path>>(fname: P) -> Result<Vec<Complex<f64>>> {
    let fname = fname.as_ref();
    let str_data = std::fs::read_to_string(fname)?;
    parse_cplx_lines(&str_data)
        .map_err(|e| Error::Parse(format!("{}: {}", fname.display(), e)))
}

fn parse_cplx_lines(str_data: &str) -> std::result::Result<Vec<Complex<f64>>, String> {
    let f64_data = str_data
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| {
            s.parse::<f64>()
                .map_err(|e| format!("value {} ({:?}): {}", i, s, e))
        })
        .collect::<std::result::Result<Vec<f64>, String>>()?;

    if f64_data.len() % 2 != 0 {
        return Err(format!(
            "odd number of values ({}), expected re/im pairs",
            f64_data.len()
        ));
    }
    Ok(f64_data
        .chunks_exact(2)
        .map(|c| Complex::new(c[0], c[1]))
        .collect())
}
