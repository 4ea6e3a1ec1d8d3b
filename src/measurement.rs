//! Raw I/Q captures from the beam-sweeping measurement setup.
//!
//! For every receiver position the I and Q parts are stored in two files of raw little-endian
//! `f64`, named `pos<position>_I...` and `pos<position>_Q...`. Samples are laid out as
//! `[block][tx beam][rx beam]`. The beam angles and block size live in `meas_param.json` next to
//! the captures.

use crate::error::{invalid, Error, Result};
use crate::PrsId;
use num::Complex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Number of distinct PRS identities; TX beams cycle through them
pub const NUM_PRS_IDS: usize = 63;

/// Receiver gain turning mean sample power into mW
const POWER_SCALE_MW: f64 = 14.;

/// Load impedance (ohm) used for the variance based power estimate
const LOAD_OHMS: f64 = 50.;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MeasParams {
    /// Samples captured per (tx, rx) beam pair
    pub block_size: usize,
    /// TX beam angles (degrees) in capture order
    pub tx_angles: Vec<f64>,
    /// RX beam angles (degrees) in capture order
    pub rx_angles: Vec<f64>,
}

/// One receiver position, translated into the local TX/RX frames: both beam axes are reversed
/// with respect to capture order and the angles negated
#[derive(Clone, Debug)]
pub struct Measurement {
    pub tx_angles: Vec<f64>,
    pub rx_angles: Vec<f64>,
    block_size: usize,
    /// `[tx][rx][block]`
    samples: Vec<Complex<f64>>,
}

impl Measurement {
    /// Reshape interleaved captures. `i` and `q` are in capture order, `[block][tx][rx]`
    pub fn from_raw(params: &MeasParams, i: &[f64], q: &[f64]) -> Result<Self> {
        let (num_tx, num_rx, block) = (
            params.tx_angles.len(),
            params.rx_angles.len(),
            params.block_size,
        );
        if num_tx == 0 || num_rx == 0 || block == 0 {
            return invalid("measurement parameters describe an empty capture");
        }
        if i.len() != q.len() {
            return invalid(format!(
                "I and Q captures differ in length ({} vs {})",
                i.len(),
                q.len()
            ));
        }
        if i.len() != block * num_tx * num_rx {
            return invalid(format!(
                "capture has {} samples, expected {} blocks of {} x {} beams",
                i.len(),
                block,
                num_tx,
                num_rx
            ));
        }

        let mut samples = Vec::with_capacity(i.len());
        for tx in 0..num_tx {
            for rx in 0..num_rx {
                let (src_tx, src_rx) = (num_tx - 1 - tx, num_rx - 1 - rx);
                for b in 0..block {
                    let k = b * num_tx * num_rx + src_tx * num_rx + src_rx;
                    samples.push(Complex::new(i[k], q[k]));
                }
            }
        }

        let flip = |angles: &[f64]| angles.iter().rev().map(|a| -a).collect::<Vec<_>>();
        Ok(Self {
            tx_angles: flip(&params.tx_angles),
            rx_angles: flip(&params.rx_angles),
            block_size: block,
            samples,
        })
    }

    pub fn num_tx(&self) -> usize {
        self.tx_angles.len()
    }

    pub fn num_rx(&self) -> usize {
        self.rx_angles.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Samples received on one beam pair
    pub fn waveform(&self, tx: usize, rx: usize) -> &[Complex<f64>] {
        assert!(tx < self.num_tx() && rx < self.num_rx());
        let start = (tx * self.num_rx() + rx) * self.block_size;
        &self.samples[start..start + self.block_size]
    }

    fn blocks(&self) -> impl Iterator<Item = &[Complex<f64>]> {
        self.samples.chunks_exact(self.block_size)
    }

    /// Mean received power per beam pair (mW)
    pub fn power_map(&self) -> PowerMap {
        let linear_mw = self
            .blocks()
            .map(|b| b.iter().map(|x| x.norm_sqr()).sum::<f64>() / b.len() as f64 * POWER_SCALE_MW)
            .collect();
        PowerMap {
            num_tx: self.num_tx(),
            num_rx: self.num_rx(),
            linear_mw,
        }
    }

    /// Power per beam pair (dBm) from the sample variance across a 50 ohm load. Unlike the rest
    /// of `Measurement` this is in capture beam order, indexed `[capture_tx * num_rx + capture_rx]`
    pub fn variance_power_dbm(&self) -> Vec<f64> {
        let mut power: Vec<f64> = self
            .blocks()
            .map(|b| {
                let n = b.len() as f64;
                let mean = b.iter().sum::<Complex<f64>>() / n;
                let var = b.iter().map(|x| (x - mean).norm_sqr()).sum::<f64>() / n;
                10. * (1000. / LOAD_OHMS * var).log10()
            })
            .collect();
        // Both beam axes are reversed, so local row-major order is capture order backwards
        power.reverse();
        power
    }
}

/// Received power for every (tx, rx) beam pair
#[derive(Clone, Debug, PartialEq)]
pub struct PowerMap {
    pub num_tx: usize,
    pub num_rx: usize,
    /// Row-major `[tx][rx]` (mW)
    pub linear_mw: Vec<f64>,
}

impl PowerMap {
    pub fn get(&self, tx: usize, rx: usize) -> f64 {
        self.linear_mw[tx * self.num_rx + rx]
    }

    pub fn db(&self) -> Vec<f64> {
        self.linear_mw.iter().map(|p| 10. * p.log10()).collect()
    }

    /// Beam pair `(tx, rx)` with the most power. Ties go to the first in row-major order
    pub fn strongest(&self) -> (usize, usize) {
        let mut best = 0;
        for (i, &p) in self.linear_mw.iter().enumerate() {
            if p > self.linear_mw[best] {
                best = i;
            }
        }
        (best / self.num_rx, best % self.num_rx)
    }
}

/// PRS identity transmitted on TX beam `tx_index` (in the local, reversed beam order)
pub fn prs_id_for_tx_beam(num_tx: usize, tx_index: usize) -> PrsId {
    ((num_tx - tx_index) % NUM_PRS_IDS) as PrsId
}

/// First file in `folder` (in name order) whose name starts with `prefix`
fn find_capture(folder: &Path, prefix: &str) -> Result<PathBuf> {
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    matches.into_iter().next().ok_or_else(|| {
        Error::InvalidInput(format!(
            "no file starting with {:?} in {}",
            prefix,
            folder.display()
        ))
    })
}

/// Raw little-endian `f64` values
pub fn read_f64_file(path: &Path) -> Result<Vec<f64>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 8 != 0 {
        return Err(Error::Parse(format!(
            "{}: length {} is not a whole number of f64 values",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect())
}

pub fn load_meas_params(folder: &Path) -> Result<MeasParams> {
    let text = std::fs::read_to_string(folder.join("meas_param.json"))?;
    Ok(serde_json::from_str(&text)?)
}

/// Load the capture of receiver position `position` from `folder`
pub fn load_iq_data(folder: &Path, position: u32) -> Result<Measurement> {
    let params = load_meas_params(folder)?;
    let i = read_f64_file(&find_capture(folder, &format!("pos{}_I", position))?)?;
    let q = read_f64_file(&find_capture(folder, &format!("pos{}_Q", position))?)?;
    let meas = Measurement::from_raw(&params, &i, &q)?;
    log::info!(
        "Position {}: {} TX x {} RX beams, {} samples each",
        position,
        meas.num_tx(),
        meas.num_rx(),
        meas.block_size()
    );
    Ok(meas)
}
