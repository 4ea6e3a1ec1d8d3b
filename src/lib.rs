//! Carrier frequency offset and PRS identity estimation for beam-swept positioning measurements.
//!
//! A capture is taken for every (TX beam, RX beam) pair at each receiver position. The transmitter
//! sends a known Positioning Reference Signal (PRS) whose identity depends on the TX beam. For a
//! chosen capture we:
//!
//!  - search a grid of frequency offsets, spaced half a subcarrier apart, for the one that makes
//!    the capture correlate best with the reference (optionally also searching over the bank of
//!    PRS identities), see `search`
//!  - correlate the corrected capture against the reference again to get a coarse time of
//!    arrival, and convert it to a calibrated range, see `toa`
//!
//! Loading the raw captures and computing angular power maps lives in `measurement`.

pub mod cfo;
pub mod config;
pub mod correlate;
mod error;
pub mod measurement;
pub mod search;
pub mod toa;

/// Identity of a Positioning Reference Signal
pub type PrsId = u32;

pub use cfo::{derotate, FrequencyGrid};
pub use config::{Calibration, ExperimentConfig, PrsConfig};
pub use error::{Error, Result};
pub use measurement::{load_iq_data, prs_id_for_tx_beam, Measurement, PowerMap};
pub use search::{
    estimate_cfo, estimate_cfo_and_prs_id, CorrelationSurface, SearchOutcome, SearchResult,
};
pub use toa::{estimate_toa, ToaEstimate};
