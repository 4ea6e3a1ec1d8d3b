//! Estimates the CFO, PRS identity and coarse line-of-sight range for one receiver position.
//!
//! The strongest (TX beam, RX beam) pair of the position is taken as the line-of-sight component.
//! Its PRS identity is either searched for over the whole reference bank or derived from the TX
//! beam index.

use clap::Parser;
use failure::{format_err, Error};
use prs_cfo::{
    estimate_cfo, estimate_cfo_and_prs_id, estimate_toa, load_iq_data, prs_id_for_tx_beam,
    ExperimentConfig,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// Experiment description (JSON)
    #[clap(short, long)]
    config: PathBuf,
    /// Process this receiver position instead of the one in the config
    #[clap(short, long)]
    position: Option<u32>,
    /// Write the correlation vs. frequency offset surface here (JSON)
    #[clap(long)]
    surface_out: Option<PathBuf>,
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ExperimentConfig::from_file(&args.config)?;
    if let Some(p) = args.position {
        config.position = p;
    }

    let meas = load_iq_data(&config.meas_folder, config.position)?;
    let power = meas.power_map();
    let (tx, rx) = power.strongest();
    println!(
        "Strongest component: TX beam {} ({} deg), RX beam {} ({} deg), {:.2} dBm",
        tx,
        meas.tx_angles[tx],
        rx,
        meas.rx_angles[rx],
        power.db()[tx * power.num_rx + rx]
    );
    let received = meas.waveform(tx, rx);

    let outcome = if config.prs_search {
        estimate_cfo_and_prs_id(
            received,
            &config.reference_bank,
            &config.prs_ids,
            &config.prs,
            config.search_bandwidth_hz,
        )?
    } else {
        let id = prs_id_for_tx_beam(meas.num_tx(), tx);
        let reference = config
            .reference_for(id)
            .ok_or_else(|| format_err!("no reference waveform for PRS id {}", id))?;
        estimate_cfo(received, reference, &config.prs, config.search_bandwidth_hz)?
    };

    if let Some(path) = &args.surface_out {
        std::fs::write(path, serde_json::to_string_pretty(&outcome.surface)?)?;
    }

    let prs_id = match outcome.result.prs_id() {
        Some(id) => id,
        None => prs_id_for_tx_beam(meas.num_tx(), tx),
    };
    let offset_hz = outcome.result.offset_hz();
    let reference = config
        .reference_for(prs_id)
        .ok_or_else(|| format_err!("no reference waveform for PRS id {}", prs_id))?;
    let toa = estimate_toa(
        outcome.result.corrected(),
        reference,
        &config.prs,
        &config.calibration,
    )?;

    println!("PRS id: {}", prs_id);
    println!("Frequency offset: {} kHz", offset_hz / 1e3);
    println!("Correlation peak: sample {} ({} s)", toa.lag, toa.delay_s);
    println!("Coarse range estimate (LoS): {} m", toa.range_m);
    if let Some(d) = config.true_range() {
        println!("True LoS range: {} m (subject to hand measurement errors)", d);
    }

    Ok(())
}
