use anyhow::Result;
use clap::Parser;
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use photon_transport_common::{SimulationConfig, SimulationOutput};
use photon_transport_engine::database::pmc_post_process;
use photon_transport_engine::tissue::MultiLayerTissue;
use photon_transport_engine::{run_parallel, run_serial};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the simulation config.toml
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run on the calling thread with a single MT19937 generator
    #[arg(long)]
    serial: bool,

    /// Re-tally the configured detectors from an existing photon database instead of transporting
    #[arg(long)]
    post_process: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting Photon Transport Engine...");

    // --- Load Configuration ---
    let config = SimulationConfig::load(&args.config)?;
    info!(
        "Loaded {} ({} photons, {:?} weighting, {:?} phase function, {} layers)",
        args.config.display(),
        config.simulation.photon_count,
        config.simulation.absorption_weighting,
        config.simulation.phase_function,
        config.tissue.layers.len()
    );
    debug!("Configuration: {:#?}", config);

    let output = match &args.post_process {
        Some(database) => post_process(&config, database)?,
        None => transport(&config, args.serial)?,
    };

    for detector in &output.detectors {
        let errors = detector.standard_error(output.photon_count);
        if detector.mean.len() == 1 {
            info!("{:>12}: {:.6} +/- {:.6} ({} tallies)", detector.name, detector.mean[0], errors[0], detector.tally_count);
        } else {
            info!("{:>12}: {} bins ({} tallies)", detector.name, detector.mean.len(), detector.tally_count);
        }
    }

    // --- Save Results ---
    let base = &config.output.base_filename;
    let output_format = config.output.format.as_deref().unwrap_or("json");
    save_results(&output, base, output_format);

    if config.output.save_summary_csv {
        let filename = format!("{}_summary.csv", base);
        match write_summary_csv(&output, &filename) {
            Ok(()) => info!("Summary saved to {}", filename),
            Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
        }
    } else {
        info!("Skipping CSV summary as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn transport(config: &SimulationConfig, serial: bool) -> Result<SimulationOutput> {
    let database = config.output.write_database.then(|| PathBuf::from(format!("{}_photons.bin", config.output.base_filename)));

    if serial || database.is_some() {
        if !serial {
            warn!("The photon database is written by the serial loop only; running serially.");
        }
        info!("Running serially.");
        Ok(run_serial(config, database.as_deref())?)
    } else {
        info!("Using {} Rayon threads.", rayon::current_num_threads());
        Ok(run_parallel(config)?)
    }
}

fn post_process(config: &SimulationConfig, database: &Path) -> Result<SimulationOutput> {
    let start = Instant::now();
    let tissue = MultiLayerTissue::from_config(&config.tissue, config.simulation.absorption_weighting)?;
    let (header, detectors) = pmc_post_process(database, &tissue, &config.detectors)?;
    Ok(SimulationOutput {
        photon_count: header.photon_count,
        seed: header.seed,
        workers: 1,
        elapsed_seconds: start.elapsed().as_secs_f64(),
        detectors,
    })
}

fn save_results(output: &SimulationOutput, base: &str, output_format: &str) {
    match output_format {
        "bincode" => {
            let filename = format!("{}_results.bin", base);
            match File::create(&filename) {
                Ok(file) => match bincode::serialize_into(file, output) {
                    Ok(_) => info!("Results saved to {} (binary format)", filename),
                    Err(e) => error!("Error serializing results to bincode: {}", e),
                },
                Err(e) => error!("Error creating results file '{}': {}", filename, e),
            }
        }
        "messagepack" => {
            let filename = format!("{}_results.msgpack", base);
            match &mut File::create(&filename) {
                Ok(file) => match rmp_serde::encode::write(file, output) {
                    Ok(_) => info!("Results saved to {} (MessagePack format)", filename),
                    Err(e) => error!("Error serializing results to MessagePack: {}", e),
                },
                Err(e) => error!("Error creating results file '{}': {}", filename, e),
            }
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_results.json", base);
            match File::create(&filename) {
                Ok(mut file) => match serde_json::to_string_pretty(output) {
                    Ok(json_string) => {
                        if let Err(e) = file.write_all(json_string.as_bytes()) {
                            error!("Error writing results JSON to file '{}': {}", filename, e);
                        } else {
                            info!("Results saved to {}", filename);
                        }
                    }
                    Err(e) => error!("Error serializing results to JSON: {}", e),
                },
                Err(e) => error!("Error creating results file '{}': {}", filename, e),
            }
        }
    }
}

/// One row per detector bin.
fn write_summary_csv(output: &SimulationOutput, filename: &str) -> Result<()> {
    let mut writer = csv::Writer::from_path(filename)?;
    writer.write_record(["detector", "bin", "mean", "second_moment", "standard_error", "tally_count"])?;
    for detector in &output.detectors {
        let errors = detector.standard_error(output.photon_count);
        for (bin, ((mean, m2), se)) in detector.mean.iter().zip(&detector.second_moment).zip(&errors).enumerate() {
            writer.write_record(&[
                detector.name.clone(),
                bin.to_string(),
                format!("{:.8e}", mean),
                format!("{:.8e}", m2),
                format!("{:.8e}", se),
                detector.tally_count.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}
