use std::time::Instant;

use log::{debug, info, warn};
use photon_transport_common::{DetectorResult, SimulationConfig, SimulationOutput};
use rayon::prelude::*;

use crate::error::{Result, TransportError};
use crate::simulation::{resolve_seed, MonteCarloSimulation, TransportSetup};
use crate::stream_rng::{search_stream_parameters, StreamGenerator, StreamParameters};

/// Worker slots for a run: the request bounded by the thread pool, or the whole pool for 0.
pub fn worker_count(requested: usize) -> usize {
    let available = rayon::current_num_threads().max(1);
    if requested == 0 {
        available
    } else {
        requested.min(available)
    }
}

/// Even split of the photon budget; the first `total % workers` workers run one extra photon.
pub fn split_photons(total: u64, workers: usize) -> Result<Vec<u64>> {
    if workers == 0 {
        return Err(TransportError::configuration("at least one worker is required"));
    }
    let w = workers as u64;
    if total < w {
        return Err(TransportError::configuration(format!(
            "photon count {} is smaller than the worker count {}",
            total, workers
        )));
    }
    let base = total / w;
    let remainder = total % w;
    if remainder != 0 {
        warn!(
            "{} photons do not divide evenly over {} workers; the first {} workers run {} photons",
            total,
            workers,
            remainder,
            base + 1
        );
    }
    Ok((0..w).map(|i| base + u64::from(i < remainder)).collect())
}

/// Combines per-worker results: means and second moments are averaged without
/// weighting by worker photon count, tally counts are summed.
pub fn merge_results(per_worker: &[Vec<DetectorResult>]) -> Vec<DetectorResult> {
    let Some(first) = per_worker.first() else {
        return Vec::new();
    };
    let workers = per_worker.len() as f64;

    first
        .iter()
        .enumerate()
        .map(|(j, template)| {
            let mut merged = DetectorResult {
                name: template.name.clone(),
                tally_type: template.tally_type,
                mean: vec![0.0; template.mean.len()],
                second_moment: vec![0.0; template.second_moment.len()],
                tally_count: 0,
            };
            for result in per_worker.iter().filter_map(|worker| worker.get(j)) {
                for (m, v) in merged.mean.iter_mut().zip(&result.mean) {
                    *m += v / workers;
                }
                for (m, v) in merged.second_moment.iter_mut().zip(&result.second_moment) {
                    *m += v / workers;
                }
                merged.tally_count += result.tally_count;
            }
            merged
        })
        .collect()
}

/// Independent serial loops, one per stream, joined before aggregation.
pub struct ParallelMonteCarloSimulation<'a> {
    setup: &'a TransportSetup,
    streams: Vec<StreamParameters>,
    photon_counts: Vec<u64>,
    seed: u32,
}

impl<'a> ParallelMonteCarloSimulation<'a> {
    pub fn new(setup: &'a TransportSetup, streams: Vec<StreamParameters>, photon_count: u64, seed: u32) -> Result<Self> {
        let photon_counts = split_photons(photon_count, streams.len())?;
        Ok(ParallelMonteCarloSimulation { setup, streams, photon_counts, seed })
    }

    pub fn workers(&self) -> usize {
        self.streams.len()
    }

    pub fn photon_counts(&self) -> &[u64] {
        &self.photon_counts
    }

    /// Per-worker detector results, in worker order.
    pub fn run_workers(&self) -> Result<Vec<Vec<DetectorResult>>> {
        self.streams
            .par_iter()
            .zip(self.photon_counts.par_iter())
            .map(|(params, &count)| -> Result<Vec<DetectorResult>> {
                let rng = StreamGenerator::new(params.clone(), self.seed)?;
                let mut sim = MonteCarloSimulation::new(self.setup, rng)?;
                sim.run(count, None)?;
                let results = sim.results(count);
                debug!("Worker {} finished {} photons: {:?}", params.id, count, sim.outcomes());
                Ok(results)
            })
            .collect()
    }

    pub fn run(&self) -> Result<Vec<DetectorResult>> {
        let per_worker = self.run_workers()?;
        Ok(merge_results(&per_worker))
    }
}

/// Runs the photon budget over a rayon worker pool, one generator stream per worker.
pub fn run_parallel(config: &SimulationConfig) -> Result<SimulationOutput> {
    let setup = TransportSetup::from_config(config)?;
    let run = &config.simulation;
    let photon_count = run.photon_count;
    let seed = resolve_seed(run.seed);
    let mut workers = worker_count(run.workers);
    if run.workers > workers {
        warn!("{} workers requested, only {} threads available", run.workers, workers);
    }
    if (workers as u64) > photon_count {
        warn!("Only {} photons for {} workers; running {} workers", photon_count, workers, photon_count);
        workers = photon_count as usize;
    }

    let start = Instant::now();
    let streams = search_stream_parameters(
        run.rng_word_length as usize,
        run.rng_period_exponent as usize,
        0..workers as u32,
        run.rng_search_seed,
    )?;
    info!(
        "Parallel run: {} photons over {} workers, seed {}, stream search took {:.3} s",
        photon_count,
        workers,
        seed,
        start.elapsed().as_secs_f64()
    );

    let sim = ParallelMonteCarloSimulation::new(&setup, streams, photon_count, seed)?;
    let detectors = sim.run()?;

    let elapsed = start.elapsed().as_secs_f64();
    info!("Parallel run finished in {:.3} s", elapsed);
    Ok(SimulationOutput { photon_count, seed, workers, elapsed_seconds: elapsed, detectors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon_transport_common::TallyType;

    fn result(mean: f64, count: u64) -> DetectorResult {
        DetectorResult {
            name: "RDiffuse".to_string(),
            tally_type: TallyType::Termination,
            mean: vec![mean],
            second_moment: vec![mean * 2.0],
            tally_count: count,
        }
    }

    #[test]
    fn split_hands_remainder_to_first_workers() {
        assert_eq!(split_photons(10, 3).unwrap(), vec![4, 3, 3]);
        assert_eq!(split_photons(9, 3).unwrap(), vec![3, 3, 3]);
        assert_eq!(split_photons(10, 3).unwrap().iter().sum::<u64>(), 10);
    }

    #[test]
    fn split_rejects_too_few_photons() {
        assert!(matches!(split_photons(2, 3), Err(TransportError::Configuration(_))));
        assert!(split_photons(5, 0).is_err());
    }

    #[test]
    fn merge_averages_means_and_sums_counts() {
        let merged = merge_results(&[vec![result(0.2, 10)], vec![result(0.4, 30)]]);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].mean[0] - 0.3).abs() < 1e-15);
        assert!((merged[0].second_moment[0] - 0.6).abs() < 1e-15);
        assert_eq!(merged[0].tally_count, 40);
        assert!(merge_results(&[]).is_empty());
    }

    #[test]
    fn tiny_photon_budget_runs_on_fewer_workers() {
        let config = SimulationConfig::from_toml_str(
            r#"
            [simulation]
            photon_count = 1
            seed = 3
            workers = 64

            [[tissue.layers]]
            z_start = -inf
            z_stop = 0.0
            mua = 0.0
            mus = 1e-10
            g = 1.0
            n = 1.0

            [[tissue.layers]]
            z_start = 0.0
            z_stop = 1.0
            mua = 0.1
            mus = 1.0
            g = 0.9
            n = 1.4

            [[tissue.layers]]
            z_start = 1.0
            z_stop = inf
            mua = 0.0
            mus = 1e-10
            g = 1.0
            n = 1.0

            [output]
            base_filename = "tiny"
            "#,
        )
        .unwrap();
        let output = run_parallel(&config).unwrap();
        assert_eq!(output.workers, 1);
        assert_eq!(output.photon_count, 1);
    }

    #[test]
    fn worker_count_is_bounded_by_pool() {
        let available = rayon::current_num_threads();
        assert_eq!(worker_count(0), available);
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(available + 5), available);
    }
}
