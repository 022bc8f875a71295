use std::collections::HashMap;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use photon_transport_common::{DetectorConfig, DetectorResult, SimParams, SimulationConfig, SimulationOutput};
use rand::RngCore;

use crate::database::{BiographyWriter, DatabaseHeader};
use crate::detector::{build_detectors, Detector};
use crate::error::{Result, TransportError};
use crate::history::PhotonHistory;
use crate::phase_function::PhaseFunction;
use crate::photon::{Photon, PhotonState};
use crate::source::{DirectionalPointSource, Source};
use crate::stream_rng::Mt19937;
use crate::tissue::{MultiLayerTissue, Tissue};

/// Everything a run shares read-only between photons and workers.
#[derive(Debug, Clone)]
pub struct TransportSetup {
    pub params: SimParams,
    pub tissue: MultiLayerTissue,
    pub source: DirectionalPointSource,
    pub phase_function: PhaseFunction,
    pub detectors: Vec<DetectorConfig>,
}

impl TransportSetup {
    /// Builds the run from a loaded configuration. Unsupported detector/weighting
    /// combinations are rejected here, before any photon is launched.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        let params = config.get_sim_params();
        let tissue = MultiLayerTissue::from_config(&config.tissue, params.absorption_weighting)?;
        let source = DirectionalPointSource::from_config(&config.source)?;
        let phase_function = PhaseFunction::from_config(params.phase_function, &config.tissue)?;
        build_detectors(&config.detectors, &tissue)?;

        debug!("Transport parameters: {:#?}", params);
        Ok(TransportSetup { params, tissue, source, phase_function, detectors: config.detectors.clone() })
    }
}

/// Maps the configured seed to a generator seed; negative values derive one from the clock.
pub fn resolve_seed(seed: i64) -> u32 {
    if seed < 0 {
        let derived = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0);
        warn!("Negative seed requested; using time-derived seed {}. The run is not reproducible.", derived);
        return derived;
    }
    if seed > u32::MAX as i64 {
        warn!("Seed {} exceeds 32 bits; using its low 32 bits.", seed);
    }
    seed as u32
}

/// Serial transport loop for one generator.
pub struct MonteCarloSimulation<'a, R: RngCore> {
    setup: &'a TransportSetup,
    detectors: Vec<Box<dyn Detector>>,
    rng: R,
    outcomes: HashMap<PhotonState, u64>,
}

impl<'a, R: RngCore> MonteCarloSimulation<'a, R> {
    pub fn new(setup: &'a TransportSetup, rng: R) -> Result<Self> {
        let detectors = build_detectors(&setup.detectors, &setup.tissue)?;
        Ok(MonteCarloSimulation { setup, detectors, rng, outcomes: HashMap::new() })
    }

    /// Transports one photon from launch to a terminal state.
    pub fn transport_photon(&mut self) -> Result<PhotonHistory> {
        let setup = self.setup;
        let tissue: &dyn Tissue = &setup.tissue;
        let launch = setup.source.launch(&mut self.rng);
        let mut photon = Photon::new(launch.position, launch.direction, tissue, &setup.params, &setup.phase_function);

        loop {
            photon.set_step_size(&mut self.rng);
            let distance = tissue.distance_to_boundary(photon.dp.position, photon.dp.direction, photon.current_region());
            if distance.is_nan() || (distance.is_infinite() && photon.step_size().is_infinite()) {
                return Err(TransportError::degenerate(format!(
                    "no boundary and no collision ahead of {:?} along {:?} in region {}",
                    photon.dp.position,
                    photon.dp.direction,
                    photon.current_region()
                )));
            }

            let hit_boundary = photon.move_to_next_event(distance);
            if hit_boundary {
                photon.cross_region_or_reflect(&mut self.rng);
            } else {
                photon.absorb(&mut self.rng);
                if photon.dp.state != PhotonState::Absorbed {
                    photon.scatter(&mut self.rng);
                }
            }
            photon.test_death(&mut self.rng);
            if !photon.is_alive() {
                break;
            }
        }

        *self.outcomes.entry(photon.dp.state).or_insert(0) += 1;
        Ok(photon.into_history())
    }

    /// Transports `photon_count` photons, tallying each and optionally storing its biography.
    pub fn run(&mut self, photon_count: u64, mut database: Option<&mut BiographyWriter>) -> Result<()> {
        let setup = self.setup;
        let tissue: &dyn Tissue = &setup.tissue;
        for _ in 0..photon_count {
            let history = self.transport_photon()?;
            for detector in self.detectors.iter_mut() {
                detector.tally(&history, tissue)?;
            }
            if let Some(db) = database.as_deref_mut() {
                db.write(&history)?;
            }
        }
        debug!("Photon outcomes: {:?}", self.outcomes);
        Ok(())
    }

    pub fn outcomes(&self) -> &HashMap<PhotonState, u64> {
        &self.outcomes
    }

    pub fn results(&self, photon_count: u64) -> Vec<DetectorResult> {
        self.detectors.iter().map(|d| d.result(photon_count)).collect()
    }
}

/// Runs the whole photon budget on the calling thread with an MT19937 generator.
pub fn run_serial(config: &SimulationConfig, database_path: Option<&Path>) -> Result<SimulationOutput> {
    let setup = TransportSetup::from_config(config)?;
    let photon_count = config.simulation.photon_count;
    let seed = resolve_seed(config.simulation.seed);
    info!("Serial run: {} photons, seed {}", photon_count, seed);

    let start = Instant::now();
    let mut sim = MonteCarloSimulation::new(&setup, Mt19937::new(seed))?;

    match database_path {
        Some(path) => {
            let header = DatabaseHeader { photon_count, region_count: setup.tissue.regions().len(), seed };
            let mut db = BiographyWriter::create(path, header)?;
            sim.run(photon_count, Some(&mut db))?;
            let written = db.finish()?;
            info!("Wrote {} photon biographies to {}", written, path.display());
        }
        None => sim.run(photon_count, None)?,
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!("Serial run finished in {:.3} s", elapsed);
    Ok(SimulationOutput {
        photon_count,
        seed,
        workers: 1,
        elapsed_seconds: elapsed,
        detectors: sim.results(photon_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLAB: &str = r#"
        [simulation]
        photon_count = 200
        seed = 1

        [[tissue.layers]]
        z_start = -inf
        z_stop = 0.0
        mua = 0.0
        mus = 1e-10
        g = 1.0
        n = 1.0

        [[tissue.layers]]
        z_start = 0.0
        z_stop = 2.0
        mua = 0.1
        mus = 1.0
        g = 0.8
        n = 1.4

        [[tissue.layers]]
        z_start = 2.0
        z_stop = inf
        mua = 0.0
        mus = 1e-10
        g = 1.0
        n = 1.0

        [output]
        base_filename = "unit"
    "#;

    #[test]
    fn every_photon_ends_in_one_terminal_state() {
        let config = SimulationConfig::from_toml_str(SLAB).unwrap();
        let setup = TransportSetup::from_config(&config).unwrap();
        let mut sim = MonteCarloSimulation::new(&setup, Mt19937::new(3)).unwrap();
        for _ in 0..200 {
            let history = sim.transport_photon().unwrap();
            let last = history.last_point().unwrap();
            assert!(!last.state.is_alive());
            assert!(history.data_points[..history.len() - 1].iter().all(|dp| dp.state.is_alive()));
            assert!(history.data_points.iter().all(|dp| dp.weight >= 0.0 && dp.weight <= 1.0));
            assert!(history.steps().all(|(a, b)| b.weight <= a.weight));
        }
        assert_eq!(sim.outcomes().values().sum::<u64>(), 200);
    }

    #[test]
    fn same_seed_reproduces_results() {
        let config = SimulationConfig::from_toml_str(SLAB).unwrap();
        let a = run_serial(&config, None).unwrap();
        let b = run_serial(&config, None).unwrap();
        assert_eq!(a.detectors, b.detectors);
        assert_eq!(a.seed, 1);
    }

    #[test]
    fn sideways_photon_in_empty_layer_is_degenerate() {
        let empty = SLAB.replacen("mua = 0.1", "mua = 0.0", 1).replacen("mus = 1.0", "mus = 0.0", 1);
        let config = SimulationConfig::from_toml_str(&format!(
            "{}\n[source]\nposition = [0.0, 0.0, 1.0]\ndirection = [1.0, 0.0, 0.0]\n",
            empty
        ))
        .unwrap();
        let setup = TransportSetup::from_config(&config).unwrap();
        let mut sim = MonteCarloSimulation::new(&setup, Mt19937::new(3)).unwrap();
        assert!(matches!(sim.transport_photon(), Err(TransportError::DegenerateGeometry(_))));
    }

    #[test]
    fn resolve_seed_keeps_non_negative_values() {
        assert_eq!(resolve_seed(0), 0);
        assert_eq!(resolve_seed(4172), 4172);
        assert_eq!(resolve_seed(u32::MAX as i64 + 2), 1);
    }
}
