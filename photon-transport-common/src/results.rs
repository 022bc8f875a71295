use serde::{Deserialize, Serialize};

/// What a detector accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TallyType {
    /// Scored from the terminal data point of each photon.
    Termination,
    /// Scored from every step of each photon's history.
    History,
    /// Scored from per-region collision info, reweighted for perturbed optical properties.
    Perturbation,
}

/// Normalized statistics of one detector after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    /// Detector identity, e.g. "RDiffuse".
    pub name: String,
    pub tally_type: TallyType,
    /// Mean per launched photon, one entry per bin (scalar detectors have one bin).
    pub mean: Vec<f64>,
    /// Second moment per launched photon, same binning as `mean`.
    pub second_moment: Vec<f64>,
    /// Number of photons that contributed.
    pub tally_count: u64,
}

impl DetectorResult {
    /// Standard error of the mean for each bin given the photon count.
    pub fn standard_error(&self, photon_count: u64) -> Vec<f64> {
        if photon_count == 0 {
            return vec![0.0; self.mean.len()];
        }
        let n = photon_count as f64;
        self.mean
            .iter()
            .zip(&self.second_moment)
            .map(|(m, m2)| ((m2 - m * m).max(0.0) / n).sqrt())
            .collect()
    }
}

/// Everything a run produces, as saved to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub photon_count: u64,
    pub seed: u32,
    pub workers: usize,
    pub elapsed_seconds: f64,
    pub detectors: Vec<DetectorResult>,
}

impl SimulationOutput {
    /// Looks up a detector by name.
    pub fn detector(&self, name: &str) -> Option<&DetectorResult> {
        self.detectors.iter().find(|d| d.name == name)
    }

    /// First bin of a named detector, for scalar tallies.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.detector(name).and_then(|d| d.mean.first().copied())
    }
}
