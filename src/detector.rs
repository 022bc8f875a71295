//! Detectors scoring finished photons.
//!
//! Termination detectors read the terminal data point, the absorption
//! detector walks every step of the track, and perturbation detectors read
//! the per-region collision info.

use std::f64::consts::PI;

use photon_transport_common::{DetectorConfig, DetectorResult, OpticalProperties, TallyType};

use crate::absorption::{PerturbationWeighting, VolumeAbsorptionWeighting};
use crate::error::{Result, TransportError};
use crate::history::PhotonHistory;
use crate::photon::{ExitBoundary, PhotonDataPoint, PhotonState};
use crate::tissue::Tissue;

pub trait Detector: Send {
    fn name(&self) -> &str;

    fn tally_type(&self) -> TallyType;

    /// Scores one finished photon.
    fn tally(&mut self, history: &PhotonHistory, tissue: &dyn Tissue) -> Result<()>;

    /// Statistics per launched photon.
    fn result(&self, photon_count: u64) -> DetectorResult;
}

/// Running first and second moments per bin.
#[derive(Debug, Clone)]
struct Accumulator {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    count: u64,
}

impl Accumulator {
    fn new(bins: usize) -> Self {
        Accumulator { sum: vec![0.0; bins], sum_sq: vec![0.0; bins], count: 0 }
    }

    fn add(&mut self, bin: usize, value: f64) {
        self.sum[bin] += value;
        self.sum_sq[bin] += value * value;
        self.count += 1;
    }

    /// Divides bin `i` by `photon_count * norm(i)`, and its second moment by `photon_count * norm(i)^2`.
    fn finish(&self, name: &str, tally_type: TallyType, photon_count: u64, norm: impl Fn(usize) -> f64) -> DetectorResult {
        let n = photon_count.max(1) as f64;
        let mean = self.sum.iter().enumerate().map(|(i, s)| s / (n * norm(i))).collect();
        let second_moment = self
            .sum_sq
            .iter()
            .enumerate()
            .map(|(i, s)| s / (n * norm(i) * norm(i)))
            .collect();
        DetectorResult { name: name.to_string(), tally_type, mean, second_moment, tally_count: self.count }
    }
}

fn terminal_exit(history: &PhotonHistory) -> Option<(ExitBoundary, f64, &PhotonDataPoint)> {
    let dp = history.last_point()?;
    match dp.state {
        PhotonState::ExitedDomain(boundary) => Some((boundary, dp.weight, dp)),
        _ => None,
    }
}

/// Total weight leaving through one exit surface (RSpecular, RDiffuse, TDiffuse).
#[derive(Debug, Clone)]
pub struct ExitDetector {
    name: &'static str,
    boundary: ExitBoundary,
    acc: Accumulator,
}

impl ExitDetector {
    pub fn new(boundary: ExitBoundary) -> Self {
        let name = match boundary {
            ExitBoundary::SpecularReflectance => "RSpecular",
            ExitBoundary::DiffuseReflectance => "RDiffuse",
            ExitBoundary::DiffuseTransmittance => "TDiffuse",
        };
        ExitDetector { name, boundary, acc: Accumulator::new(1) }
    }
}

impl Detector for ExitDetector {
    fn name(&self) -> &str {
        self.name
    }

    fn tally_type(&self) -> TallyType {
        TallyType::Termination
    }

    fn tally(&mut self, history: &PhotonHistory, _tissue: &dyn Tissue) -> Result<()> {
        if let Some((boundary, weight, _)) = terminal_exit(history) {
            if boundary == self.boundary {
                self.acc.add(0, weight);
            }
        }
        Ok(())
    }

    fn result(&self, photon_count: u64) -> DetectorResult {
        self.acc.finish(self.name, TallyType::Termination, photon_count, |_| 1.0)
    }
}

/// Diffuse reflectance binned by radial distance from the source axis, per unit area.
#[derive(Debug, Clone)]
pub struct ROfRhoDetector {
    rho_max: f64,
    bin_width: f64,
    acc: Accumulator,
}

impl ROfRhoDetector {
    pub fn new(rho_max: f64, bins: usize) -> Result<Self> {
        if !(rho_max > 0.0) || bins == 0 {
            return Err(TransportError::configuration("ROfRho needs rho_max > 0 and at least one bin"));
        }
        Ok(ROfRhoDetector { rho_max, bin_width: rho_max / bins as f64, acc: Accumulator::new(bins) })
    }

    /// Area of the annulus of bin `i`.
    fn bin_area(&self, i: usize) -> f64 {
        let center = (i as f64 + 0.5) * self.bin_width;
        2.0 * PI * center * self.bin_width
    }
}

impl Detector for ROfRhoDetector {
    fn name(&self) -> &str {
        "ROfRho"
    }

    fn tally_type(&self) -> TallyType {
        TallyType::Termination
    }

    fn tally(&mut self, history: &PhotonHistory, _tissue: &dyn Tissue) -> Result<()> {
        if let Some((ExitBoundary::DiffuseReflectance, weight, dp)) = terminal_exit(history) {
            let rho = dp.position.rho();
            if rho < self.rho_max {
                let bin = ((rho / self.bin_width) as usize).min(self.acc.sum.len() - 1);
                self.acc.add(bin, weight);
            }
        }
        Ok(())
    }

    fn result(&self, photon_count: u64) -> DetectorResult {
        self.acc.finish("ROfRho", TallyType::Termination, photon_count, |i| self.bin_area(i))
    }
}

/// Total absorbed weight scored along the whole track.
#[derive(Debug, Clone)]
pub struct ATotalDetector {
    weighting: VolumeAbsorptionWeighting,
    acc: Accumulator,
}

impl ATotalDetector {
    pub fn new(weighting: VolumeAbsorptionWeighting) -> Self {
        ATotalDetector { weighting, acc: Accumulator::new(1) }
    }
}

impl Detector for ATotalDetector {
    fn name(&self) -> &str {
        "ATotal"
    }

    fn tally_type(&self) -> TallyType {
        TallyType::History
    }

    fn tally(&mut self, history: &PhotonHistory, tissue: &dyn Tissue) -> Result<()> {
        let regions = tissue.regions();
        let mut absorbed = 0.0;
        for (previous, dp) in history.steps() {
            let region = tissue.region_index(dp.position);
            absorbed += self.weighting.contribution(previous, dp, &regions[region].ops);
        }
        if absorbed > 0.0 {
            self.acc.add(0, absorbed);
        }
        Ok(())
    }

    fn result(&self, photon_count: u64) -> DetectorResult {
        self.acc.finish("ATotal", TallyType::History, photon_count, |_| 1.0)
    }
}

/// Diffuse reflectance predicted for perturbed optical properties from reference tracks.
#[derive(Debug, Clone)]
pub struct PmcRDiffuseDetector {
    weighting: PerturbationWeighting,
    perturbed_regions: Vec<usize>,
    perturbed_ops: Vec<OpticalProperties>,
    acc: Accumulator,
}

impl PmcRDiffuseDetector {
    pub fn new(
        weighting: PerturbationWeighting,
        perturbed_regions: Vec<usize>,
        perturbed_ops: Vec<OpticalProperties>,
    ) -> Self {
        PmcRDiffuseDetector { weighting, perturbed_regions, perturbed_ops, acc: Accumulator::new(1) }
    }
}

impl Detector for PmcRDiffuseDetector {
    fn name(&self) -> &str {
        "pMCRDiffuse"
    }

    fn tally_type(&self) -> TallyType {
        TallyType::Perturbation
    }

    fn tally(&mut self, history: &PhotonHistory, tissue: &dyn Tissue) -> Result<()> {
        if let Some((ExitBoundary::DiffuseReflectance, weight, _)) = terminal_exit(history) {
            let reference_ops: Vec<OpticalProperties> = tissue.regions().iter().map(|r| r.ops).collect();
            let factor = self.weighting.weight_factor(
                &history.sub_region_info,
                &self.perturbed_ops,
                &reference_ops,
                &self.perturbed_regions,
            );
            self.acc.add(0, weight * factor);
        }
        Ok(())
    }

    fn result(&self, photon_count: u64) -> DetectorResult {
        self.acc.finish("pMCRDiffuse", TallyType::Perturbation, photon_count, |_| 1.0)
    }
}

/// Builds one detector per configuration entry, rejecting combinations the weighting cannot score.
pub fn build_detectors(configs: &[DetectorConfig], tissue: &dyn Tissue) -> Result<Vec<Box<dyn Detector>>> {
    let weighting = tissue.absorption_weighting();
    configs
        .iter()
        .map(|config| -> Result<Box<dyn Detector>> {
            let detector: Box<dyn Detector> = match config {
                DetectorConfig::RSpecular => Box::new(ExitDetector::new(ExitBoundary::SpecularReflectance)),
                DetectorConfig::RDiffuse => Box::new(ExitDetector::new(ExitBoundary::DiffuseReflectance)),
                DetectorConfig::TDiffuse => Box::new(ExitDetector::new(ExitBoundary::DiffuseTransmittance)),
                DetectorConfig::ROfRho { rho_max, bins } => Box::new(ROfRhoDetector::new(*rho_max, *bins)?),
                DetectorConfig::ATotal => Box::new(ATotalDetector::new(VolumeAbsorptionWeighting::new(weighting)?)),
                DetectorConfig::PmcRDiffuse { perturbed_regions, perturbed_ops } => {
                    if perturbed_ops.len() != tissue.regions().len() {
                        return Err(TransportError::configuration(format!(
                            "pMCRDiffuse needs {} perturbed optical property sets, got {}",
                            tissue.regions().len(),
                            perturbed_ops.len()
                        )));
                    }
                    Box::new(PmcRDiffuseDetector::new(
                        PerturbationWeighting::new(weighting)?,
                        perturbed_regions.clone(),
                        perturbed_ops.clone(),
                    ))
                }
            };
            Ok(detector)
        })
        .collect()
}
