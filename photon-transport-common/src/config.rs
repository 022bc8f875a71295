use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

/// Smallest photon budget accepted for a run.
pub const MIN_PHOTON_COUNT: u64 = 1;

/// How absorbed energy is accounted for along a photon's track.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AbsorptionWeightingType {
    Analog,
    Discrete,
    Continuous,
}

/// Scattering policy applied at real collisions.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseFunctionType {
    HenyeyGreenstein,
    Bidirectional,
    LookupTable,
}

/// Optical properties of one tissue region (coefficients in 1/mm).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct OpticalProperties {
    pub mua: f64,
    pub mus: f64,
    pub g: f64,
    pub n: f64,
}

impl OpticalProperties {
    pub const fn new(mua: f64, mus: f64, g: f64, n: f64) -> Self {
        OpticalProperties { mua, mus, g, n }
    }

    /// Ambient (non-scattering, non-absorbing) medium with refractive index 1.
    pub const fn ambient() -> Self {
        OpticalProperties { mua: 0.0, mus: 1e-10, g: 1.0, n: 1.0 }
    }

    /// Total attenuation coefficient mua + mus.
    pub fn total_attenuation(&self) -> f64 {
        self.mua + self.mus
    }

    /// Coefficient that sets the free-path distribution for the given weighting.
    /// Continuous weighting samples with scattering only and deweights along the path.
    pub fn interaction_coefficient(&self, weighting: AbsorptionWeightingType) -> f64 {
        match weighting {
            AbsorptionWeightingType::Analog | AbsorptionWeightingType::Discrete => self.mua + self.mus,
            AbsorptionWeightingType::Continuous => self.mus,
        }
    }

    fn validate(&self, what: &str) -> Result<()> {
        if !(self.mua >= 0.0) || !(self.mus >= 0.0) {
            anyhow::bail!("{}: mua and mus must be non-negative (mua={}, mus={}).", what, self.mua, self.mus);
        }
        if !(-1.0..=1.0).contains(&self.g) {
            anyhow::bail!("{}: anisotropy g={} must lie in [-1, 1].", what, self.g);
        }
        if !(self.n > 0.0) {
            anyhow::bail!("{}: refractive index n={} must be positive.", what, self.n);
        }
        Ok(())
    }
}

// Run-level settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunConfig {
    pub photon_count: u64,
    /// Negative means "derive from the current time".
    #[serde(default = "default_seed")]
    pub seed: i64,
    /// Worker slots for the parallel run; 0 uses one per logical core.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_absorption_weighting")]
    pub absorption_weighting: AbsorptionWeightingType,
    #[serde(default = "default_phase_function")]
    pub phase_function: PhaseFunctionType,
    #[serde(default)]
    pub russian_roulette_weight_threshold: f64,
    #[serde(default = "default_rng_search_seed")]
    pub rng_search_seed: u32,
    #[serde(default = "default_rng_period_exponent")]
    pub rng_period_exponent: u32,
    #[serde(default = "default_rng_word_length")]
    pub rng_word_length: u32,
}

// One slab of the layered tissue, ordered by depth
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LayerConfig {
    pub z_start: f64,
    pub z_stop: f64,
    pub mua: f64,
    pub mus: f64,
    pub g: f64,
    pub n: f64,
}

impl LayerConfig {
    pub fn optical_properties(&self) -> OpticalProperties {
        OpticalProperties::new(self.mua, self.mus, self.g, self.n)
    }
}

/// Tabulated polar-angle phase function (angles in radians, ascending).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LookupTableConfig {
    pub angles: Vec<f64>,
    pub pdf: Vec<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TissueConfig {
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub lookup_table: Option<LookupTableConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_position")]
    pub position: [f64; 3],
    #[serde(default = "default_source_direction")]
    pub direction: [f64; 3],
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            position: default_source_position(),
            direction: default_source_direction(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorConfig {
    RSpecular,
    RDiffuse,
    TDiffuse,
    ATotal,
    ROfRho {
        rho_max: f64,
        bins: usize,
    },
    PmcRDiffuse {
        perturbed_regions: Vec<usize>,
        /// One entry per tissue region; only `perturbed_regions` are read.
        perturbed_ops: Vec<OpticalProperties>,
    },
}

impl DetectorConfig {
    pub fn name(&self) -> &'static str {
        match self {
            DetectorConfig::RSpecular => "RSpecular",
            DetectorConfig::RDiffuse => "RDiffuse",
            DetectorConfig::TDiffuse => "TDiffuse",
            DetectorConfig::ATotal => "ATotal",
            DetectorConfig::ROfRho { .. } => "ROfRho",
            DetectorConfig::PmcRDiffuse { .. } => "pMCRDiffuse",
        }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default = "default_true")]
    pub save_summary_csv: bool,
    /// Write every photon's biography for offline pMC (serial runs only).
    #[serde(default)]
    pub write_database: bool,
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub simulation: RunConfig,
    pub tissue: TissueConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default = "default_detectors")]
    pub detectors: Vec<DetectorConfig>,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid configuration in '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked before the tissue is built.
    pub fn validate(&self) -> Result<()> {
        let run = &self.simulation;
        if run.photon_count < MIN_PHOTON_COUNT {
            anyhow::bail!("photon_count must be at least {} (got {}).", MIN_PHOTON_COUNT, run.photon_count);
        }
        if !(run.russian_roulette_weight_threshold >= 0.0) || run.russian_roulette_weight_threshold >= 1.0 {
            anyhow::bail!(
                "russian_roulette_weight_threshold must lie in [0, 1) (got {}).",
                run.russian_roulette_weight_threshold
            );
        }

        // --- Layers ---
        let layers = &self.tissue.layers;
        if layers.len() < 3 {
            anyhow::bail!("tissue needs at least three layers (ambient, tissue, ambient); got {}.", layers.len());
        }
        let (first, last) = (&layers[0], &layers[layers.len() - 1]);
        if first.z_start != f64::NEG_INFINITY || last.z_stop != f64::INFINITY {
            anyhow::bail!("the first layer must start at -inf and the last layer must stop at +inf.");
        }
        for (i, layer) in layers.iter().enumerate() {
            if !(layer.z_stop > layer.z_start) {
                anyhow::bail!("layer {}: z_stop ({}) must exceed z_start ({}).", i, layer.z_stop, layer.z_start);
            }
            layer.optical_properties().validate(&format!("layer {}", i))?;
            if let Some(next) = layers.get(i + 1) {
                if layer.z_stop != next.z_start {
                    anyhow::bail!("layers {} and {} are not contiguous ({} != {}).", i, i + 1, layer.z_stop, next.z_start);
                }
            }
        }
        if first.mua != 0.0 || last.mua != 0.0 {
            anyhow::bail!("the outer ambient layers must not absorb (mua = 0).");
        }

        // --- Phase function ---
        if run.phase_function == PhaseFunctionType::LookupTable {
            match &self.tissue.lookup_table {
                None => anyhow::bail!("phase_function = \"lookup_table\" requires a [tissue.lookup_table] section."),
                Some(table) => {
                    if table.angles.len() < 2 || table.angles.len() != table.pdf.len() {
                        anyhow::bail!("lookup_table needs at least two angles and one pdf value per angle.");
                    }
                    if table.angles.windows(2).any(|w| w[1] <= w[0]) {
                        anyhow::bail!("lookup_table angles must be strictly ascending.");
                    }
                    if table.pdf.iter().any(|p| !(*p >= 0.0)) {
                        anyhow::bail!("lookup_table pdf values must be non-negative.");
                    }
                }
            }
        }

        // --- Source ---
        let d = self.source.direction;
        let len_sq = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
        if (len_sq - 1.0).abs() > 1e-9 {
            anyhow::bail!("source direction {:?} must be a unit vector.", d);
        }

        // --- Detectors ---
        for detector in &self.detectors {
            match detector {
                DetectorConfig::ROfRho { rho_max, bins } => {
                    if !(*rho_max > 0.0) || *bins == 0 {
                        anyhow::bail!("{} needs rho_max > 0 and bins > 0.", detector.name());
                    }
                }
                DetectorConfig::PmcRDiffuse { perturbed_regions, perturbed_ops } => {
                    if perturbed_ops.len() != layers.len() {
                        anyhow::bail!(
                            "{} needs one perturbed optical property set per region ({} given, {} regions).",
                            detector.name(),
                            perturbed_ops.len(),
                            layers.len()
                        );
                    }
                    if let Some(bad) = perturbed_regions.iter().find(|r| **r >= layers.len()) {
                        anyhow::bail!("{} perturbed region {} does not exist.", detector.name(), bad);
                    }
                    for (i, ops) in perturbed_ops.iter().enumerate() {
                        ops.validate(&format!("{} perturbed region {}", detector.name(), i))?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Converts the configuration into parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let mut params = SimParams::with_policies(
            self.simulation.absorption_weighting,
            self.simulation.phase_function,
        );
        params.roulette_weight_threshold = self.simulation.russian_roulette_weight_threshold;
        params
    }
}

fn default_seed() -> i64 {
    0
}

fn default_absorption_weighting() -> AbsorptionWeightingType {
    AbsorptionWeightingType::Discrete
}

fn default_phase_function() -> PhaseFunctionType {
    PhaseFunctionType::HenyeyGreenstein
}

fn default_rng_search_seed() -> u32 {
    4172
}

fn default_rng_period_exponent() -> u32 {
    521
}

fn default_rng_word_length() -> u32 {
    32
}

fn default_source_position() -> [f64; 3] {
    [0.0, 0.0, 0.0]
}

fn default_source_direction() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

fn default_detectors() -> Vec<DetectorConfig> {
    vec![
        DetectorConfig::RSpecular,
        DetectorConfig::RDiffuse,
        DetectorConfig::TDiffuse,
        DetectorConfig::ATotal,
    ]
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_LAYER: &str = r#"
        [simulation]
        photon_count = 100
        seed = 7

        [[tissue.layers]]
        z_start = -inf
        z_stop = 0.0
        mua = 0.0
        mus = 1e-10
        g = 1.0
        n = 1.0

        [[tissue.layers]]
        z_start = 0.0
        z_stop = 100.0
        mua = 0.01
        mus = 1.0
        g = 0.8
        n = 1.4

        [[tissue.layers]]
        z_start = 100.0
        z_stop = inf
        mua = 0.0
        mus = 1e-10
        g = 1.0
        n = 1.0

        [output]
        base_filename = "run"
    "#;

    #[test]
    fn parses_three_layer_slab_with_defaults() {
        let config = SimulationConfig::from_toml_str(THREE_LAYER).unwrap();
        assert_eq!(config.simulation.absorption_weighting, AbsorptionWeightingType::Discrete);
        assert_eq!(config.simulation.phase_function, PhaseFunctionType::HenyeyGreenstein);
        assert_eq!(config.simulation.rng_search_seed, 4172);
        assert_eq!(config.detectors.len(), 4);
        assert_eq!(config.tissue.layers[1].optical_properties(), OpticalProperties::new(0.01, 1.0, 0.8, 1.4));
        let params = config.get_sim_params();
        assert_eq!(params.max_history_points, 300_000);
        assert_eq!(params.roulette_chance, 0.1);
    }

    #[test]
    fn rejects_gapped_layers() {
        let broken = THREE_LAYER.replace("z_start = 100.0", "z_start = 90.0");
        let err = SimulationConfig::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("not contiguous"));
    }

    #[test]
    fn rejects_zero_photons() {
        let broken = THREE_LAYER.replace("photon_count = 100", "photon_count = 0");
        assert!(SimulationConfig::from_toml_str(&broken).is_err());
    }

    #[test]
    fn lookup_table_phase_function_requires_table() {
        let broken = THREE_LAYER.replace("seed = 7", "seed = 7\nphase_function = \"lookup_table\"");
        let err = SimulationConfig::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("lookup_table"));
    }

    #[test]
    fn detector_errors_name_the_detector() {
        let bad = format!("{}\n[[detectors]]\ntype = \"r_of_rho\"\nrho_max = 0.0\nbins = 10\n", THREE_LAYER);
        let err = SimulationConfig::from_toml_str(&bad).unwrap_err();
        assert!(err.to_string().contains("ROfRho needs rho_max"));
    }

    #[test]
    fn continuous_weighting_samples_with_scattering_only() {
        let ops = OpticalProperties::new(0.1, 2.0, 0.9, 1.4);
        assert_eq!(ops.interaction_coefficient(AbsorptionWeightingType::Discrete), 2.1);
        assert_eq!(ops.interaction_coefficient(AbsorptionWeightingType::Continuous), 2.0);
    }

    #[test]
    fn parses_tagged_detectors() {
        let with_detectors = format!(
            "{}\n[[detectors]]\ntype = \"r_of_rho\"\nrho_max = 10.0\nbins = 20\n\n[[detectors]]\ntype = \"a_total\"\n",
            THREE_LAYER
        );
        let config = SimulationConfig::from_toml_str(&with_detectors).unwrap();
        assert_eq!(config.detectors, vec![
            DetectorConfig::ROfRho { rho_max: 10.0, bins: 20 },
            DetectorConfig::ATotal,
        ]);
    }
}
