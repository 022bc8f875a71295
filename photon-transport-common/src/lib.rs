pub mod config;
pub mod results;
pub mod sim_params;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    AbsorptionWeightingType, DetectorConfig, LayerConfig, LookupTableConfig, OpticalProperties, OutputConfig,
    PhaseFunctionType, RunConfig, SimulationConfig, SourceConfig, TissueConfig, MIN_PHOTON_COUNT,
};
pub use results::{DetectorResult, SimulationOutput, TallyType};
pub use sim_params::SimParams;
pub use vecmath::{clamp, Vec3};
