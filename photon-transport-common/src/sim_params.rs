use serde::{Deserialize, Serialize};

use crate::config::{AbsorptionWeightingType, PhaseFunctionType};

/// History length at which a photon is killed (KilledOverMaxCollisions).
pub const MAX_HISTORY_POINTS: usize = 300_000;
/// Total path length (mm, summed over regions) at which a photon is killed.
pub const MAX_PHOTON_PATH_LENGTH: f64 = 2000.0;
/// Russian roulette survival probability.
pub const ROULETTE_CHANCE: f64 = 0.1;
/// Speed of light in vacuum, mm/ns.
pub const SPEED_OF_LIGHT: f64 = 299.792458;

/// Run-time transport parameters derived from the configuration and consulted on every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Termination limits
    pub max_history_points: usize,
    pub max_path_length: f64,

    // Russian roulette
    pub roulette_chance: f64,
    pub roulette_weight_threshold: f64,

    // Time of flight
    pub speed_of_light: f64,

    // Policies chosen once per run
    pub absorption_weighting: AbsorptionWeightingType,
    pub phase_function: PhaseFunctionType,
}

impl SimParams {
    /// Default limits for the given policies.
    pub fn with_policies(
        absorption_weighting: AbsorptionWeightingType,
        phase_function: PhaseFunctionType,
    ) -> Self {
        SimParams {
            max_history_points: MAX_HISTORY_POINTS,
            max_path_length: MAX_PHOTON_PATH_LENGTH,
            roulette_chance: ROULETTE_CHANCE,
            roulette_weight_threshold: 0.0,
            speed_of_light: SPEED_OF_LIGHT,
            absorption_weighting,
            phase_function,
        }
    }

    /// Time (ns) taken to travel `distance` mm in a medium of refractive index `n`.
    #[inline(always)]
    pub fn time_delay(&self, distance: f64, n: f64) -> f64 {
        distance / (self.speed_of_light / n)
    }
}
