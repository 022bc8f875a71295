//! Absorption weighting.
//!
//! Live transport uses the per-step policy functions; detectors use
//! [`VolumeAbsorptionWeighting`] to score deposited weight from a finished
//! track, and [`PerturbationWeighting`] to reweight a reference track for
//! perturbed optical properties.

use photon_transport_common::{AbsorptionWeightingType, OpticalProperties};

use crate::error::{Result, TransportError};
use crate::history::SubRegionCollisionInfo;
use crate::photon::{PhotonDataPoint, PhotonState};

/// Analog absorption: the photon is absorbed when `u` exceeds the single-scattering albedo.
#[inline]
pub fn analog_absorbs(u: f64, ops: &OpticalProperties) -> bool {
    u > ops.mus / (ops.mua + ops.mus)
}

/// Weight removed at a real collision under Discrete weighting.
#[inline]
pub fn discrete_weight_loss(weight: f64, ops: &OpticalProperties) -> f64 {
    weight * ops.mua / (ops.mua + ops.mus)
}

/// Weight removed along a step of physical length `step` under Continuous weighting.
#[inline]
pub fn continuous_weight_loss(weight: f64, mua: f64, step: f64) -> f64 {
    weight * (1.0 - (-mua * step).exp())
}

/// Scores absorbed weight from consecutive history points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAbsorptionWeighting {
    Analog,
    Discrete,
}

impl VolumeAbsorptionWeighting {
    pub fn new(weighting: AbsorptionWeightingType) -> Result<Self> {
        match weighting {
            AbsorptionWeightingType::Analog => Ok(VolumeAbsorptionWeighting::Analog),
            AbsorptionWeightingType::Discrete => Ok(VolumeAbsorptionWeighting::Discrete),
            AbsorptionWeightingType::Continuous => Err(TransportError::not_implemented(
                "continuous absorption weighting for volume tallies",
            )),
        }
    }

    /// Weight deposited between `previous` and `dp`, where `ops` belongs to the region of `dp`.
    pub fn contribution(&self, previous: &PhotonDataPoint, dp: &PhotonDataPoint, ops: &OpticalProperties) -> f64 {
        match self {
            VolumeAbsorptionWeighting::Analog => {
                if dp.state == PhotonState::Absorbed {
                    1.0
                } else {
                    0.0
                }
            }
            VolumeAbsorptionWeighting::Discrete => {
                // unchanged weight marks a pseudo-collision
                if previous.weight == dp.weight {
                    0.0
                } else {
                    discrete_weight_loss(previous.weight, ops)
                }
            }
        }
    }
}

/// Reweights a reference photon for perturbed optical properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerturbationWeighting {
    Discrete,
    Continuous,
}

impl PerturbationWeighting {
    pub fn new(weighting: AbsorptionWeightingType) -> Result<Self> {
        match weighting {
            AbsorptionWeightingType::Analog => Err(TransportError::not_implemented(
                "perturbation Monte Carlo reweighting with analog absorption",
            )),
            AbsorptionWeightingType::Discrete => Ok(PerturbationWeighting::Discrete),
            AbsorptionWeightingType::Continuous => Ok(PerturbationWeighting::Continuous),
        }
    }

    /// Multiplicative factor applied to the reference weight. Only `perturbed_regions` contribute.
    pub fn weight_factor(
        &self,
        collision_info: &[SubRegionCollisionInfo],
        perturbed_ops: &[OpticalProperties],
        reference_ops: &[OpticalProperties],
        perturbed_regions: &[usize],
    ) -> f64 {
        let mut factor = 1.0;
        for &region in perturbed_regions {
            let (Some(info), Some(pert), Some(reference)) = (
                collision_info.get(region),
                perturbed_ops.get(region),
                reference_ops.get(region),
            ) else {
                continue;
            };
            let n = info.collision_count.min(i32::MAX as u64) as i32;
            let length = info.path_length;

            factor *= match self {
                PerturbationWeighting::Discrete => {
                    (pert.mus / reference.mus).powi(n)
                        * (-(pert.total_attenuation() - reference.total_attenuation()) * length).exp()
                }
                PerturbationWeighting::Continuous => {
                    let scattering = (pert.mus / reference.mus).powi(n) * (-(pert.mus - reference.mus) * length).exp();
                    let absorption = (-(pert.mua - reference.mua) * length).exp();
                    scattering * absorption
                }
            };
        }
        factor
    }
}
