//! Scattering policies applied at real collisions.

use std::f64::consts::PI;

use photon_transport_common::{clamp, LookupTableConfig, PhaseFunctionType, TissueConfig, Vec3};
use rand::Rng;

use crate::error::{Result, TransportError};

/// Tabulated polar-angle distribution sampled by inverse CDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarLookupTable {
    angles: Vec<f64>,
    cdf: Vec<f64>,
}

impl PolarLookupTable {
    /// Builds the table from angles (radians, ascending) and an unnormalized pdf per angle.
    pub fn new(angles: Vec<f64>, pdf: &[f64]) -> Result<Self> {
        if angles.len() < 2 || angles.len() != pdf.len() {
            return Err(TransportError::configuration(
                "lookup table needs at least two angles and one pdf value per angle",
            ));
        }
        // trapezoid rule over solid angle
        let mut cdf = Vec::with_capacity(angles.len());
        cdf.push(0.0);
        for i in 1..angles.len() {
            let a = pdf[i - 1] * angles[i - 1].sin();
            let b = pdf[i] * angles[i].sin();
            let area = 0.5 * (a + b) * (angles[i] - angles[i - 1]);
            cdf.push(cdf[i - 1] + area);
        }
        let total = cdf[cdf.len() - 1];
        if !(total > 0.0) {
            return Err(TransportError::configuration("lookup table pdf integrates to zero"));
        }
        for c in cdf.iter_mut() {
            *c /= total;
        }
        Ok(PolarLookupTable { angles, cdf })
    }

    pub fn from_config(table: &LookupTableConfig) -> Result<Self> {
        PolarLookupTable::new(table.angles.clone(), &table.pdf)
    }

    /// Polar angle for a cumulative probability `u` in [0, 1].
    pub fn polar_angle(&self, u: f64) -> f64 {
        let i = self.cdf.partition_point(|&c| c < u).clamp(1, self.cdf.len() - 1);
        let (c0, c1) = (self.cdf[i - 1], self.cdf[i]);
        let (a0, a1) = (self.angles[i - 1], self.angles[i]);
        if c1 > c0 {
            a0 + (a1 - a0) * (u - c0) / (c1 - c0)
        } else {
            a0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseFunction {
    HenyeyGreenstein,
    /// One-dimensional forward/backward scattering.
    Bidirectional,
    LookupTable(PolarLookupTable),
}

impl PhaseFunction {
    pub fn from_config(kind: PhaseFunctionType, tissue: &TissueConfig) -> Result<Self> {
        match kind {
            PhaseFunctionType::HenyeyGreenstein => Ok(PhaseFunction::HenyeyGreenstein),
            PhaseFunctionType::Bidirectional => Ok(PhaseFunction::Bidirectional),
            PhaseFunctionType::LookupTable => {
                let table = tissue.lookup_table.as_ref().ok_or_else(|| {
                    TransportError::configuration("lookup table phase function requires a lookup table")
                })?;
                Ok(PhaseFunction::LookupTable(PolarLookupTable::from_config(table)?))
            }
        }
    }

    /// New direction after a real collision in a region with anisotropy `g`.
    pub fn scatter<R: Rng + ?Sized>(&self, direction: Vec3, g: f64, rng: &mut R) -> Vec3 {
        match self {
            PhaseFunction::HenyeyGreenstein => {
                let cost = henyey_greenstein_cosine(g, rng.random::<f64>());
                let psi = 2.0 * PI * rng.random::<f64>();
                rotate_direction(direction, cost, psi)
            }
            PhaseFunction::Bidirectional => {
                if rng.random::<f64>() < (1.0 + g) / 2.0 {
                    direction
                } else {
                    Vec3::new(direction.x, direction.y, -direction.z)
                }
            }
            PhaseFunction::LookupTable(table) => {
                let theta = table.polar_angle(rng.random::<f64>());
                let psi = 2.0 * PI * rng.random::<f64>();
                rotate_direction(direction, theta.cos(), psi)
            }
        }
    }
}

/// Polar cosine drawn from Henyey-Greenstein for a uniform variate `u`.
pub fn henyey_greenstein_cosine(g: f64, u: f64) -> f64 {
    if g == 0.0 {
        return 2.0 * u - 1.0;
    }
    if g.abs() == 1.0 {
        return g;
    }
    let temp = (1.0 - g * g) / (1.0 - g + 2.0 * g * u);
    clamp((1.0 + g * g - temp * temp) / (2.0 * g), -1.0, 1.0)
}

/// Rotates `direction` by polar cosine `cost` and azimuth `psi`.
pub fn rotate_direction(direction: Vec3, cost: f64, psi: f64) -> Vec3 {
    let sint = (1.0 - cost * cost).max(0.0).sqrt();
    let (sinp, cosp) = psi.sin_cos();
    let Vec3 { x: ux, y: uy, z: uz } = direction;

    if uz.abs() > 1.0 - 1e-10 {
        return Vec3::new(sint * cosp, sint * sinp, cost * uz.signum());
    }
    let temp = (1.0 - uz * uz).sqrt();
    Vec3::new(
        sint * (ux * uz * cosp - uy * sinp) / temp + ux * cost,
        sint * (uy * uz * cosp + ux * sinp) / temp + uy * cost,
        -sint * cosp * temp + uz * cost,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_rng::Mt19937;
    use approx::assert_relative_eq;

    #[test]
    fn isotropic_cosine_is_uniform_in_u() {
        assert_eq!(henyey_greenstein_cosine(0.0, 0.0), -1.0);
        assert_eq!(henyey_greenstein_cosine(0.0, 0.5), 0.0);
        assert_eq!(henyey_greenstein_cosine(0.0, 1.0), 1.0);
    }

    #[test]
    fn henyey_greenstein_mean_cosine_is_g() {
        let mut rng = Mt19937::new(11);
        let g = 0.8;
        let n = 100_000;
        let mean = (0..n)
            .map(|_| henyey_greenstein_cosine(g, rng.random::<f64>()))
            .sum::<f64>()
            / n as f64;
        assert!((mean - g).abs() < 0.01, "mean cosine {}", mean);
    }

    #[test]
    fn rotation_keeps_unit_length_and_cosine() {
        let mut rng = Mt19937::new(3);
        let mut dir = Vec3::new(0.3, -0.4, (1.0f64 - 0.25).sqrt());
        for _ in 0..1000 {
            let next = PhaseFunction::HenyeyGreenstein.scatter(dir, 0.9, &mut rng);
            assert_relative_eq!(next.length(), 1.0, epsilon = 1e-9);
            dir = next;
        }
        let cost = 0.6;
        let rotated = rotate_direction(Vec3::new(0.6, 0.0, 0.8), cost, 1.0);
        assert_relative_eq!(rotated.dot(Vec3::new(0.6, 0.0, 0.8)), cost, epsilon = 1e-12);
    }

    #[test]
    fn normal_direction_uses_simplified_update() {
        let down = rotate_direction(Vec3::unit_z(), 0.5, 0.0);
        assert_relative_eq!(down.z, 0.5);
        let up = rotate_direction(-Vec3::unit_z(), 0.5, 0.0);
        assert_relative_eq!(up.z, -0.5);
    }

    #[test]
    fn bidirectional_only_flips_uz() {
        let mut rng = Mt19937::new(1);
        let forward = PhaseFunction::Bidirectional.scatter(Vec3::unit_z(), 1.0, &mut rng);
        assert_eq!(forward, Vec3::unit_z());
        let back = PhaseFunction::Bidirectional.scatter(Vec3::unit_z(), -1.0, &mut rng);
        assert_eq!(back, -Vec3::unit_z());
    }

    #[test]
    fn lookup_table_inverts_its_cdf() {
        let table = PolarLookupTable::new(vec![0.0, PI / 2.0, PI], &[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(table.polar_angle(0.0), 0.0);
        assert_relative_eq!(table.polar_angle(1.0), PI);
        assert_relative_eq!(table.polar_angle(0.5), PI / 2.0, epsilon = 1e-12);
        assert!(PolarLookupTable::new(vec![0.0, 1.0], &[0.0, 0.0]).is_err());
    }
}
