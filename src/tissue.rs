//! Tissue geometry queried by the transport loop.

use log::debug;
use photon_transport_common::{AbsorptionWeightingType, OpticalProperties, TissueConfig, Vec3};

use crate::error::{Result, TransportError};
use crate::photon::ExitBoundary;

/// Positions closer than this to the outer surfaces count as on the domain boundary.
const BOUNDARY_TOLERANCE: f64 = 1e-10;

/// Geometry and optics queries a photon needs while it is transported.
///
/// Implementations are read-only during a run and shared between workers.
pub trait Tissue: Send + Sync {
    fn regions(&self) -> &[TissueRegion];

    fn absorption_weighting(&self) -> AbsorptionWeightingType;

    /// Per-region coefficient that converts optical depth into physical path length.
    fn interaction_coefficients(&self) -> &[f64];

    fn region_index(&self, position: Vec3) -> usize;

    /// True for the ambient regions surrounding the tissue.
    fn is_outside_domain(&self, region: usize) -> bool;

    fn distance_to_boundary(&self, position: Vec3, direction: Vec3, region: usize) -> f64;

    /// Cosine between the direction and the normal of the boundary it is heading to.
    fn cos_to_boundary_normal(&self, direction: Vec3) -> f64;

    fn neighbor_index(&self, direction: Vec3, region: usize) -> usize;

    fn on_domain_boundary(&self, position: Vec3) -> bool;

    fn exit_boundary(&self, position: Vec3) -> ExitBoundary;

    fn reflected_direction(&self, position: Vec3, direction: Vec3) -> Vec3;

    fn refracted_direction(&self, position: Vec3, direction: Vec3, n_current: f64, n_next: f64, cos_snell: f64)
        -> Vec3;
}

/// One slab, containing `z_start < z <= z_stop`.
#[derive(Debug, Clone, PartialEq)]
pub struct TissueRegion {
    pub z_start: f64,
    pub z_stop: f64,
    pub ops: OpticalProperties,
}

impl TissueRegion {
    pub fn new(z_start: f64, z_stop: f64, ops: OpticalProperties) -> Self {
        TissueRegion { z_start, z_stop, ops }
    }

    pub fn ambient(z_start: f64, z_stop: f64) -> Self {
        TissueRegion::new(z_start, z_stop, OpticalProperties::ambient())
    }

    #[inline]
    pub fn contains(&self, z: f64) -> bool {
        z > self.z_start && z <= self.z_stop
    }
}

/// Laterally infinite slabs stacked along z, with ambient half-spaces above and below.
#[derive(Debug, Clone)]
pub struct MultiLayerTissue {
    regions: Vec<TissueRegion>,
    weighting: AbsorptionWeightingType,
    interaction_coefficients: Vec<f64>,
}

impl MultiLayerTissue {
    pub fn new(regions: Vec<TissueRegion>, weighting: AbsorptionWeightingType) -> Result<Self> {
        if regions.len() < 3 {
            return Err(TransportError::configuration(format!(
                "a layered tissue needs at least three regions, got {}",
                regions.len()
            )));
        }
        let last = regions.len() - 1;
        if regions[0].z_start != f64::NEG_INFINITY || regions[last].z_stop != f64::INFINITY {
            return Err(TransportError::configuration("outer regions must extend to infinity"));
        }
        for pair in regions.windows(2) {
            if pair[0].z_stop != pair[1].z_start {
                return Err(TransportError::configuration(format!(
                    "regions are not contiguous at z = {} / {}",
                    pair[0].z_stop, pair[1].z_start
                )));
            }
        }

        let interaction_coefficients: Vec<f64> =
            regions.iter().map(|r| r.ops.interaction_coefficient(weighting)).collect();
        debug!("Interaction coefficients ({:?}): {:?}", weighting, interaction_coefficients);

        Ok(MultiLayerTissue { regions, weighting, interaction_coefficients })
    }

    pub fn from_config(config: &TissueConfig, weighting: AbsorptionWeightingType) -> Result<Self> {
        let regions = config
            .layers
            .iter()
            .map(|layer| TissueRegion::new(layer.z_start, layer.z_stop, layer.optical_properties()))
            .collect();
        MultiLayerTissue::new(regions, weighting)
    }

    fn top(&self) -> f64 {
        self.regions[0].z_stop
    }

    fn bottom(&self) -> f64 {
        self.regions[self.regions.len() - 1].z_start
    }
}

impl Tissue for MultiLayerTissue {
    fn regions(&self) -> &[TissueRegion] {
        &self.regions
    }

    fn absorption_weighting(&self) -> AbsorptionWeightingType {
        self.weighting
    }

    fn interaction_coefficients(&self) -> &[f64] {
        &self.interaction_coefficients
    }

    fn region_index(&self, position: Vec3) -> usize {
        self.regions
            .iter()
            .position(|r| r.contains(position.z))
            .unwrap_or(self.regions.len() - 1)
    }

    fn is_outside_domain(&self, region: usize) -> bool {
        region == 0 || region == self.regions.len() - 1
    }

    fn distance_to_boundary(&self, position: Vec3, direction: Vec3, region: usize) -> f64 {
        let Some(layer) = self.regions.get(region) else {
            return f64::NAN;
        };
        if direction.z > 0.0 {
            (layer.z_stop - position.z) / direction.z
        } else if direction.z < 0.0 {
            (layer.z_start - position.z) / direction.z
        } else {
            f64::INFINITY
        }
    }

    fn cos_to_boundary_normal(&self, direction: Vec3) -> f64 {
        direction.z.abs()
    }

    fn neighbor_index(&self, direction: Vec3, region: usize) -> usize {
        if direction.z > 0.0 {
            (region + 1).min(self.regions.len() - 1)
        } else if direction.z < 0.0 {
            region.saturating_sub(1)
        } else {
            region
        }
    }

    fn on_domain_boundary(&self, position: Vec3) -> bool {
        (position.z - self.top()).abs() < BOUNDARY_TOLERANCE || (position.z - self.bottom()).abs() < BOUNDARY_TOLERANCE
    }

    fn exit_boundary(&self, position: Vec3) -> ExitBoundary {
        if position.z < self.top() + BOUNDARY_TOLERANCE {
            ExitBoundary::DiffuseReflectance
        } else {
            ExitBoundary::DiffuseTransmittance
        }
    }

    fn reflected_direction(&self, _position: Vec3, direction: Vec3) -> Vec3 {
        Vec3::new(direction.x, direction.y, -direction.z)
    }

    fn refracted_direction(
        &self,
        _position: Vec3,
        direction: Vec3,
        n_current: f64,
        n_next: f64,
        cos_snell: f64,
    ) -> Vec3 {
        let ratio = n_current / n_next;
        let uz = if direction.z > 0.0 { cos_snell } else { -cos_snell };
        Vec3::new(direction.x * ratio, direction.y * ratio, uz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn slab() -> MultiLayerTissue {
        MultiLayerTissue::new(
            vec![
                TissueRegion::ambient(f64::NEG_INFINITY, 0.0),
                TissueRegion::new(0.0, 100.0, OpticalProperties::new(0.01, 1.0, 0.8, 1.4)),
                TissueRegion::ambient(100.0, f64::INFINITY),
            ],
            AbsorptionWeightingType::Discrete,
        )
        .unwrap()
    }

    #[test]
    fn surface_belongs_to_the_region_above() {
        let tissue = slab();
        assert_eq!(tissue.region_index(Vec3::zero()), 0);
        assert_eq!(tissue.region_index(Vec3::new(0.0, 0.0, 1e-9)), 1);
        assert_eq!(tissue.region_index(Vec3::new(0.0, 0.0, 100.0)), 1);
        assert_eq!(tissue.region_index(Vec3::new(0.0, 0.0, 150.0)), 2);
        assert!(tissue.is_outside_domain(0) && tissue.is_outside_domain(2) && !tissue.is_outside_domain(1));
    }

    #[test]
    fn distance_follows_direction() {
        let tissue = slab();
        let down = Vec3::new(0.6, 0.0, 0.8);
        assert_relative_eq!(tissue.distance_to_boundary(Vec3::new(0.0, 0.0, 20.0), down, 1), 100.0);
        assert_relative_eq!(tissue.distance_to_boundary(Vec3::new(0.0, 0.0, 20.0), -down, 1), 25.0);
        assert_eq!(tissue.distance_to_boundary(Vec3::zero(), Vec3::unit_z(), 0), 0.0);
        assert!(tissue.distance_to_boundary(Vec3::new(0.0, 0.0, 5.0), Vec3::new(1.0, 0.0, 0.0), 1).is_infinite());
        assert_eq!(tissue.neighbor_index(down, 1), 2);
        assert_eq!(tissue.neighbor_index(-down, 1), 0);
    }

    #[test]
    fn outer_surfaces_map_to_exit_boundaries() {
        let tissue = slab();
        assert!(tissue.on_domain_boundary(Vec3::zero()));
        assert!(tissue.on_domain_boundary(Vec3::new(1.0, 2.0, 100.0)));
        assert!(!tissue.on_domain_boundary(Vec3::new(0.0, 0.0, 50.0)));
        assert_eq!(tissue.exit_boundary(Vec3::zero()), ExitBoundary::DiffuseReflectance);
        assert_eq!(tissue.exit_boundary(Vec3::new(0.0, 0.0, 100.0)), ExitBoundary::DiffuseTransmittance);
    }

    #[test]
    fn interaction_coefficients_depend_on_weighting() {
        let regions = slab().regions().to_vec();
        let continuous = MultiLayerTissue::new(regions, AbsorptionWeightingType::Continuous).unwrap();
        assert_relative_eq!(slab().interaction_coefficients()[1], 1.01);
        assert_relative_eq!(continuous.interaction_coefficients()[1], 1.0);
    }

    #[test]
    fn rejects_gaps_between_layers() {
        let regions = vec![
            TissueRegion::ambient(f64::NEG_INFINITY, 0.0),
            TissueRegion::new(1.0, 100.0, OpticalProperties::new(0.01, 1.0, 0.8, 1.4)),
            TissueRegion::ambient(100.0, f64::INFINITY),
        ];
        assert!(matches!(
            MultiLayerTissue::new(regions, AbsorptionWeightingType::Discrete),
            Err(TransportError::Configuration(_))
        ));
    }
}
