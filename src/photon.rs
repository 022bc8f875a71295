//! Per-photon transport state machine.

use bitflags::bitflags;
use photon_transport_common::{AbsorptionWeightingType, SimParams, Vec3};
use rand::distr::OpenClosed01;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::absorption::{analog_absorbs, continuous_weight_loss, discrete_weight_loss};
use crate::history::PhotonHistory;
use crate::optics::{critical_cosine, fresnel};
use crate::phase_function::PhaseFunction;
use crate::tissue::Tissue;

/// Surface through which a photon left the tissue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitBoundary {
    /// Reflected at first contact, never entered the tissue.
    SpecularReflectance,
    DiffuseReflectance,
    DiffuseTransmittance,
}

/// Alive or exactly one terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhotonState {
    Alive,
    Absorbed,
    ExitedDomain(ExitBoundary),
    KilledOverMaxPathLength,
    KilledOverMaxCollisions,
    KilledRussianRoulette,
}

impl PhotonState {
    pub fn is_alive(&self) -> bool {
        matches!(self, PhotonState::Alive)
    }
}

bitflags! {
    /// Boundary events recorded on a data point, independent of the photon state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BoundaryEvents: u8 {
        const REFLECTED_TISSUE_BOUNDARY = 1 << 0;
        const TRANSMITTED_TISSUE_BOUNDARY = 1 << 1;
        const SPECULAR_TISSUE_BOUNDARY = 1 << 2;
        const DIFFUSE_REFLECTANCE_BOUNDARY = 1 << 3;
        const DIFFUSE_TRANSMITTANCE_BOUNDARY = 1 << 4;
        const SPECULAR_REFLECTANCE_BOUNDARY = 1 << 5;

        const VIRTUAL_BOUNDARIES = Self::DIFFUSE_REFLECTANCE_BOUNDARY.bits()
            | Self::DIFFUSE_TRANSMITTANCE_BOUNDARY.bits()
            | Self::SPECULAR_REFLECTANCE_BOUNDARY.bits();
    }
}

impl BoundaryEvents {
    /// Exit surface implied by a crossed virtual boundary, if any.
    pub fn exit_boundary(&self) -> Option<ExitBoundary> {
        if self.contains(BoundaryEvents::SPECULAR_REFLECTANCE_BOUNDARY) {
            Some(ExitBoundary::SpecularReflectance)
        } else if self.contains(BoundaryEvents::DIFFUSE_REFLECTANCE_BOUNDARY) {
            Some(ExitBoundary::DiffuseReflectance)
        } else if self.contains(BoundaryEvents::DIFFUSE_TRANSMITTANCE_BOUNDARY) {
            Some(ExitBoundary::DiffuseTransmittance)
        } else {
            None
        }
    }

    fn on_exit(boundary: ExitBoundary) -> BoundaryEvents {
        match boundary {
            ExitBoundary::SpecularReflectance => {
                BoundaryEvents::SPECULAR_TISSUE_BOUNDARY | BoundaryEvents::SPECULAR_REFLECTANCE_BOUNDARY
            }
            ExitBoundary::DiffuseReflectance => {
                BoundaryEvents::REFLECTED_TISSUE_BOUNDARY | BoundaryEvents::DIFFUSE_REFLECTANCE_BOUNDARY
            }
            ExitBoundary::DiffuseTransmittance => {
                BoundaryEvents::TRANSMITTED_TISSUE_BOUNDARY | BoundaryEvents::DIFFUSE_TRANSMITTANCE_BOUNDARY
            }
        }
    }
}

/// Snapshot of a photon at one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotonDataPoint {
    pub position: Vec3,
    pub direction: Vec3,
    pub weight: f64,
    /// Time of flight in ns.
    pub total_time: f64,
    pub state: PhotonState,
    pub events: BoundaryEvents,
}

impl PhotonDataPoint {
    pub fn new(position: Vec3, direction: Vec3, weight: f64) -> Self {
        PhotonDataPoint {
            position,
            direction,
            weight,
            total_time: 0.0,
            state: PhotonState::Alive,
            events: BoundaryEvents::empty(),
        }
    }
}

pub struct Photon<'a> {
    pub dp: PhotonDataPoint,
    pub history: PhotonHistory,
    current_region: usize,
    /// Physical length of the scheduled step.
    step: f64,
    optical_depth: f64,
    /// Optical depth carried over from a pseudo-collision.
    optical_depth_left: f64,
    track_index: u64,
    first_entry: bool,
    tissue: &'a dyn Tissue,
    params: &'a SimParams,
    phase_function: &'a PhaseFunction,
}

impl<'a> Photon<'a> {
    pub fn new(
        position: Vec3,
        direction: Vec3,
        tissue: &'a dyn Tissue,
        params: &'a SimParams,
        phase_function: &'a PhaseFunction,
    ) -> Self {
        let dp = PhotonDataPoint::new(position, direction, 1.0);
        let current_region = tissue.region_index(position);
        let mut history = PhotonHistory::new(tissue.regions().len());
        history.add_point(dp.clone());
        Photon {
            dp,
            history,
            current_region,
            step: 0.0,
            optical_depth: 0.0,
            optical_depth_left: 0.0,
            track_index: 0,
            first_entry: tissue.is_outside_domain(current_region),
            tissue,
            params,
            phase_function,
        }
    }

    pub fn current_region(&self) -> usize {
        self.current_region
    }

    pub fn step_size(&self) -> f64 {
        self.step
    }

    pub fn optical_depth_left(&self) -> f64 {
        self.optical_depth_left
    }

    pub fn track_index(&self) -> u64 {
        self.track_index
    }

    pub fn is_alive(&self) -> bool {
        self.dp.state.is_alive()
    }

    pub fn into_history(self) -> PhotonHistory {
        self.history
    }

    fn interaction_coefficient(&self) -> f64 {
        self.tissue.interaction_coefficients()[self.current_region]
    }

    /// Samples a fresh free path, or resumes the one cut short at the last boundary.
    pub fn set_step_size<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.optical_depth_left == 0.0 {
            let u: f64 = rng.sample(OpenClosed01);
            self.optical_depth = -u.ln();
        } else {
            self.optical_depth = self.optical_depth_left;
            self.optical_depth_left = 0.0;
        }
        self.step = if self.optical_depth == 0.0 {
            0.0
        } else {
            self.optical_depth / self.interaction_coefficient()
        };
    }

    /// Advances the photon, stopping at the boundary when `distance` is within reach.
    /// Returns true for a pseudo-collision.
    pub fn move_to_next_event(&mut self, distance: f64) -> bool {
        let hit_boundary = self.step >= distance;
        if hit_boundary {
            let travelled = distance * self.interaction_coefficient();
            self.optical_depth_left = (self.optical_depth - travelled).max(0.0);
            self.step = distance;
        }

        self.dp.position = self.dp.position + self.dp.direction * self.step;
        let n = self.tissue.regions()[self.current_region].ops.n;
        self.dp.total_time += self.params.time_delay(self.step, n);

        self.history.record_step(self.current_region, self.step, !hit_boundary);
        self.history.add_point(self.dp.clone());
        self.track_index += 1;
        hit_boundary
    }

    /// Transmits through or reflects from the boundary the photon just reached.
    pub fn cross_region_or_reflect<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.params.absorption_weighting == AbsorptionWeightingType::Continuous {
            self.absorb_continuous();
        }

        let position = self.dp.position;
        let direction = self.dp.direction;
        let neighbor = self.tissue.neighbor_index(direction, self.current_region);
        let regions = self.tissue.regions();
        let n_current = regions[self.current_region].ops.n;
        let n_next = regions[neighbor].ops.n;

        let cos_theta = self.tissue.cos_to_boundary_normal(direction);
        let cos_crit = critical_cosine(n_current, n_next);
        let (mut reflect_prob, cos_snell) = fresnel(n_current, n_next, cos_theta);
        if cos_theta <= cos_crit {
            reflect_prob = 1.0;
        }

        let transmit = reflect_prob == 0.0 || (reflect_prob < 1.0 && rng.random::<f64>() > reflect_prob);
        if transmit {
            if self.tissue.on_domain_boundary(position) && !self.first_entry {
                let exit = self.tissue.exit_boundary(position);
                self.dp.events |= BoundaryEvents::on_exit(exit);
            } else {
                self.dp.direction = self.tissue.refracted_direction(position, direction, n_current, n_next, cos_snell);
                self.first_entry = false;
            }
            self.current_region = neighbor;
        } else {
            self.dp.direction = self.tissue.reflected_direction(position, direction);
            if self.first_entry {
                self.dp.events |= BoundaryEvents::on_exit(ExitBoundary::SpecularReflectance);
            }
        }
    }

    /// Applies the run's absorption policy at a real collision.
    pub fn absorb<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self.params.absorption_weighting {
            AbsorptionWeightingType::Analog => self.absorb_analog(rng),
            AbsorptionWeightingType::Discrete => self.absorb_discrete(),
            AbsorptionWeightingType::Continuous => self.absorb_continuous(),
        }
    }

    fn absorb_analog<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let ops = &self.tissue.regions()[self.current_region].ops;
        if analog_absorbs(rng.random::<f64>(), ops) {
            self.dp.state = PhotonState::Absorbed;
        }
    }

    fn absorb_discrete(&mut self) {
        let ops = &self.tissue.regions()[self.current_region].ops;
        self.dp.weight -= discrete_weight_loss(self.dp.weight, ops);
        self.sync_last_weight();
    }

    fn absorb_continuous(&mut self) {
        let mua = self.tissue.regions()[self.current_region].ops.mua;
        self.dp.weight -= continuous_weight_loss(self.dp.weight, mua, self.step);
        self.sync_last_weight();
    }

    fn sync_last_weight(&mut self) {
        let weight = self.dp.weight;
        if let Some(last) = self.history.last_point_mut() {
            last.weight = weight;
        }
    }

    /// Draws a new direction from the phase function, position unchanged.
    pub fn scatter<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let g = self.tissue.regions()[self.current_region].ops.g;
        self.dp.direction = self.phase_function.scatter(self.dp.direction, g, rng);
    }

    /// Resolves termination after an event.
    pub fn test_death<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.dp.state.is_alive() {
            if self.history.len() >= self.params.max_history_points {
                self.dp.state = PhotonState::KilledOverMaxCollisions;
            } else if self.history.total_path_length() > self.params.max_path_length {
                self.dp.state = PhotonState::KilledOverMaxPathLength;
            } else if let Some(exit) = self.dp.events.exit_boundary() {
                self.dp.state = PhotonState::ExitedDomain(exit);
            } else if self.dp.weight <= self.params.roulette_weight_threshold {
                self.roulette(rng);
            }
        }

        if !self.dp.state.is_alive() {
            // the last history point carries the terminal state
            if let Some(last) = self.history.last_point_mut() {
                *last = self.dp.clone();
            }
        }
    }

    /// Russian roulette: survive with the configured chance at boosted weight, otherwise die.
    pub fn roulette<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.dp.weight == 0.0 {
            self.dp.state = PhotonState::KilledRussianRoulette;
        } else if rng.random::<f64>() < self.params.roulette_chance {
            self.dp.weight /= self.params.roulette_chance;
            self.sync_last_weight();
        } else {
            self.dp.state = PhotonState::KilledRussianRoulette;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_rng::Mt19937;
    use crate::tissue::{MultiLayerTissue, TissueRegion};
    use approx::assert_relative_eq;
    use photon_transport_common::{OpticalProperties, PhaseFunctionType};

    fn slab(ops: OpticalProperties, weighting: AbsorptionWeightingType) -> MultiLayerTissue {
        MultiLayerTissue::new(
            vec![
                TissueRegion::ambient(f64::NEG_INFINITY, 0.0),
                TissueRegion::new(0.0, 100.0, ops),
                TissueRegion::ambient(100.0, f64::INFINITY),
            ],
            weighting,
        )
        .unwrap()
    }

    fn params(weighting: AbsorptionWeightingType) -> SimParams {
        SimParams::with_policies(weighting, PhaseFunctionType::HenyeyGreenstein)
    }

    const SCATTERING: OpticalProperties = OpticalProperties::new(0.01, 1.0, 0.8, 1.4);

    #[test]
    fn carried_over_depth_is_resumed_once() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Discrete);
        let params = params(AbsorptionWeightingType::Discrete);
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(5);
        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 50.0), Vec3::unit_z(), &tissue, &params, &phase);
        assert_eq!(photon.current_region(), 1);

        photon.optical_depth_left = 2.02;
        photon.set_step_size(&mut rng);
        assert_relative_eq!(photon.step_size(), 2.0, epsilon = 1e-12);
        assert_eq!(photon.optical_depth_left(), 0.0);

        photon.set_step_size(&mut rng);
        assert!(photon.step_size() > 0.0 && photon.step_size().is_finite());
    }

    #[test]
    fn pseudo_collision_stops_at_boundary_and_keeps_remainder() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Discrete);
        let params = params(AbsorptionWeightingType::Discrete);
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 99.0), Vec3::unit_z(), &tissue, &params, &phase);
        photon.optical_depth_left = 3.03;
        photon.set_step_size(&mut Mt19937::new(1));

        assert!(photon.move_to_next_event(1.0));
        assert_relative_eq!(photon.dp.position.z, 100.0);
        assert_relative_eq!(photon.optical_depth_left(), 3.03 - 1.01, epsilon = 1e-12);
        assert_relative_eq!(photon.dp.total_time, 1.4 / 299.792458, epsilon = 1e-15);
        assert_eq!(photon.history.sub_region_info[1].collision_count, 0);
        assert_eq!(photon.history.len(), 2);
        assert_eq!(photon.track_index(), 1);
    }

    #[test]
    fn first_contact_reflects_specularly_at_fresnel_rate() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Discrete);
        let params = params(AbsorptionWeightingType::Discrete);
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(2024);

        let trials = 20_000;
        let mut specular = 0;
        for _ in 0..trials {
            let mut photon = Photon::new(Vec3::zero(), Vec3::unit_z(), &tissue, &params, &phase);
            photon.set_step_size(&mut rng);
            let distance = tissue.distance_to_boundary(photon.dp.position, photon.dp.direction, 0);
            assert!(photon.move_to_next_event(distance));
            photon.cross_region_or_reflect(&mut rng);
            photon.test_death(&mut rng);
            match photon.dp.state {
                PhotonState::ExitedDomain(ExitBoundary::SpecularReflectance) => {
                    specular += 1;
                    assert!(photon.dp.events.contains(BoundaryEvents::SPECULAR_TISSUE_BOUNDARY));
                    assert_eq!(photon.dp.direction.z, -1.0);
                }
                PhotonState::Alive => {
                    assert_eq!(photon.current_region(), 1);
                    assert_eq!(photon.dp.direction, Vec3::unit_z());
                }
                other => panic!("unexpected state {:?}", other),
            }
        }
        let fraction = specular as f64 / trials as f64;
        assert!((fraction - 0.0278).abs() < 0.006, "specular fraction {}", fraction);
    }

    #[test]
    fn matched_boundary_transmits_without_a_draw() {
        let matched = OpticalProperties::new(0.0, 1e-10, 1.0, 1.0);
        let tissue = slab(matched, AbsorptionWeightingType::Discrete);
        let params = params(AbsorptionWeightingType::Discrete);
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(8);

        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 60.0), Vec3::new(0.6, 0.0, 0.8), &tissue, &params, &phase);
        photon.set_step_size(&mut rng);
        let distance = tissue.distance_to_boundary(photon.dp.position, photon.dp.direction, 1);
        assert!(photon.move_to_next_event(distance));

        let mut reference = rng.clone();
        photon.cross_region_or_reflect(&mut rng);
        assert_eq!(rng.next_word(), reference.next_word());

        photon.test_death(&mut rng);
        assert_eq!(photon.dp.state, PhotonState::ExitedDomain(ExitBoundary::DiffuseTransmittance));
        assert!(photon.dp.events.contains(BoundaryEvents::TRANSMITTED_TISSUE_BOUNDARY));
        assert_eq!(photon.history.last_point().map(|dp| dp.state), Some(photon.dp.state));
    }

    #[test]
    fn discrete_absorption_updates_last_history_point() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Discrete);
        let params = params(AbsorptionWeightingType::Discrete);
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(9);
        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 50.0), Vec3::unit_z(), &tissue, &params, &phase);
        photon.optical_depth_left = 0.101;
        photon.set_step_size(&mut rng);
        assert!(!photon.move_to_next_event(50.0));
        photon.absorb(&mut rng);
        assert_relative_eq!(photon.dp.weight, 1.0 / 1.01, epsilon = 1e-15);
        assert_eq!(photon.history.last_point().map(|dp| dp.weight), Some(photon.dp.weight));
        assert_eq!(photon.history.sub_region_info[1].collision_count, 1);
    }

    #[test]
    fn continuous_absorption_follows_path_length() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Continuous);
        let params = params(AbsorptionWeightingType::Continuous);
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(9);
        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 50.0), Vec3::unit_z(), &tissue, &params, &phase);
        photon.optical_depth_left = 2.0;
        photon.set_step_size(&mut rng);
        assert_relative_eq!(photon.step_size(), 2.0);
        assert!(!photon.move_to_next_event(50.0));
        photon.absorb(&mut rng);
        assert_relative_eq!(photon.dp.weight, (-0.02f64).exp(), epsilon = 1e-15);
    }

    #[test]
    fn continuous_absorption_deweights_the_segment_before_exit() {
        let ops = OpticalProperties::new(0.1, 1.0, 0.8, 1.0);
        let tissue = slab(ops, AbsorptionWeightingType::Continuous);
        let params = params(AbsorptionWeightingType::Continuous);
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(13);
        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 98.0), Vec3::unit_z(), &tissue, &params, &phase);
        photon.optical_depth_left = 5.0;
        photon.set_step_size(&mut rng);

        assert!(photon.move_to_next_event(2.0));
        assert_relative_eq!(photon.optical_depth_left(), 3.0, epsilon = 1e-12);
        photon.cross_region_or_reflect(&mut rng);
        photon.test_death(&mut rng);

        assert_eq!(photon.dp.state, PhotonState::ExitedDomain(ExitBoundary::DiffuseTransmittance));
        assert_relative_eq!(photon.dp.weight, (-0.2f64).exp(), epsilon = 1e-15);
        assert_eq!(photon.history.last_point().unwrap(), &photon.dp);
        assert_eq!(photon.history.sub_region_info[1].collision_count, 0);
    }

    #[test]
    fn roulette_has_two_outcomes() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Discrete);
        let mut params = params(AbsorptionWeightingType::Discrete);
        params.roulette_weight_threshold = 0.01;
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(77);

        let (mut survived, mut killed) = (0, 0);
        for _ in 0..2000 {
            let mut photon = Photon::new(Vec3::new(0.0, 0.0, 50.0), Vec3::unit_z(), &tissue, &params, &phase);
            photon.dp.weight = 0.005;
            photon.test_death(&mut rng);
            match photon.dp.state {
                PhotonState::Alive => {
                    assert_relative_eq!(photon.dp.weight, 0.05, epsilon = 1e-15);
                    survived += 1;
                }
                PhotonState::KilledRussianRoulette => killed += 1,
                other => panic!("unexpected state {:?}", other),
            }
        }
        assert!(survived > 100 && survived < 320, "{} survived", survived);
        assert_eq!(survived + killed, 2000);

        let mut zero = Photon::new(Vec3::new(0.0, 0.0, 50.0), Vec3::unit_z(), &tissue, &params, &phase);
        zero.dp.weight = 0.0;
        zero.test_death(&mut rng);
        assert_eq!(zero.dp.state, PhotonState::KilledRussianRoulette);
    }

    #[test]
    fn history_limit_kills_photon() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Discrete);
        let mut params = params(AbsorptionWeightingType::Discrete);
        params.max_history_points = 3;
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(1);
        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 50.0), Vec3::unit_z(), &tissue, &params, &phase);
        for _ in 0..2 {
            photon.optical_depth_left = 0.0101;
            photon.set_step_size(&mut rng);
            photon.move_to_next_event(100.0);
        }
        photon.test_death(&mut rng);
        assert_eq!(photon.dp.state, PhotonState::KilledOverMaxCollisions);
    }

    #[test]
    fn path_limit_kills_photon() {
        let tissue = slab(SCATTERING, AbsorptionWeightingType::Discrete);
        let mut params = params(AbsorptionWeightingType::Discrete);
        params.max_path_length = 1.0;
        let phase = PhaseFunction::HenyeyGreenstein;
        let mut rng = Mt19937::new(1);
        let mut photon = Photon::new(Vec3::new(0.0, 0.0, 50.0), Vec3::unit_z(), &tissue, &params, &phase);
        photon.optical_depth_left = 2.02;
        photon.set_step_size(&mut rng);
        photon.move_to_next_event(100.0);
        photon.test_death(&mut rng);
        assert_eq!(photon.dp.state, PhotonState::KilledOverMaxPathLength);
    }

    #[test]
    fn virtual_boundary_maps_to_exit() {
        let events = BoundaryEvents::REFLECTED_TISSUE_BOUNDARY | BoundaryEvents::DIFFUSE_REFLECTANCE_BOUNDARY;
        assert_eq!(events.exit_boundary(), Some(ExitBoundary::DiffuseReflectance));
        assert!(events.intersects(BoundaryEvents::VIRTUAL_BOUNDARIES));
        assert_eq!(BoundaryEvents::TRANSMITTED_TISSUE_BOUNDARY.exit_boundary(), None);
    }
}
