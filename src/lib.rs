//! Monte Carlo photon transport through layered turbid media.
//!
//! Photons are launched from a [`source::Source`], transported through a
//! [`tissue::Tissue`] by the [`photon::Photon`] state machine, and scored by
//! [`detector::Detector`]s. Runs are serial ([`simulation::run_serial`]) or
//! split over independent generator streams ([`parallel::run_parallel`]).

pub mod absorption;
pub mod database;
pub mod detector;
pub mod error;
pub mod history;
pub mod optics;
pub mod parallel;
pub mod phase_function;
pub mod photon;
pub mod simulation;
pub mod source;
pub mod stream_rng;
pub mod tissue;

pub use error::{Result, TransportError};
pub use parallel::{run_parallel, ParallelMonteCarloSimulation};
pub use photon::{BoundaryEvents, ExitBoundary, Photon, PhotonDataPoint, PhotonState};
pub use simulation::{run_serial, MonteCarloSimulation, TransportSetup};
