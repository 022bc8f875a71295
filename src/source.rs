use photon_transport_common::{SourceConfig, Vec3};
use rand::RngCore;

use crate::error::{Result, TransportError};

/// Initial position and direction of a launched photon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Launch {
    pub position: Vec3,
    pub direction: Vec3,
}

pub trait Source: Send + Sync {
    fn launch(&self, rng: &mut dyn RngCore) -> Launch;
}

/// Pencil beam from a fixed point.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalPointSource {
    position: Vec3,
    direction: Vec3,
}

impl DirectionalPointSource {
    pub fn new(position: Vec3, direction: Vec3) -> Result<Self> {
        if !direction.is_unit(1e-9) {
            return Err(TransportError::configuration(format!(
                "source direction {:?} is not a unit vector",
                direction
            )));
        }
        Ok(DirectionalPointSource { position, direction })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let [px, py, pz] = config.position;
        let [dx, dy, dz] = config.direction;
        DirectionalPointSource::new(Vec3::new(px, py, pz), Vec3::new(dx, dy, dz))
    }
}

impl Source for DirectionalPointSource {
    fn launch(&self, _rng: &mut dyn RngCore) -> Launch {
        Launch { position: self.position, direction: self.direction }
    }
}
