use serde::{Deserialize, Serialize};

use crate::photon::PhotonDataPoint;

/// Path length and real-collision count accumulated inside one tissue region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubRegionCollisionInfo {
    pub path_length: f64,
    pub collision_count: u64,
}

impl SubRegionCollisionInfo {
    pub fn new(path_length: f64, collision_count: u64) -> Self {
        SubRegionCollisionInfo { path_length, collision_count }
    }
}

/// Append-only record of a photon's track.
///
/// Also the on-disk biography record used for offline perturbation analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotonHistory {
    pub data_points: Vec<PhotonDataPoint>,
    pub sub_region_info: Vec<SubRegionCollisionInfo>,
}

impl PhotonHistory {
    pub fn new(region_count: usize) -> Self {
        PhotonHistory {
            data_points: Vec::new(),
            sub_region_info: vec![SubRegionCollisionInfo::default(); region_count],
        }
    }

    pub fn add_point(&mut self, dp: PhotonDataPoint) {
        self.data_points.push(dp);
    }

    /// Accounts one step of `length` in `region`; `collided` marks a real collision.
    pub fn record_step(&mut self, region: usize, length: f64, collided: bool) {
        if let Some(info) = self.sub_region_info.get_mut(region) {
            info.path_length += length;
            if collided {
                info.collision_count += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_points.is_empty()
    }

    pub fn last_point(&self) -> Option<&PhotonDataPoint> {
        self.data_points.last()
    }

    pub fn last_point_mut(&mut self) -> Option<&mut PhotonDataPoint> {
        self.data_points.last_mut()
    }

    /// Physical path length summed over every region.
    pub fn total_path_length(&self) -> f64 {
        self.sub_region_info.iter().map(|info| info.path_length).sum()
    }

    pub fn total_collisions(&self) -> u64 {
        self.sub_region_info.iter().map(|info| info.collision_count).sum()
    }

    /// Consecutive `(previous, current)` pairs along the track.
    pub fn steps(&self) -> impl Iterator<Item = (&PhotonDataPoint, &PhotonDataPoint)> {
        self.data_points.windows(2).map(|pair| (&pair[0], &pair[1]))
    }
}
