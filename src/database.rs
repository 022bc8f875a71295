//! Photon biography database.
//!
//! A bincode stream: one [`DatabaseHeader`] followed by one [`PhotonBiography`]
//! per launched photon. Reading it back lets perturbation detectors be
//! evaluated for new optical properties without transporting again.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use photon_transport_common::{DetectorConfig, DetectorResult};
use serde::{Deserialize, Serialize};

use crate::detector::build_detectors;
use crate::error::{Result, TransportError};
use crate::history::PhotonHistory;
use crate::tissue::Tissue;

/// Ordered data points plus per-region collision info of one photon.
pub type PhotonBiography = PhotonHistory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseHeader {
    pub photon_count: u64,
    pub region_count: usize,
    pub seed: u32,
}

pub struct BiographyWriter {
    writer: BufWriter<File>,
    header: DatabaseHeader,
    written: u64,
}

impl BiographyWriter {
    pub fn create<P: AsRef<Path>>(path: P, header: DatabaseHeader) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serialize_into(&mut writer, &header)?;
        debug!("Opened photon database {} for {} photons", path.as_ref().display(), header.photon_count);
        Ok(BiographyWriter { writer, header, written: 0 })
    }

    pub fn write(&mut self, biography: &PhotonBiography) -> Result<()> {
        bincode::serialize_into(&mut self.writer, biography)?;
        self.written += 1;
        Ok(())
    }

    /// Flushes the stream. Fails if fewer records were written than the header announced.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        if self.written != self.header.photon_count {
            return Err(TransportError::configuration(format!(
                "photon database announced {} records but {} were written",
                self.header.photon_count, self.written
            )));
        }
        Ok(self.written)
    }
}

pub struct BiographyReader {
    reader: BufReader<File>,
    header: DatabaseHeader,
    remaining: u64,
}

impl BiographyReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let header: DatabaseHeader = bincode::deserialize_from(&mut reader)?;
        let remaining = header.photon_count;
        Ok(BiographyReader { reader, header, remaining })
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }
}

impl Iterator for BiographyReader {
    type Item = Result<PhotonBiography>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(bincode::deserialize_from(&mut self.reader).map_err(TransportError::from))
    }
}

/// Re-tallies `detectors` over a stored reference run, normalized by the recorded photon count.
pub fn pmc_post_process<P: AsRef<Path>>(
    path: P,
    tissue: &dyn Tissue,
    detectors: &[DetectorConfig],
) -> Result<(DatabaseHeader, Vec<DetectorResult>)> {
    let reader = BiographyReader::open(path.as_ref())?;
    let header = reader.header().clone();
    if header.region_count != tissue.regions().len() {
        return Err(TransportError::configuration(format!(
            "database was recorded with {} regions, tissue has {}",
            header.region_count,
            tissue.regions().len()
        )));
    }

    let mut detectors = build_detectors(detectors, tissue)?;
    for biography in reader {
        let biography = biography?;
        for detector in detectors.iter_mut() {
            detector.tally(&biography, tissue)?;
        }
    }
    info!(
        "Post-processed {} photons from {}",
        header.photon_count,
        path.as_ref().display()
    );
    let results = detectors.iter().map(|d| d.result(header.photon_count)).collect();
    Ok((header, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photon::PhotonDataPoint;
    use photon_transport_common::Vec3;

    fn biography(weight: f64) -> PhotonBiography {
        let mut history = PhotonHistory::new(3);
        history.add_point(PhotonDataPoint::new(Vec3::zero(), Vec3::unit_z(), weight));
        history.record_step(1, 4.0, true);
        history
    }

    #[test]
    fn records_come_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photons.bin");
        let header = DatabaseHeader { photon_count: 3, region_count: 3, seed: 9 };

        let mut writer = BiographyWriter::create(&path, header.clone()).unwrap();
        for w in [1.0, 0.5, 0.25] {
            writer.write(&biography(w)).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let reader = BiographyReader::open(&path).unwrap();
        assert_eq!(reader.header(), &header);
        let weights: Vec<f64> = reader.map(|b| b.unwrap().data_points[0].weight).collect();
        assert_eq!(weights, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn short_database_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let header = DatabaseHeader { photon_count: 2, region_count: 3, seed: 0 };
        let mut writer = BiographyWriter::create(dir.path().join("short.bin"), header).unwrap();
        writer.write(&biography(1.0)).unwrap();
        assert!(writer.finish().is_err());
    }
}
