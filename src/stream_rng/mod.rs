//! Dynamically created Mersenne-Twister streams.
//!
//! Every worker of a parallel run draws from its own generator whose twist
//! coefficient embeds the worker's id. Coefficients with distinct ids give
//! characteristic polynomials that are coprime, so the streams are
//! statistically independent even when they share one seed.
//!
//! Finding parameters is a deterministic function of `(w, p, id, search_seed)`:
//!
//! 1. draw candidate coefficients from an MT19937 seeded with `search_seed`;
//! 2. discard candidates whose characteristic polynomial has a small factor;
//! 3. verify the full period for the rest;
//! 4. derive tempering masks that maximize equidistribution.

mod mt19937;
mod period;
mod prescreen;
mod search;
mod stream;
mod tempering;

pub use mt19937::Mt19937;
pub use search::{
    search_stream_parameter, search_stream_parameters, StreamParameters, DEFAULT_ID_SIZE, MAX_SEARCH,
    MAX_STREAM_ID,
};
pub use stream::StreamGenerator;

use crate::error::Result;

pub const DEFAULT_WORD_LENGTH: usize = 32;
pub const DEFAULT_PERIOD_EXPONENT: usize = 521;
pub const DEFAULT_SEARCH_SEED: u32 = 4172;

/// Builds a seeded generator for stream `id`.
pub fn generator(w: usize, p: usize, id: u32, search_seed: u32, seed: u32) -> Result<StreamGenerator> {
    let params = search_stream_parameter(w, p, id, search_seed)?;
    StreamGenerator::new(params, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use rand::Rng;

    fn draws(g: &mut StreamGenerator, count: usize) -> Vec<u32> {
        (0..count).map(|_| g.next_word()).collect()
    }

    #[test]
    fn same_inputs_give_same_sequence() {
        let mut a = generator(32, 521, 0, DEFAULT_SEARCH_SEED, 42).unwrap();
        let mut b = generator(32, 521, 0, DEFAULT_SEARCH_SEED, 42).unwrap();
        assert_eq!(draws(&mut a, 1000), draws(&mut b, 1000));
    }

    #[test]
    fn reseeding_restarts_the_sequence() {
        let mut g = generator(32, 521, 2, DEFAULT_SEARCH_SEED, 7).unwrap();
        let first = draws(&mut g, 100);
        g.seed(7);
        assert_eq!(draws(&mut g, 100), first);
    }

    #[test]
    fn distinct_ids_give_distinct_streams() {
        let mut a = generator(32, 521, 0, DEFAULT_SEARCH_SEED, 42).unwrap();
        let mut b = generator(32, 521, 1, DEFAULT_SEARCH_SEED, 42).unwrap();
        assert_eq!(a.params().aaa & 0xffff, 0);
        assert_eq!(b.params().aaa & 0xffff, 1);
        assert_ne!(a.params().aaa, b.params().aaa);

        let n = 10_000;
        let xs: Vec<f64> = (0..n).map(|_| a.random::<f64>()).collect();
        let ys: Vec<f64> = (0..n).map(|_| b.random::<f64>()).collect();
        assert_ne!(xs[..100], ys[..100]);

        let mean_x = xs.iter().sum::<f64>() / n as f64;
        let mean_y = ys.iter().sum::<f64>() / n as f64;
        let cov: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum::<f64>() / n as f64;
        let var_x: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum::<f64>() / n as f64;
        let var_y: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum::<f64>() / n as f64;
        let corr = cov / (var_x * var_y).sqrt();
        assert!(corr.abs() < 0.05, "correlation {}", corr);
    }

    #[test]
    fn uniform_draws_have_sensible_mean() {
        let mut g = generator(32, 521, 5, DEFAULT_SEARCH_SEED, 1).unwrap();
        let n = 20_000;
        let mean = (0..n).map(|_| g.random::<f64>()).sum::<f64>() / n as f64;
        assert!((mean - 0.5).abs() < 0.02, "mean {}", mean);
    }

    #[test]
    fn short_word_output_fits_in_31_bits() {
        let mut g = generator(31, 521, 0, DEFAULT_SEARCH_SEED, 3).unwrap();
        assert_eq!(g.params().ww, 31);
        for _ in 0..1000 {
            assert!(g.next_word() < (1 << 31));
        }
    }

    #[test]
    fn invalid_inputs_surface_as_errors() {
        assert!(matches!(
            generator(30, 521, 0, DEFAULT_SEARCH_SEED, 1),
            Err(TransportError::InvalidGeneratorParameters(_))
        ));
        assert!(matches!(
            generator(32, 521, MAX_STREAM_ID + 1, DEFAULT_SEARCH_SEED, 1),
            Err(TransportError::InvalidGeneratorParameters(_))
        ));
    }

    #[test]
    fn parameters_survive_serialization() {
        let params = search_stream_parameter(32, 521, 4, DEFAULT_SEARCH_SEED).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let back: StreamParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
