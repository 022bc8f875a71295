use rand::rand_core::impls;
use rand::RngCore;

use super::mt19937::INIT_MULTIPLIER;
use super::search::StreamParameters;
use crate::error::{Result, TransportError};

/// One independent Mersenne-Twister stream built from searched parameters.
#[derive(Debug, Clone)]
pub struct StreamGenerator {
    params: StreamParameters,
    state: Vec<u32>,
    index: usize,
}

impl StreamGenerator {
    /// Fails for parameter sets the recurrence cannot run, e.g. a hand-edited or truncated file.
    pub fn new(params: StreamParameters, seed: u32) -> Result<Self> {
        check_params(&params)?;
        let mut generator = StreamGenerator { state: vec![0; params.nn], index: params.nn, params };
        generator.seed(seed);
        Ok(generator)
    }

    /// Resets the state from `seed`. Calling twice with the same seed restarts the sequence.
    pub fn seed(&mut self, seed: u32) {
        let mut s = seed;
        for (i, slot) in self.state.iter_mut().enumerate() {
            *slot = s;
            s = INIT_MULTIPLIER
                .wrapping_mul(s ^ (s >> 30))
                .wrapping_add(i as u32 + 1);
        }
        let wmask = self.params.wmask;
        for slot in self.state.iter_mut() {
            *slot &= wmask;
        }
        self.index = self.params.nn;
    }

    pub fn params(&self) -> &StreamParameters {
        &self.params
    }

    pub fn id(&self) -> u32 {
        self.params.id
    }

    fn reload(&mut self) {
        let (n, m) = (self.params.nn, self.params.mm);
        let (upper, lower, a) = (self.params.umask, self.params.lmask, self.params.aaa);
        let st = &mut self.state;
        let twist = |x: u32| (x >> 1) ^ if x & 1 == 1 { a } else { 0 };

        for k in 0..n - m {
            let x = (st[k] & upper) | (st[k + 1] & lower);
            st[k] = st[k + m] ^ twist(x);
        }
        for k in n - m..n - 1 {
            let x = (st[k] & upper) | (st[k + 1] & lower);
            st[k] = st[k + m - n] ^ twist(x);
        }
        let x = (st[n - 1] & upper) | (st[0] & lower);
        st[n - 1] = st[m - 1] ^ twist(x);
        self.index = 0;
    }

    /// Next output in the low `w` bits.
    pub fn next_word(&mut self) -> u32 {
        if self.index >= self.params.nn {
            self.reload();
        }
        let p = &self.params;
        let mut x = self.state[self.index];
        self.index += 1;
        x ^= x >> p.shift0;
        x ^= (x << p.shift_b) & p.mask_b;
        x ^= (x << p.shift_c) & p.mask_c;
        x ^= x >> p.shift1;
        x
    }
}

fn check_params(p: &StreamParameters) -> Result<()> {
    if p.ww != 31 && p.ww != 32 {
        return Err(TransportError::invalid_generator(format!("word length {} must be 31 or 32", p.ww)));
    }
    if p.mm == 0 || p.mm >= p.nn {
        return Err(TransportError::invalid_generator(format!(
            "middle offset m = {} must lie in 1..{} (n = {})",
            p.mm, p.nn, p.nn
        )));
    }
    let shifts = [p.shift0, p.shift1, p.shift_b, p.shift_c];
    if let Some(bad) = shifts.iter().find(|&&s| s >= 32) {
        return Err(TransportError::invalid_generator(format!("tempering shift {} exceeds the word", bad)));
    }
    Ok(())
}

impl RngCore for StreamGenerator {
    /// Output aligned to the most significant bit, so float conversions see full precision for w = 31.
    fn next_u32(&mut self) -> u32 {
        let shift = 32 - self.params.ww as u32;
        self.next_word() << shift
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        impls::fill_bytes_via_next(self, dst)
    }
}
