use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use super::mt19937::Mt19937;
use super::period::PeriodChecker;
use super::prescreen::Prescreener;
use super::tempering::derive_tempering;
use crate::error::{Result, TransportError};

/// Mersenne exponents the generator family supports.
const MERSENNE_EXPONENTS: [usize; 15] = [
    521, 607, 1279, 2203, 2281, 3217, 4253, 4423, 9689, 9941, 11213, 19937, 21701, 23209, 44497,
];

/// Bits of the twist coefficient reserved for the stream id.
pub const DEFAULT_ID_SIZE: u32 = 16;
/// Largest stream id that fits in the reserved bits.
pub const MAX_STREAM_ID: u32 = 0xffff;
/// Candidate coefficients tried per stream before giving up.
pub const MAX_SEARCH: usize = 10_000;

/// Everything needed to run one independent Mersenne-Twister stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParameters {
    pub id: u32,
    /// Twist coefficient; the low 16 bits equal `id`.
    pub aaa: u32,
    pub mm: usize,
    pub nn: usize,
    pub rr: usize,
    pub ww: usize,
    pub wmask: u32,
    pub umask: u32,
    pub lmask: u32,
    pub shift0: u32,
    pub shift1: u32,
    pub shift_b: u32,
    pub shift_c: u32,
    pub mask_b: u32,
    pub mask_c: u32,
}

impl StreamParameters {
    pub fn period_exponent(&self) -> usize {
        self.nn * self.ww - self.rr
    }
}

/// Recurrence shape shared by every stream of one `(w, p)` family.
#[derive(Debug, Clone)]
struct SearchTemplate {
    m: usize,
    n: usize,
    r: usize,
    w: usize,
    wmask: u32,
    umask: u32,
    lmask: u32,
}

impl SearchTemplate {
    fn new(w: usize, p: usize) -> Result<Self> {
        if !(31..=32).contains(&w) {
            return Err(TransportError::invalid_generator(format!(
                "word length {} is not supported, only w = 31 or 32",
                w
            )));
        }
        if !MERSENNE_EXPONENTS.contains(&p) {
            let reason = if p < MERSENNE_EXPONENTS[0] {
                "is too small"
            } else if p > MERSENNE_EXPONENTS[MERSENNE_EXPONENTS.len() - 1] {
                "is too large"
            } else {
                "is not a Mersenne exponent"
            };
            return Err(TransportError::invalid_generator(format!("period exponent {} {}", p, reason)));
        }

        let n = p / w + 1;
        let m = if n / 2 < 2 { n - 1 } else { n / 2 };
        let r = n * w - p;

        let wmask = u32::MAX >> (32 - w);
        let lmask = (0..r).fold(0u32, |acc, _| (acc << 1) | 1);
        let umask = !lmask & wmask;

        Ok(SearchTemplate { m, n, r, w, wmask, umask, lmask })
    }

    fn prescreener(&self) -> Prescreener {
        Prescreener::new(self.m, self.n, self.r, self.w)
    }

    fn period_checker(&self) -> PeriodChecker {
        PeriodChecker::new(self.m, self.n, self.r, self.w)
    }

    /// Next candidate coefficient: random middle bits, MSB set, id in the low bits.
    fn next_candidate(&self, org: &mut Mt19937, id: u32) -> u32 {
        let shift = 32 - self.w as u32;
        let word_mask = (((u32::MAX << shift) >> shift) >> DEFAULT_ID_SIZE) << DEFAULT_ID_SIZE;
        (org.next_word() & word_mask) | (1 << (self.w - 1)) | id
    }

    fn find_coefficient(
        &self,
        pre: &Prescreener,
        ck: &PeriodChecker,
        org: &mut Mt19937,
        id: u32,
        max_attempts: usize,
    ) -> Result<u32> {
        for attempt in 0..max_attempts {
            let a = self.next_candidate(org, id);
            if pre.passes(a) && ck.has_maximal_period(org, a) {
                debug!("Stream {}: coefficient {:#010x} accepted after {} candidates", id, a, attempt + 1);
                return Ok(a);
            }
            trace!("Stream {}: rejected coefficient {:#010x}", id, a);
        }
        Err(TransportError::ParameterSearchExhausted { id, attempts: max_attempts })
    }

    fn finish(&self, id: u32, aaa: u32) -> StreamParameters {
        let tempering = derive_tempering(self.m, self.n, self.r, self.w, aaa);
        StreamParameters {
            id,
            aaa,
            mm: self.m,
            nn: self.n,
            rr: self.r,
            ww: self.w,
            wmask: self.wmask,
            umask: self.umask,
            lmask: self.lmask,
            shift0: tempering.shift0,
            shift1: tempering.shift1,
            shift_b: tempering.shift_b,
            shift_c: tempering.shift_c,
            mask_b: tempering.mask_b,
            mask_c: tempering.mask_c,
        }
    }
}

fn check_id(id: u32) -> Result<()> {
    if id > MAX_STREAM_ID {
        return Err(TransportError::invalid_generator(format!(
            "stream id {} must be at most {}",
            id, MAX_STREAM_ID
        )));
    }
    Ok(())
}

/// Searches parameters for a single stream. Same inputs always give the same result.
pub fn search_stream_parameter(w: usize, p: usize, id: u32, search_seed: u32) -> Result<StreamParameters> {
    let template = SearchTemplate::new(w, p)?;
    check_id(id)?;

    let mut org = Mt19937::new(search_seed);
    let pre = template.prescreener();
    let ck = template.period_checker();

    let aaa = template.find_coefficient(&pre, &ck, &mut org, id, MAX_SEARCH)?;
    Ok(template.finish(id, aaa))
}

/// Searches parameters for several streams, drawing candidates from one shared search state.
pub fn search_stream_parameters(
    w: usize,
    p: usize,
    ids: impl IntoIterator<Item = u32>,
    search_seed: u32,
) -> Result<Vec<StreamParameters>> {
    let template = SearchTemplate::new(w, p)?;
    let ids: Vec<u32> = ids.into_iter().collect();
    for &id in &ids {
        check_id(id)?;
    }

    let mut org = Mt19937::new(search_seed);
    let pre = template.prescreener();
    let ck = template.period_checker();

    let mut found = Vec::with_capacity(ids.len());
    for id in ids {
        let aaa = template.find_coefficient(&pre, &ck, &mut org, id, MAX_SEARCH)?;
        found.push(template.finish(id, aaa));
    }
    info!("Found parameters for {} streams (w = {}, p = {})", found.len(), w, p);
    Ok(found)
}
