use super::mt19937::Mt19937;

/// Full maximal-period verification for one recurrence shape.
///
/// A candidate is accepted when a random initial state, pushed through `p`
/// rounds of "generate forward 2p words, keep the odd-indexed ones, run the
/// recurrence backwards", comes back to itself. That is `x^(2^p) = x` modulo
/// the characteristic polynomial, which for a Mersenne exponent `p` means
/// the polynomial is primitive.
#[derive(Debug, Clone)]
pub struct PeriodChecker {
    m: usize,
    n: usize,
    p: usize,
    word_mask: u32,
    upper_mask: u32,
    lower_mask: u32,
}

impl PeriodChecker {
    pub fn new(m: usize, n: usize, r: usize, w: usize) -> Self {
        let word_mask = u32::MAX >> (32 - w);
        let lower_mask = (0..r).fold(0u32, |acc, _| (acc << 1) | 1);
        PeriodChecker {
            m,
            n,
            p: n * w - r,
            word_mask,
            upper_mask: !lower_mask & word_mask,
            lower_mask,
        }
    }

    /// True when `a` yields the full period. Draws `n` words from `st` for the initial state.
    pub fn has_maximal_period(&self, st: &mut Mt19937, a: u32) -> bool {
        let (m, n, p) = (self.m, self.n, self.p);
        let (upper, lower) = (self.upper_mask, self.lower_mask);
        let mat = [0u32, a];

        let mut x = vec![0u32; 2 * p];
        let mut init = vec![0u32; n];
        for i in 0..n {
            let v = self.word_mask & st.next_word();
            x[i] = v;
            init[i] = v;
        }
        // LSBs of x[2] and x[3] should differ.
        if (x[2] & 1) == (x[3] & 1) {
            x[3] ^= 1;
            init[3] ^= 1;
        }

        let pp = 2 * p - n;
        for _ in 0..p {
            // generate
            for i in 0..pp {
                let y = (x[i] & upper) | (x[i + 1] & lower);
                x[i + n] = x[i + m] ^ ((y >> 1) ^ mat[(y & 1) as usize]);
            }

            // keep odd subscripts
            for i in 2..=p {
                x[i] = x[(i << 1) - 1];
            }

            // reverse generate
            for i in (0..=p - n).rev() {
                let mut y = x[i + n] ^ x[i + m] ^ mat[(x[i + 1] & 1) as usize];
                y <<= 1;
                y |= x[i + 1] & 1;

                x[i + 1] = (x[i + 1] & upper) | (y & lower);
                x[i] = (y & upper) | (x[i] & lower);
            }
        }

        (x[0] & upper) == (init[0] & upper) && x[1..n] == init[1..n]
    }
}
