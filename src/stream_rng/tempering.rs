//! Tempering parameter derivation.
//!
//! For fixed shifts (12, 18, 7, 15) the masks `b` and `c` are chosen bit by
//! bit so that the tempered output reaches the best k-distribution the
//! recurrence allows. The k-distribution for the top `v` bits is measured by
//! lattice reduction over the state-transition sequence: each row of the
//! lattice is a generator state whose tempered top-`v` bits have a single
//! leading pivot, and the smallest number of steps a row needed is the
//! achieved dimension.

const SHIFT_0: u32 = 12;
const SHIFT_1: u32 = 18;
const SHIFT_S: u32 = 7;
const SHIFT_T: u32 = 15;

/// Bits optimized exhaustively (all surviving branches kept) before the greedy pass.
const LIMIT_V_BEST_OPT: usize = 15;

const WORD_LEN: u32 = 32;

/// Tempering shifts and masks of a stream, masks aligned to the word length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tempering {
    pub shift0: u32,
    pub shift1: u32,
    pub shift_b: u32,
    pub shift_c: u32,
    pub mask_b: u32,
    pub mask_c: u32,
}

/// One generator state in the lattice, stored as a ring buffer of `n` words.
#[derive(Debug, Clone)]
struct LatticeVector {
    cf: Vec<u32>,
    start: usize,
    /// Steps taken from the initial state.
    count: usize,
    /// Tempered top-`v` bits of the most recent output.
    next: u32,
}

impl LatticeVector {
    fn zeroed(n: usize) -> Self {
        LatticeVector { cf: vec![0; n], start: 0, count: 0, next: 0 }
    }

    fn is_zero(&self) -> bool {
        self.cf.iter().all(|&w| w == 0)
    }

    /// u += v, aligning the two ring buffers by their start offsets.
    fn add(&mut self, other: &LatticeVector) {
        let n = self.cf.len();
        let diff = (other.start + n - self.start) % n;
        for i in 0..n {
            self.cf[i] ^= other.cf[(i + diff) % n];
        }
        self.next ^= other.next;
    }
}

#[derive(Debug, Clone, Copy)]
struct MaskNode {
    b: u32,
    c: u32,
    leng: i64,
}

/// Search state for one recurrence `(m, n, r, w, a)`.
struct EquidistributionSearch {
    mmm: usize,
    nnn: usize,
    rrr: usize,
    www: usize,
    aaa: [u32; 2],
    ggap: u32,
    bitmask: [u32; 32],
    gupper_mask: u32,
    glower_mask: u32,
    greatest_mask: u32,
    upper_v_bits: u32,
    mask_b: u32,
    mask_c: u32,
    gcur_maxlengs: [i64; 32],
    gmax_b: u32,
    gmax_c: u32,
}

impl EquidistributionSearch {
    fn new(m: usize, n: usize, r: usize, w: usize, a: u32) -> Self {
        let ggap = WORD_LEN - w as u32;
        let mut bitmask = [0u32; 32];
        for (i, bm) in bitmask.iter_mut().enumerate() {
            *bm = 0x8000_0000 >> i;
        }
        let lower = (0..r).fold(0u32, |acc, _| (acc << 1) | 1);
        EquidistributionSearch {
            mmm: m,
            nnn: n,
            rrr: r,
            www: w,
            // bits of a are filled from the MSB
            aaa: [0, a << ggap],
            ggap,
            bitmask,
            gupper_mask: (!lower) << ggap,
            glower_mask: lower << ggap,
            greatest_mask: (u32::MAX >> ggap) << ggap,
            upper_v_bits: 0,
            mask_b: 0,
            mask_c: 0,
            gcur_maxlengs: [-1; 32],
            gmax_b: 0,
            gmax_c: 0,
        }
    }

    /// Upper bound on steps spent looking for a non-zero pivot.
    fn step_limit(&self) -> usize {
        self.nnn * (self.www - 1) - self.rrr
    }

    #[inline]
    fn temper(&self, mut tmp: u32) -> u32 {
        tmp ^= (tmp >> SHIFT_0) & self.greatest_mask;
        tmp ^= (tmp << SHIFT_S) & self.mask_b;
        tmp ^= (tmp << SHIFT_T) & self.mask_c;
        tmp
    }

    /// Advances `v` until its tempered top bits are non-zero or the step budget runs out.
    fn next_state(&self, v: &mut LatticeVector, count: &mut usize) {
        let n = self.nnn;
        loop {
            let tmp = (v.cf[v.start] & self.gupper_mask) | (v.cf[(v.start + 1) % n] & self.glower_mask);
            let lsb = ((tmp >> self.ggap) & 1) as usize;
            v.cf[v.start] = v.cf[(v.start + self.mmm) % n] ^ ((tmp >> 1) ^ self.aaa[lsb]);
            v.cf[v.start] &= self.greatest_mask;
            let out = v.cf[v.start];
            v.start = (v.start + 1) % n;
            v.count += 1;
            v.next = self.temper(out) & self.upper_v_bits;
            *count += 1;
            if *count > self.step_limit() || v.next != 0 {
                break;
            }
        }
    }

    fn make_lattice(&self, v: usize) -> Vec<LatticeVector> {
        let mut lattice = Vec::with_capacity(v + 1);
        for i in 0..v {
            let mut row = LatticeVector::zeroed(self.nnn);
            row.next = self.bitmask[i];
            lattice.push(row);
        }

        let mut bottom = LatticeVector::zeroed(self.nnn);
        bottom.cf[self.nnn - 1] = 0xc000_0000 & self.greatest_mask;
        let mut count = 0;
        loop {
            self.next_state(&mut bottom, &mut count);
            if bottom.next != 0 || count > self.step_limit() {
                break;
            }
        }
        lattice.push(bottom);
        lattice
    }

    /// Achieved equidistribution dimension of the top `v` bits under the current masks.
    fn pivot_reduction(&mut self, v: usize) -> i64 {
        self.upper_v_bits = (0..v).fold(0u32, |acc, i| acc | self.bitmask[i]);

        let mut lattice = self.make_lattice(v);

        loop {
            if lattice[v].next == 0 {
                break;
            }
            let pivot = 31 - lattice[v].next.trailing_zeros() as usize;
            if lattice[pivot].count < lattice[v].count {
                lattice.swap(pivot, v);
            }
            let (head, tail) = lattice.split_at_mut(v);
            tail[0].add(&head[pivot]);

            if lattice[v].next == 0 {
                let mut count = 0;
                self.next_state(&mut lattice[v], &mut count);
                if lattice[v].next == 0 {
                    if lattice[v].is_zero() {
                        break;
                    }
                    while lattice[v].next == 0 {
                        count += 1;
                        self.next_state(&mut lattice[v], &mut count);
                        if count > self.step_limit() {
                            break;
                        }
                    }
                    if lattice[v].next == 0 {
                        break;
                    }
                }
            }
        }

        lattice[..v].iter().map(|row| row.count as i64).min().unwrap_or(0)
    }

    /// Candidate (b, c) pairs that fix bit `v` of both masks given the bits above.
    fn push_stack(&self, b: u32, c: u32, v: usize) -> Vec<(u32, u32)> {
        let (t, w) = (SHIFT_T as usize, self.www);
        let cvs: Vec<u32> = if v + t < w {
            vec![c | self.bitmask[v], c & !self.bitmask[v]]
        } else {
            vec![c]
        };

        let mut out = Vec::with_capacity(8);
        for cv in cvs {
            self.push_mask(v, b, cv, &mut out);
        }
        out
    }

    fn push_mask(&self, v: usize, b: u32, c: u32, out: &mut Vec<(u32, u32)>) {
        let (s, t, w) = (SHIFT_S as usize, SHIFT_T as usize, self.www);

        let bvs: Vec<u32> = if s + v >= w {
            vec![0]
        } else if v >= t && (c & self.bitmask[v - t]) != 0 {
            vec![b & self.bitmask[v]]
        } else {
            vec![self.bitmask[v], 0]
        };

        let bvts: Vec<u32> = if v + t + s < w && (c & self.bitmask[v]) != 0 {
            vec![self.bitmask[v + t], 0]
        } else {
            vec![0]
        };

        let mut bmask = self.bitmask[v];
        if v + t < w {
            bmask |= self.bitmask[v + t];
        }
        let bmask = !bmask;
        for &bvt in &bvts {
            for &bv in &bvs {
                out.push(((b & bmask) | bv | bvt, c));
            }
        }
    }

    /// Keeps every branch that reaches the best dimension so far for bit `v`.
    fn optimize_v_hard(&mut self, v: usize, prev: &[MaskNode]) -> Vec<MaskNode> {
        let mut cur: Vec<MaskNode> = Vec::new();

        // Most recently added nodes are processed first.
        for node in prev.iter().rev() {
            for (b, c) in self.push_stack(node.b, node.c, v) {
                self.mask_b = b;
                self.mask_c = c;
                let t = self.pivot_reduction(v + 1);
                if t >= self.gcur_maxlengs[v] {
                    self.gcur_maxlengs[v] = t;
                    self.gmax_b = b;
                    self.gmax_c = c;
                    cur.push(MaskNode { b, c, leng: t });
                }
            }
        }

        let best = self.gcur_maxlengs[v];
        cur.retain(|node| node.leng >= best);
        cur
    }

    /// Greedy single-branch optimization of bits `v..w`.
    fn optimize_v(&mut self, b: u32, c: u32, v: usize) {
        let candidates = self.push_stack(b, c, v);

        let mut max_len = 0;
        let mut max_i = 0;
        if candidates.len() > 1 {
            for (i, &(cb, cc)) in candidates.iter().enumerate() {
                self.mask_b = cb;
                self.mask_c = cc;
                let t = self.pivot_reduction(v + 1);
                if t > max_len {
                    max_len = t;
                    max_i = i;
                }
            }
        }

        let (best_b, best_c) = candidates[max_i];
        if v >= self.www - 1 {
            self.mask_b = best_b;
            self.mask_c = best_c;
            return;
        }
        self.optimize_v(best_b, best_c, v + 1);
    }
}

/// Derives tempering shifts and masks for the recurrence `(m, n, r, w, a)`.
pub fn derive_tempering(m: usize, n: usize, r: usize, w: usize, a: u32) -> Tempering {
    let mut eq = EquidistributionSearch::new(m, n, r, w, a);

    let mut cur = vec![MaskNode { b: 0, c: 0, leng: 0 }];
    for v in 0..LIMIT_V_BEST_OPT {
        cur = eq.optimize_v_hard(v, &cur);
    }

    let (b, c) = (eq.gmax_b, eq.gmax_c);
    eq.optimize_v(b, c, LIMIT_V_BEST_OPT);

    Tempering {
        shift0: SHIFT_0,
        shift1: SHIFT_1,
        shift_b: SHIFT_S,
        shift_c: SHIFT_T,
        mask_b: eq.mask_b >> eq.ggap,
        mask_c: eq.mask_c >> eq.ggap,
    }
}
