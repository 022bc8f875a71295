//! Cheap rejection of reducible characteristic polynomials.
//!
//! The characteristic polynomial of the recurrence is linear in the bits of
//! the twist coefficient `a`: `phi_a(t) = P_w(t) + sum_i a_i * P_i(t)`, where
//! the `P_i` depend only on `(m, n, r, w)`. Reducing every `P_i` modulo each
//! irreducible polynomial `q` of degree <= 9 once lets a candidate be tested
//! for divisibility by `q` with `w` XORs of tiny residues.

/// All irreducible polynomials over GF(2) of degree 1..=9, bit `i` holding
/// the coefficient of `t^i`, ordered by degree.
const IRREDUCIBLE_POLYNOMIALS: [u32; 127] = [
    0x002, 0x003, 0x007, 0x00b, 0x00d, 0x013, 0x019, 0x01f, 0x025, 0x029, 0x02f, 0x037, 0x03b,
    0x03d, 0x043, 0x049, 0x057, 0x05b, 0x061, 0x067, 0x06d, 0x073, 0x075, 0x083, 0x089, 0x08f,
    0x091, 0x09d, 0x0a7, 0x0ab, 0x0b9, 0x0bf, 0x0c1, 0x0cb, 0x0d3, 0x0d5, 0x0e5, 0x0ef, 0x0f1,
    0x0f7, 0x0fd, 0x11b, 0x11d, 0x12b, 0x12d, 0x139, 0x13f, 0x14d, 0x15f, 0x163, 0x165, 0x169,
    0x171, 0x177, 0x17b, 0x187, 0x18b, 0x18d, 0x19f, 0x1a3, 0x1a9, 0x1b1, 0x1bd, 0x1c3, 0x1cf,
    0x1d7, 0x1dd, 0x1e7, 0x1f3, 0x1f5, 0x1f9, 0x203, 0x211, 0x217, 0x21b, 0x221, 0x22d, 0x233,
    0x24b, 0x259, 0x25f, 0x265, 0x269, 0x26f, 0x277, 0x27d, 0x287, 0x295, 0x299, 0x2a3, 0x2a5,
    0x2af, 0x2b7, 0x2bd, 0x2cf, 0x2d1, 0x2db, 0x2f5, 0x2f9, 0x301, 0x313, 0x315, 0x31f, 0x323,
    0x331, 0x33b, 0x349, 0x34f, 0x35b, 0x361, 0x36b, 0x36d, 0x373, 0x37f, 0x385, 0x38f, 0x3a1,
    0x3b5, 0x3b9, 0x3c7, 0x3cb, 0x3cd, 0x3d5, 0x3d9, 0x3e3, 0x3e9, 0x3fb,
];

#[inline]
fn degree(p: u32) -> u32 {
    31 - p.leading_zeros()
}

/// Remainder of `a` modulo `modulus` over GF(2).
fn gf2_mod(mut a: u64, modulus: u32) -> u32 {
    let m = modulus as u64;
    let dm = degree(modulus);
    while a != 0 {
        let da = 63 - a.leading_zeros();
        if da < dm {
            break;
        }
        a ^= m << (da - dm);
    }
    a as u32
}

/// `a * b mod modulus` for residues of degree < 9.
fn gf2_mul_mod(a: u32, b: u32, modulus: u32) -> u32 {
    let mut product: u64 = 0;
    for bit in 0..32 {
        if (b >> bit) & 1 == 1 {
            product ^= (a as u64) << bit;
        }
    }
    gf2_mod(product, modulus)
}

/// `t^e mod modulus`.
fn gf2_t_pow_mod(e: usize, modulus: u32) -> u32 {
    let mut result = gf2_mod(1, modulus);
    let mut base = gf2_mod(0b10, modulus);
    let mut e = e;
    while e > 0 {
        if e & 1 == 1 {
            result = gf2_mul_mod(result, base, modulus);
        }
        base = gf2_mul_mod(base, base, modulus);
        e >>= 1;
    }
    result
}

/// Residues of the `w + 1` basis polynomials modulo one irreducible polynomial.
fn basis_residues(m: usize, n: usize, r: usize, w: usize, modulus: u32) -> Vec<u32> {
    let mut residues = Vec::with_capacity(w + 1);
    residues.push(gf2_mod(1, modulus));

    // t^n + t^m
    let t = gf2_t_pow_mod(n, modulus) ^ gf2_t_pow_mod(m, modulus);
    let mut t0 = t;
    for _ in 1..(w - r) {
        residues.push(t0);
        t0 = gf2_mul_mod(t0, t, modulus);
    }
    residues.push(t0);

    // t^(n-1) + t^(m-1)
    let s = gf2_t_pow_mod(n - 1, modulus) ^ gf2_t_pow_mod(m - 1, modulus);
    let mut s0 = gf2_mul_mod(t0, s, modulus);
    for _ in 0..r.saturating_sub(1) {
        residues.push(s0);
        s0 = gf2_mul_mod(s0, s, modulus);
    }
    residues.push(s0);

    debug_assert_eq!(residues.len(), w + 1);
    residues
}

/// Precomputed residue table for one `(m, n, r, w)` recurrence shape.
#[derive(Debug, Clone)]
pub struct Prescreener {
    word_length: usize,
    mod_lists: Vec<Vec<u32>>,
}

impl Prescreener {
    pub fn new(m: usize, n: usize, r: usize, w: usize) -> Self {
        let mod_lists = IRREDUCIBLE_POLYNOMIALS
            .iter()
            .map(|&q| basis_residues(m, n, r, w, q))
            .collect();
        Prescreener { word_length: w, mod_lists }
    }

    /// True when some small irreducible polynomial divides `phi_a`.
    fn is_reducible(&self, aaa: u32, residues: &[u32]) -> bool {
        let mut a = aaa;
        let mut x = residues[self.word_length];
        for i in (0..self.word_length).rev() {
            if a & 1 == 1 {
                x ^= residues[i];
            }
            a >>= 1;
        }
        x == 0
    }

    /// False when `aaa` is certainly not a maximal-period coefficient.
    pub fn passes(&self, aaa: u32) -> bool {
        !self.mod_lists.iter().any(|residues| self.is_reducible(aaa, residues))
    }
}
