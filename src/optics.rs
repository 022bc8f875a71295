//! Interface optics: Fresnel reflection and total internal reflection.

/// Reflection probability and refracted polar cosine for unpolarized light
/// crossing from index `n1` into `n2` at incidence cosine `ca1` (taken as positive).
///
/// Returns `(r, cos_snell)`. When the photon cannot be transmitted `r` is 1 and
/// `cos_snell` is 0.
pub fn fresnel(n1: f64, n2: f64, ca1: f64) -> (f64, f64) {
    if n1 == n2 {
        return (0.0, ca1);
    }
    if ca1 > 1.0 - 1e-12 {
        // normal incidence
        let r = ((n2 - n1) / (n1 + n2)).powi(2);
        return (r, ca1);
    }
    if ca1 < 1e-6 {
        // grazing
        return (1.0, 0.0);
    }

    let sa1 = (1.0 - ca1 * ca1).sqrt();
    let sa2 = n1 * sa1 / n2;
    if sa2 >= 1.0 {
        return (1.0, 0.0);
    }
    let ca2 = (1.0 - sa2 * sa2).sqrt();

    let cap = ca1 * ca2 - sa1 * sa2; // cos(a1 + a2)
    let cam = ca1 * ca2 + sa1 * sa2; // cos(a1 - a2)
    let sap = sa1 * ca2 + ca1 * sa2; // sin(a1 + a2)
    let sam = sa1 * ca2 - ca1 * sa2; // sin(a1 - a2)
    let r = 0.5 * sam * sam * (cam * cam + cap * cap) / (sap * sap * cam * cam);
    (r, ca2)
}

/// Cosine of the critical angle going from `n_current` into `n_next`, or 0 when
/// total internal reflection cannot occur.
pub fn critical_cosine(n_current: f64, n_next: f64) -> f64 {
    if n_current > n_next {
        (1.0 - (n_next / n_current).powi(2)).sqrt()
    } else {
        0.0
    }
}
