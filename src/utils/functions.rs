use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// The Chebyshev polynomial of the first kind $`T_n(x)`$, evaluated with the three-term recurrence
/// ```math
/// T_{n+1}(x) = 2xT_n(x) - T_{n-1}(x)
/// ```
pub fn chebyshev_t(n: usize, x: f64) -> f64 {
    match n {
        0 => 1.0,
        1 => x,
        _ => {
            let (mut t_prev, mut t) = (1.0, x);
            for _ in 1..n {
                let t_next = 2.0 * x * t - t_prev;
                t_prev = t;
                t = t_next;
            }
            t
        }
    }
}

/// An antiderivative of $`T_n(x)`$:
/// ```math
/// \int T_n(x)\,dx = \frac{T_{n+1}(x)}{2(n+1)} - \frac{T_{n-1}(x)}{2(n-1)}\quad (n \geq 2)
/// ```
/// with $`x`$ and $`x^2/2`$ for $`n = 0, 1`$.
pub fn chebyshev_t_antiderivative(n: usize, x: f64) -> f64 {
    match n {
        0 => x,
        1 => 0.5 * x * x,
        _ => {
            chebyshev_t(n + 1, x) / (2.0 * (n + 1) as f64)
                - chebyshev_t(n - 1, x) / (2.0 * (n - 1) as f64)
        }
    }
}

/// The integral of the unnormalized Gaussian $`\exp(-\frac{1}{2}(\frac{x-\mu}{\sigma})^2)`$ over
/// $`[a, b]`$.
pub fn gaussian_integral(mean: f64, sigma: f64, a: f64, b: f64) -> f64 {
    let sigma = sigma.abs();
    let scale = sigma * f64::sqrt(PI / 2.0);
    let za = (a - mean) / sigma * FRAC_1_SQRT_2;
    let zb = (b - mean) / sigma * FRAC_1_SQRT_2;
    // erfc keeps precision when both edges sit far into the same tail
    if za > 0.0 {
        scale * (libm::erfc(za) - libm::erfc(zb))
    } else if zb < 0.0 {
        scale * (libm::erfc(-zb) - libm::erfc(-za))
    } else {
        scale * (libm::erf(zb) - libm::erf(za))
    }
}

/// The natural logarithm with non-positive and non-finite inputs clamped to the smallest
/// positive float (and infinity to the largest).
#[inline]
pub fn ln_clamped(value: f64) -> f64 {
    if value > f64::MIN_POSITIVE && value.is_finite() {
        value.ln()
    } else if value == f64::INFINITY {
        f64::MAX.ln()
    } else {
        f64::MIN_POSITIVE.ln()
    }
}
