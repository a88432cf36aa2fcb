//! The closed-form log-likelihood of a partition tree given the data.

use rand::Rng;

use crate::param::Dataset;
use crate::segment::segments;
use crate::tree::Tree;

/// Log-Beta function, Stirling approximation.
pub(crate) fn log_beta(a: f64, b: f64) -> f64 {
    0.5 * std::f64::consts::TAU.ln() + (a - 0.5) * a.ln() + (b - 0.5) * b.ln()
        - (a + b - 0.5) * (a + b).ln()
}

/// Log-likelihood of `tree` given `ds`.
///
/// The first term charges every populated segment for its volume; the
/// second walks the segments backward, accruing the later segments' counts
/// into the second Beta argument:
///
/// ```text
/// l1 = -sum over s with count > 0 of count_s * ln V_s
/// l2 = sum over s = S-1..0 of ln B(count_s + 1, b_s),
///      b_s = sum over t > s of (count_t + 1)
/// ```
pub fn log_likelihood<R: Rng + ?Sized>(tree: &Tree, ds: &Dataset, rng: &mut R) -> f64 {
    let segments = segments(tree, ds, rng);

    let mut l1 = 0.;
    for segment in segments.iter() {
        if segment.count == 0 || segment.volume == 0. {
            continue;
        }
        l1 -= segment.count as f64 * segment.volume.ln();
    }

    let mut l2 = 0.;
    let mut b = 0.;
    for s in (0..segments.len()).rev() {
        let a = segments[s].count as f64 + 1.;
        b += if s + 1 < segments.len() {
            segments[s + 1].count as f64
        } else {
            0.
        } + 1.;
        l2 += log_beta(a, b);
    }

    l1 + l2
}
