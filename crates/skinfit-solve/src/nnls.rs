//! Non-negative least squares.
//!
//! Solves `min ||A x - b||` subject to `x >= 0` with the Lawson-Hanson
//! active-set method. The unconstrained sub-problems on the passive set are
//! solved through an SVD, so rank-deficient systems still yield the
//! minimum-norm answer instead of failing.

use nalgebra::{DMatrix, DVector};

/// Relative cut-off below which singular values are treated as zero.
const SINGULAR_CUTOFF: f64 = 1e-12;

/// Output of one NNLS solve.
#[derive(Debug, Clone)]
pub struct NnlsSolution {
    /// Non-negative solution, one entry per column of `A`.
    pub x: DVector<f64>,
    /// Inner iterations performed.
    pub iterations: usize,
    /// Whether the KKT conditions were met before the iteration cap.
    pub converged: bool,
}

/// Bounded non-negative least-squares capability.
///
/// Implementations must never return negative entries and must return the
/// best intermediate iterate when the cap is hit.
pub trait NnlsSolver: Sync {
    fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>, max_iterations: usize) -> NnlsSolution;
}

/// Lawson-Hanson active-set NNLS.
#[derive(Debug, Clone, Copy)]
pub struct LawsonHanson {
    /// Dual feasibility tolerance, scaled by `max(1, |A^T b|_inf)`.
    pub tolerance: f64,
}

impl Default for LawsonHanson {
    fn default() -> Self {
        Self { tolerance: 1e-10 }
    }
}

impl LawsonHanson {
    pub const fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl NnlsSolver for LawsonHanson {
    fn solve(&self, a: &DMatrix<f64>, b: &DVector<f64>, max_iterations: usize) -> NnlsSolution {
        let n = a.ncols();
        let mut x = DVector::zeros(n);
        let mut passive = vec![false; n];
        let mut iterations = 0;

        let scale = a.tr_mul(b).amax().max(1.0);
        let tol = self.tolerance * scale;

        loop {
            // Gradient of -0.5 * ||Ax - b||^2
            let residual = b - a * &x;
            let w = a.tr_mul(&residual);

            let entering = (0..n)
                .filter(|&i| !passive[i])
                .max_by(|&i, &k| w[i].total_cmp(&w[k]).then(k.cmp(&i)))
                .filter(|&i| w[i] > tol);

            let Some(j) = entering else {
                return NnlsSolution {
                    x,
                    iterations,
                    converged: true,
                };
            };
            if iterations >= max_iterations {
                return NnlsSolution {
                    x,
                    iterations,
                    converged: false,
                };
            }
            passive[j] = true;

            let mut fresh = true;
            loop {
                iterations += 1;
                let z = solve_passive(a, b, &passive);

                // Numerically the entering coefficient can come out
                // non-positive; the current iterate is then optimal.
                if fresh && z[j] <= 0.0 {
                    passive[j] = false;
                    return NnlsSolution {
                        x,
                        iterations,
                        converged: true,
                    };
                }
                fresh = false;

                if (0..n).filter(|&i| passive[i]).all(|i| z[i] > 0.0) {
                    x = z;
                    break;
                }

                // Step from x towards z until the first passive entry hits zero.
                let alpha = (0..n)
                    .filter(|&i| passive[i] && z[i] <= 0.0)
                    .map(|i| x[i] / (x[i] - z[i]))
                    .fold(1.0_f64, f64::min)
                    .max(0.0);
                let step = (z - &x) * alpha;
                x += step;

                for i in 0..n {
                    if passive[i] && x[i] <= tol {
                        passive[i] = false;
                        x[i] = 0.0;
                    }
                }

                if iterations >= max_iterations {
                    clamp_negative(&mut x);
                    return NnlsSolution {
                        x,
                        iterations,
                        converged: false,
                    };
                }
            }
        }
    }
}

/// Unconstrained least squares restricted to the passive columns, scattered
/// back into a full-length vector.
fn solve_passive(a: &DMatrix<f64>, b: &DVector<f64>, passive: &[bool]) -> DVector<f64> {
    let columns: Vec<usize> = (0..passive.len()).filter(|&i| passive[i]).collect();
    let mut full = DVector::zeros(passive.len());
    if columns.is_empty() {
        return full;
    }

    let sub = a.select_columns(columns.iter());
    let svd = sub.svd(true, true);
    let cutoff = svd.singular_values.max() * SINGULAR_CUTOFF;
    if let Ok(z) = svd.solve(b, cutoff) {
        for (k, &col) in columns.iter().enumerate() {
            full[col] = z[k];
        }
    }
    full
}

fn clamp_negative(x: &mut DVector<f64>) {
    x.iter_mut().for_each(|v| {
        if v.is_nan() || *v < 0.0 {
            *v = 0.0;
        }
    });
}
