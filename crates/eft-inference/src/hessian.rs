//! Curvature at a minimum: Hessian estimation and inversion.
//!
//! Parameter uncertainties come from the inverse Hessian of the NLL at the
//! best-fit point. The Hessian is estimated with forward differences of
//! the gradient, which costs `n + 1` gradient evaluations and stays
//! accurate because the gradients themselves are analytic.

use nalgebra::DMatrix;

use eft_core::Result;

use crate::optimizer::ObjectiveFunction;

/// Estimate the Hessian of `objective` at `params` by forward differences
/// of the gradient, symmetrized as `(H + H^T) / 2`.
pub fn hessian(objective: &dyn ObjectiveFunction, params: &[f64]) -> Result<DMatrix<f64>> {
    let n = params.len();
    let grad_center = objective.gradient(params)?;

    let mut hess = DMatrix::zeros(n, n);
    for j in 0..n {
        let eps = 1e-4 * params[j].abs().max(1.0);
        let mut shifted = params.to_vec();
        shifted[j] += eps;
        let grad_shifted = objective.gradient(&shifted)?;
        for i in 0..n {
            hess[(i, j)] = (grad_shifted[i] - grad_center[i]) / eps;
        }
    }

    let ht = hess.transpose();
    hess = (&hess + &ht) * 0.5;
    Ok(hess)
}

/// Invert a Hessian into a covariance matrix.
///
/// Even at a valid minimum the numerically estimated Hessian can be
/// slightly indefinite, so the Cholesky solve is retried with a
/// geometrically growing diagonal damping before falling back to an LU
/// inverse. Returns `None` when no attempt yields finite, positive
/// variances.
pub fn covariance_from_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);

    // Scale damping to the Hessian diagonal to be unit-ish across models.
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next_damping - damping;
        for i in 0..n {
            damped[(i, i)] += add;
        }
        damping = next_damping;
    }

    let cov = damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

/// Uncertainties from the Hessian diagonal alone, ignoring correlations.
/// Used as a fallback when the full inversion fails.
pub fn diagonal_uncertainties(hessian: &DMatrix<f64>) -> Vec<f64> {
    (0..hessian.nrows())
        .map(|i| {
            let h_ii = hessian[(i, i)];
            1.0 / h_ii.abs().max(1e-12).sqrt()
        })
        .collect()
}
