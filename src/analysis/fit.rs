// Ordinary least-squares line fit

use serde::{Deserialize, Serialize};

/// First-degree polynomial fitted to (x, y) pairs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination; NaN when y has no variance
    pub r_squared: f64,
}

/// Fit `y = slope * x + intercept` by ordinary least squares
///
/// Returns `None` when fewer than two pairs are given, the slices differ in
/// length, any value is non-finite, or every x is identical.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Option<LineFit> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx <= f64::EPSILON * n {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy > 0.0 {
        (sxy * sxy) / (sxx * syy)
    } else {
        f64::NAN
    };

    Some(LineFit {
        slope,
        intercept,
        r_squared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_exact_line_is_recovered() {
        let xs = [-1.0, -0.75, -0.5, -0.25, 0.0];
        let ys = [40.0, 47.5, 55.0, 62.5, 70.0];
        let fit = fit_line(&xs, &ys).unwrap();
        assert_abs_diff_eq!(fit.slope, 30.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.intercept, 70.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_monotonic_data_still_fits() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 3.0, 2.0, 4.0];
        let fit = fit_line(&xs, &ys).unwrap();
        assert_abs_diff_eq!(fit.slope, 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.intercept, 1.3, epsilon = 1e-12);
        assert!(fit.r_squared < 1.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(fit_line(&[1.0], &[2.0]).is_none());
        assert!(fit_line(&[1.0, 1.0], &[2.0, 3.0]).is_none());
        assert!(fit_line(&[0.0, 1.0], &[2.0]).is_none());
        assert!(fit_line(&[0.0, 1.0], &[2.0, f64::NAN]).is_none());
    }
}
