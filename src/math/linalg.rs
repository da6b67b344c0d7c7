//! Small dense linear solver and the ellipsoid fit used by magnetometer
//! calibration

/// Solve `a * x = b` by Gaussian elimination with partial pivoting
///
/// Returns `None` for singular (or numerically singular) systems.
pub fn gauss_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }
    for col in 0..n {
        // pivot
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    // back substitution
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in (row + 1)..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

/// Least-squares solution of an overdetermined `a * x = b` via the normal
/// equations
pub fn least_squares(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let rows = a.len();
    if rows == 0 || rows != b.len() {
        return None;
    }
    let cols = a[0].len();
    if rows < cols {
        return None;
    }
    let mut ata = vec![vec![0.0; cols]; cols];
    let mut atb = vec![0.0; cols];
    for r in 0..rows {
        for i in 0..cols {
            for j in 0..cols {
                ata[i][j] += a[r][i] * a[r][j];
            }
            atb[i] += a[r][i] * b[r];
        }
    }
    gauss_solve(ata, atb)
}

/// Fit an axis-aligned ellipsoid to a point cloud
///
/// Fits `f0*x^2 + f1*x + f2*y^2 + f3*y + f4*z^2 + f5*z = 1` in a
/// least-squares sense, then recovers the center and the three semi-axis
/// lengths. Needs at least 6 points; returns `None` when the cloud is
/// degenerate (e.g. all points coplanar).
pub fn fit_ellipsoid(points: &[[f64; 3]]) -> Option<([f64; 3], [f64; 3])> {
    if points.len() < 6 {
        return None;
    }
    let a: Vec<Vec<f64>> = points
        .iter()
        .map(|p| vec![p[0] * p[0], p[0], p[1] * p[1], p[1], p[2] * p[2], p[2]])
        .collect();
    let b = vec![1.0; points.len()];
    let f = least_squares(&a, &b)?;

    if f[0].abs() < 1e-12 || f[2].abs() < 1e-12 || f[4].abs() < 1e-12 {
        return None;
    }
    let center = [
        -f[1] / (2.0 * f[0]),
        -f[3] / (2.0 * f[2]),
        -f[5] / (2.0 * f[4]),
    ];

    let a2 = vec![
        vec![
            f[0] * center[0] * center[0] + 1.0,
            f[0] * center[1] * center[1],
            f[0] * center[2] * center[2],
        ],
        vec![
            f[2] * center[0] * center[0],
            f[2] * center[1] * center[1] + 1.0,
            f[2] * center[2] * center[2],
        ],
        vec![
            f[4] * center[0] * center[0],
            f[4] * center[1] * center[1],
            f[4] * center[2] * center[2] + 1.0,
        ],
    ];
    let b2 = vec![f[0], f[2], f[4]];
    let s = gauss_solve(a2, b2)?;
    if s.iter().any(|&v| v <= 0.0 || !v.is_finite()) {
        return None;
    }
    let lengths = [1.0 / s[0].sqrt(), 1.0 / s[1].sqrt(), 1.0 / s[2].sqrt()];
    Some((center, lengths))
}
