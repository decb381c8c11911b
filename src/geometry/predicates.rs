//! Small dense predicates on simplices of at most four vertices.
//!
//! Matrices are fixed `[[f64; 4]; 4]` blocks addressed by an explicit size
//! `n <= 4`, so neither the 2D nor the 3D engine allocates while testing.

/// Relative tolerance below which a determinant is treated as zero.
pub const REL_EPS: f64 = 1e-12;

/// Determinant of the leading `n x n` block by partial-pivot elimination.
pub fn det(m: &[[f64; 4]; 4], n: usize) -> f64 {
    let mut a = *m;
    let mut d = 1.0;
    for col in 0..n {
        let mut piv = col;
        for row in col + 1..n {
            if a[row][col].abs() > a[piv][col].abs() {
                piv = row;
            }
        }
        if a[piv][col] == 0.0 {
            return 0.0;
        }
        if piv != col {
            a.swap(piv, col);
            d = -d;
        }
        d *= a[col][col];
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
        }
    }
    d
}

/// Solve the leading `n x n` system `a x = b`; `None` when singular.
pub fn solve(m: &[[f64; 4]; 4], rhs: &[f64; 4], n: usize) -> Option<[f64; 4]> {
    let mut a = *m;
    let mut b = *rhs;
    for col in 0..n {
        let mut piv = col;
        for row in col + 1..n {
            if a[row][col].abs() > a[piv][col].abs() {
                piv = row;
            }
        }
        if a[piv][col] == 0.0 {
            return None;
        }
        a.swap(piv, col);
        b.swap(piv, col);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = [0.0; 4];
    for row in (0..n).rev() {
        let mut s = b[row];
        for k in row + 1..n {
            s -= a[row][k] * x[k];
        }
        x[row] = s / a[row][row];
    }
    Some(x)
}

#[inline]
pub fn dist2<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Signed volume (times `D!`) of the simplex `pts[0..=D]`.
pub fn orient<const D: usize>(pts: &[[f64; D]]) -> f64 {
    let mut m = [[0.0; 4]; 4];
    for i in 1..=D {
        for k in 0..D {
            m[i - 1][k] = pts[i][k] - pts[0][k];
        }
    }
    det(&m, D)
}

/// Tolerance for [`orient`] scaled by the simplex edge lengths.
pub fn orient_tol<const D: usize>(pts: &[[f64; D]]) -> f64 {
    let scale: f64 = (1..=D).map(|i| dist2(&pts[i], &pts[0]).sqrt()).product();
    REL_EPS * scale
}

/// Gram matrix of the edge vectors `pts[i] - pts[0]`, `i >= 1`.
fn gram<const D: usize>(pts: &[[f64; D]]) -> ([[f64; 4]; 4], [f64; 4], usize) {
    let k = pts.len() - 1;
    let mut g = [[0.0; 4]; 4];
    let mut b = [0.0; 4];
    for i in 0..k {
        for j in 0..k {
            g[i][j] = (0..D)
                .map(|a| (pts[i + 1][a] - pts[0][a]) * (pts[j + 1][a] - pts[0][a]))
                .sum();
        }
        b[i] = 0.5 * g[i][i];
    }
    (g, b, k)
}

/// Whether the points span a simplex of full dimension `pts.len() - 1`.
pub fn affinely_independent<const D: usize>(pts: &[[f64; D]]) -> bool {
    if pts.len() <= 1 {
        return true;
    }
    if pts.len() > D + 1 {
        return false;
    }
    let (g, _, k) = gram(pts);
    let scale: f64 = (0..k).map(|i| g[i][i]).product();
    det(&g, k) > REL_EPS * scale
}

/// Circumscribed ball of a `k`-simplex (`k + 1 <= D + 1` points) inside its
/// affine hull: `(center, radius^2)`.
pub fn circumball<const D: usize>(pts: &[[f64; D]]) -> Option<([f64; D], f64)> {
    let mut center = pts[0];
    if pts.len() == 1 {
        return Some((center, 0.0));
    }
    let (g, b, k) = gram(pts);
    let lambda = solve(&g, &b, k)?;
    for a in 0..D {
        for i in 0..k {
            center[a] += lambda[i] * (pts[i + 1][a] - pts[0][a]);
        }
    }
    let r2 = dist2(&center, &pts[0]);
    r2.is_finite().then_some((center, r2))
}

/// Whether `p` lies strictly inside the circumball of the `D`-simplex `cell`.
///
/// Exact ties are broken by treating the lifted heights as perturbed by
/// infinitesimal weights ordered by `ids` (smaller id, larger weight), so
/// cocircular input produces the same triangulation whatever the insertion
/// order.
pub fn in_sphere<const D: usize>(cell: &[[f64; D]], ids: &[u64], p: &[f64; D], pid: u64) -> bool {
    let n = D + 1;
    let mut lifted = [[0.0; 4]; 4];
    let mut flat = [[0.0; 4]; 4];
    let mut scale = 0.0_f64;
    for i in 0..n {
        let mut s = 0.0;
        for k in 0..D {
            let y = cell[i][k] - p[k];
            lifted[i][k] = y;
            flat[i][k] = y;
            s += y * y;
        }
        lifted[i][D] = s;
        flat[i][D] = 1.0;
        scale = scale.max(s);
    }
    let o = det(&flat, n);
    let ins = det(&lifted, n);
    let tol = REL_EPS * scale.powf((D as f64 + 2.0) / 2.0);
    if ins.abs() > tol {
        return ins * o > 0.0;
    }

    // Tie: the dominant perturbation term belongs to the smallest id whose
    // cofactor does not vanish. The query point's cofactor is `-o`.
    let mut order: Vec<usize> = (0..n).filter(|&i| ids[i] < pid).collect();
    order.sort_by_key(|&i| ids[i]);
    for i in order {
        let mut minor = [[0.0; 4]; 4];
        let mut row = 0;
        for j in (0..n).filter(|&j| j != i) {
            minor[row][..D].copy_from_slice(&flat[j][..D]);
            row += 1;
        }
        let sign = if (i + D) % 2 == 0 { 1.0 } else { -1.0 };
        let c = sign * det(&minor, D);
        let ctol = REL_EPS * scale.powf(D as f64 / 2.0);
        if c.abs() > ctol {
            return -c * o > 0.0;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn det_of_permutation() {
        let mut m = [[0.0; 4]; 4];
        m[0][1] = 1.0;
        m[1][0] = 1.0;
        m[2][2] = 2.0;
        assert_eq!(det(&m, 3), -2.0);
    }

    #[test]
    fn triangle_circumball() {
        let (c, r2) = circumball(&[[0.0, 0.0], [2.0, 0.0], [0.0, 2.0]]).unwrap();
        assert!((c[0] - 1.0).abs() < 1e-12 && (c[1] - 1.0).abs() < 1e-12);
        assert!((r2 - 2.0).abs() < 1e-12);
    }

    #[test]
    fn edge_circumball_in_3d() {
        let (c, r2) = circumball(&[[0.0, 0.0, 0.0], [0.0, 0.0, 2.0]]).unwrap();
        assert_eq!(c, [0.0, 0.0, 1.0]);
        assert!((r2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn collinear_is_dependent() {
        assert!(!affinely_independent(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]));
        assert!(affinely_independent(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]));
    }

    #[test]
    fn sphere_inside_outside() {
        let cell = [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]];
        let ids = [0, 1, 2];
        assert!(in_sphere(&cell, &ids, &[0.0, 0.0], 3));
        assert!(!in_sphere(&cell, &ids, &[10.0, 0.0], 3));
        // orientation of the cell does not matter
        let rev = [[-1.0, 0.0], [0.0, 1.0], [1.0, 0.0]];
        assert!(in_sphere(&rev, &ids, &[0.0, 0.2], 3));
    }

    #[test]
    fn cocircular_tie_is_order_independent() {
        // Unit square: which diagonal wins must not depend on which triangle is
        // built first.
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        let d = [1.0, 1.0];
        let first = in_sphere(&[a, b, c], &[0, 1, 2], &d, 3);
        let second = in_sphere(&[b, d, a], &[1, 3, 0], &c, 2);
        // Exactly one of the two diagonals survives: either d breaks abc, or c
        // leaves bda intact, never both or neither.
        assert_ne!(first, second);
    }
}
