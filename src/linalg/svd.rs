use ndarray::Array2;
use num_traits::Float;

use super::{pythag, sign};

/// Iteration cap per singular value in the implicit-shift QR sweep.
pub const MAX_SVD_ITERATIONS: usize = 30;

///
/// Singular value decomposition `A = U diag(w) V^T` of an `m x n` matrix,
/// computed with Householder bidiagonalisation followed by implicit-shift QR.
///
/// If a singular value does not converge within [`MAX_SVD_ITERATIONS`]
/// iterations the decomposition still completes with the best factors
/// available and `converged` is set to `false`. Callers decide how loud to be.
///
#[derive(Clone, Debug)]
pub struct Svd<T>
{
    /// Left singular vectors, `m x n`.
    pub u: Array2<T>,
    /// Singular values (non-negative, unsorted).
    pub w: Vec<T>,
    /// Right singular vectors, `n x n`.
    pub v: Array2<T>,
    pub converged: bool,
}

impl<T: Float> Svd<T>
{
    pub fn decompose(a: &Array2<T>) -> Self
    {
        let (m, n) = a.dim();
        let two = T::one() + T::one();
        let eps = T::epsilon();
        let mut u = a.clone();
        let mut w = vec![T::zero(); n];
        let mut v = Array2::from_elem((n, n), T::zero());
        let mut rv1 = vec![T::zero(); n];
        let mut converged = true;

        let mut g = T::zero();
        let mut scale = T::zero();
        let mut anorm = T::zero();
        let mut l = 0;

        // Householder reduction to bidiagonal form
        for i in 0..n
        {
            l = i + 2;
            rv1[i] = scale * g;
            g = T::zero();
            let mut s = T::zero();
            scale = T::zero();
            if i < m
            {
                for k in i..m
                {
                    scale = scale + u[[k, i]].abs();
                }
                if scale != T::zero()
                {
                    for k in i..m
                    {
                        u[[k, i]] = u[[k, i]] / scale;
                        s = s + u[[k, i]] * u[[k, i]];
                    }
                    let f = u[[i, i]];
                    g = -sign(s.sqrt(), f);
                    let h = f * g - s;
                    u[[i, i]] = f - g;
                    for j in (l - 1)..n
                    {
                        let mut s = T::zero();
                        for k in i..m
                        {
                            s = s + u[[k, i]] * u[[k, j]];
                        }
                        let f = s / h;
                        for k in i..m
                        {
                            u[[k, j]] = u[[k, j]] + f * u[[k, i]];
                        }
                    }
                    for k in i..m
                    {
                        u[[k, i]] = u[[k, i]] * scale;
                    }
                }
            }
            w[i] = scale * g;
            g = T::zero();
            s = T::zero();
            scale = T::zero();
            if i + 1 <= m && i + 1 != n
            {
                for k in (l - 1)..n
                {
                    scale = scale + u[[i, k]].abs();
                }
                if scale != T::zero()
                {
                    for k in (l - 1)..n
                    {
                        u[[i, k]] = u[[i, k]] / scale;
                        s = s + u[[i, k]] * u[[i, k]];
                    }
                    let f = u[[i, l - 1]];
                    g = -sign(s.sqrt(), f);
                    let h = f * g - s;
                    u[[i, l - 1]] = f - g;
                    for k in (l - 1)..n
                    {
                        rv1[k] = u[[i, k]] / h;
                    }
                    for j in (l - 1)..m
                    {
                        let mut s = T::zero();
                        for k in (l - 1)..n
                        {
                            s = s + u[[j, k]] * u[[i, k]];
                        }
                        for k in (l - 1)..n
                        {
                            u[[j, k]] = u[[j, k]] + s * rv1[k];
                        }
                    }
                    for k in (l - 1)..n
                    {
                        u[[i, k]] = u[[i, k]] * scale;
                    }
                }
            }
            anorm = anorm.max(w[i].abs() + rv1[i].abs());
        }

        // accumulation of right-hand transformations
        for i in (0..n).rev()
        {
            if i < n - 1
            {
                if g != T::zero()
                {
                    for j in l..n
                    {
                        v[[j, i]] = (u[[i, j]] / u[[i, l]]) / g;
                    }
                    for j in l..n
                    {
                        let mut s = T::zero();
                        for k in l..n
                        {
                            s = s + u[[i, k]] * v[[k, j]];
                        }
                        for k in l..n
                        {
                            v[[k, j]] = v[[k, j]] + s * v[[k, i]];
                        }
                    }
                }
                for j in l..n
                {
                    v[[i, j]] = T::zero();
                    v[[j, i]] = T::zero();
                }
            }
            v[[i, i]] = T::one();
            g = rv1[i];
            l = i;
        }

        // accumulation of left-hand transformations
        for i in (0..m.min(n)).rev()
        {
            let l = i + 1;
            let mut g = w[i];
            for j in l..n
            {
                u[[i, j]] = T::zero();
            }
            if g != T::zero()
            {
                g = T::one() / g;
                for j in l..n
                {
                    let mut s = T::zero();
                    for k in l..m
                    {
                        s = s + u[[k, i]] * u[[k, j]];
                    }
                    let f = (s / u[[i, i]]) * g;
                    for k in i..m
                    {
                        u[[k, j]] = u[[k, j]] + f * u[[k, i]];
                    }
                }
                for j in i..m
                {
                    u[[j, i]] = u[[j, i]] * g;
                }
            }
            else
            {
                for j in i..m
                {
                    u[[j, i]] = T::zero();
                }
            }
            u[[i, i]] = u[[i, i]] + T::one();
        }

        // diagonalisation of the bidiagonal form
        for k in (0..n).rev()
        {
            for its in 0..MAX_SVD_ITERATIONS
            {
                // test for splitting, rv1[0] is always zero
                let mut flag = true;
                let mut l = k;
                loop
                {
                    if l == 0 || rv1[l].abs() <= eps * anorm
                    {
                        flag = false;
                        break;
                    }
                    if w[l - 1].abs() <= eps * anorm
                    {
                        break;
                    }
                    l -= 1;
                }
                if flag
                {
                    // cancellation of rv1[l] when l > 0
                    let nm = l - 1;
                    let mut c = T::zero();
                    let mut s = T::one();
                    for i in l..=k
                    {
                        let f = s * rv1[i];
                        rv1[i] = c * rv1[i];
                        if f.abs() <= eps * anorm
                        {
                            break;
                        }
                        let g = w[i];
                        let mut h = pythag(f, g);
                        w[i] = h;
                        h = T::one() / h;
                        c = g * h;
                        s = -f * h;
                        for j in 0..m
                        {
                            let y = u[[j, nm]];
                            let z = u[[j, i]];
                            u[[j, nm]] = y * c + z * s;
                            u[[j, i]] = z * c - y * s;
                        }
                    }
                }
                let z = w[k];
                if l == k
                {
                    // singular value is made non-negative
                    if z < T::zero()
                    {
                        w[k] = -z;
                        for j in 0..n
                        {
                            v[[j, k]] = -v[[j, k]];
                        }
                    }
                    break;
                }
                if its == MAX_SVD_ITERATIONS - 1
                {
                    converged = false;
                }

                // shift from the bottom 2x2 minor
                let mut x = w[l];
                let nm = k - 1;
                let mut y = w[nm];
                let mut g = rv1[nm];
                let mut h = rv1[k];
                let mut f = ((y - z) * (y + z) + (g - h) * (g + h)) / (two * h * y);
                g = pythag(f, T::one());
                f = ((x - z) * (x + z) + h * ((y / (f + sign(g, f))) - h)) / x;
                let mut c = T::one();
                let mut s = T::one();

                // next QR transformation
                for j in l..=nm
                {
                    let i = j + 1;
                    g = rv1[i];
                    y = w[i];
                    h = s * g;
                    g = c * g;
                    let mut z = pythag(f, h);
                    rv1[j] = z;
                    c = f / z;
                    s = h / z;
                    f = x * c + g * s;
                    g = g * c - x * s;
                    h = y * s;
                    y = y * c;
                    for jj in 0..n
                    {
                        let x = v[[jj, j]];
                        let z = v[[jj, i]];
                        v[[jj, j]] = x * c + z * s;
                        v[[jj, i]] = z * c - x * s;
                    }
                    z = pythag(f, h);
                    w[j] = z;
                    if z != T::zero()
                    {
                        z = T::one() / z;
                        c = f * z;
                        s = h * z;
                    }
                    f = c * g + s * y;
                    x = c * y - s * g;
                    for jj in 0..m
                    {
                        let y = u[[jj, j]];
                        let z = u[[jj, i]];
                        u[[jj, j]] = y * c + z * s;
                        u[[jj, i]] = z * c - y * s;
                    }
                }
                rv1[l] = T::zero();
                rv1[k] = f;
                w[k] = x;
            }
        }
        Self { u, w, v, converged }
    }

    ///
    /// Rebuilds `U diag(max(w, floor)) V^T`.
    ///
    pub fn reconstruct_with_floor(&self, floor: T) -> Array2<T>
    {
        let (m, n) = self.u.dim();
        let mut a = Array2::from_elem((m, n), T::zero());
        for i in 0..m
        {
            for j in 0..n
            {
                let mut sum = T::zero();
                for k in 0..n
                {
                    sum = sum + self.u[[i, k]] * self.w[k].max(floor) * self.v[[j, k]];
                }
                a[[i, j]] = sum;
            }
        }
        a
    }
}

#[cfg(test)]
fn assert_reconstructs(a: &Array2<f64>, tol: f64)
{
    let svd = Svd::decompose(a);
    assert!(svd.converged);
    assert!(svd.w.iter().all(|&x| x >= 0.0));
    let b = svd.reconstruct_with_floor(0.0);
    for (x, y) in a.iter().zip(b.iter())
    {
        assert!((x - y).abs() < tol, "{x} != {y}");
    }
}

#[test]
fn test_svd_square()
{
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    for n in [1, 2, 4, 8]
    {
        let a = Array2::from_shape_fn((n, n), |_| rng.gen_range(-2.0..2.0));
        assert_reconstructs(&a, 1e-11);
    }
}

#[test]
fn test_svd_rectangular()
{
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let a = Array2::from_shape_fn((6, 3), |_| rng.gen_range(-1.0..1.0));
    assert_reconstructs(&a, 1e-11);
}

#[test]
fn test_svd_known_singular_values()
{
    use ndarray::array;
    let a = array![[3.0, 0.0], [0.0, -2.0]];
    let svd = Svd::decompose(&a);
    let mut w = svd.w.clone();
    w.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert!((w[0] - 2.0).abs() < 1e-14);
    assert!((w[1] - 3.0).abs() < 1e-14);
}

#[test]
fn test_svd_floor_inflates_small_singular_values()
{
    use ndarray::array;
    let a = array![[0.1, 0.0], [0.0, 4.0]];
    let svd = Svd::decompose(&a);
    let b = svd.reconstruct_with_floor(0.5);
    assert!((b[[0, 0]].abs() - 0.5).abs() < 1e-13);
    assert!((b[[1, 1]].abs() - 4.0).abs() < 1e-13);
    assert!(b[[0, 1]].abs() < 1e-13);
}
