use ndarray::Array2;
use num_traits::Float;

use super::sign;

///
/// Applies a Givens rotation to rows `i` and `i+1` of `r`, for columns
/// `start..n`. The rotation angle is defined by `(a, b)` such that
/// `cos = a / sqrt(a^2 + b^2)` and `sin = b / sqrt(a^2 + b^2)`.
///
/// Row `i` becomes `cos * row_i - sin * row_{i+1}` and row `i+1` becomes
/// `sin * row_i + cos * row_{i+1}`.
///
pub fn rotate<T: Float>(r: &mut Array2<T>, i: usize, start: usize, a: T, b: T)
{
    let n = r.ncols();
    let (c, s) = if a == T::zero()
    {
        (T::zero(), if b >= T::zero() { T::one() } else { -T::one() })
    }
    else if a.abs() > b.abs()
    {
        let fact = b / a;
        let c = sign(T::one(), a) / (T::one() + fact * fact).sqrt();
        (c, fact * c)
    }
    else
    {
        let fact = a / b;
        let s = sign(T::one(), b) / (T::one() + fact * fact).sqrt();
        (fact * s, s)
    };
    for j in start..n
    {
        let y = r[[i, j]];
        let w = r[[i + 1, j]];
        r[[i, j]] = c * y - s * w;
        r[[i + 1, j]] = s * y + c * w;
    }
}

///
/// In-place QR decomposition of a square matrix by Givens elimination.
/// On return `r` holds the upper triangular factor `R` of `A = QR`; the
/// orthogonal factor is discarded since only `R^T R = A^T A` is needed.
///
pub fn qr_decompose<T: Float>(r: &mut Array2<T>)
{
    let n = r.nrows();
    debug_assert_eq!(n, r.ncols());
    for j in 0..n
    {
        for i in ((j + 1)..n).rev()
        {
            let b = r[[i, j]];
            if b == T::zero()
            {
                continue;
            }
            let a = r[[i - 1, j]];
            rotate(r, i - 1, j, a, -b);
            r[[i, j]] = T::zero();
        }
    }
}

///
/// Rank-one update of an upper triangular factor: on return `r` is upper
/// triangular with `r'^T r' = (R + u v^T)^T (R + u v^T)`. Runs in O(n^2).
///
pub fn qr_update<T: Float>(r: &mut Array2<T>, u: &[T], v: &[T])
{
    let n = u.len();
    debug_assert!(v.len() == n && r.nrows() == n && r.ncols() == n);
    if n == 0
    {
        return;
    }
    let mut w = u.to_vec();
    // last non-zero component of u
    let k = w.iter().rposition(|&x| x != T::zero()).unwrap_or(0);

    // reduce w to a multiple of e_0, turning R into upper Hessenberg form
    for i in (0..k).rev()
    {
        rotate(r, i, i, w[i], -w[i + 1]);
        w[i] = if w[i] == T::zero()
        {
            w[i + 1].abs()
        }
        else if w[i].abs() > w[i + 1].abs()
        {
            w[i].abs() * (T::one() + (w[i + 1] / w[i]).powi(2)).sqrt()
        }
        else
        {
            w[i + 1].abs() * (T::one() + (w[i] / w[i + 1]).powi(2)).sqrt()
        };
    }
    for j in 0..n
    {
        r[[0, j]] = r[[0, j]] + w[0] * v[j];
    }
    // restore triangular form
    for i in 0..k
    {
        let a = r[[i, i]];
        let b = -r[[i + 1, i]];
        rotate(r, i, i, a, b);
        r[[i + 1, i]] = T::zero();
    }
}

#[cfg(test)]
fn gram(r: &Array2<f64>) -> Array2<f64>
{
    r.t().dot(r)
}

#[cfg(test)]
fn random_matrix(rng: &mut rand::rngs::StdRng, n: usize) -> Array2<f64>
{
    use rand::Rng;
    Array2::from_shape_fn((n, n), |_| rng.gen_range(-1.0..1.0))
}

#[test]
fn test_qr_decompose_preserves_gram_matrix()
{
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for n in [1, 2, 5, 9]
    {
        let a = random_matrix(&mut rng, n);
        let mut r = a.clone();
        qr_decompose(&mut r);
        for i in 0..n
        {
            for j in 0..i
            {
                assert_eq!(r[[i, j]], 0.0);
            }
        }
        let expected = gram(&a);
        let actual = gram(&r);
        for (x, y) in expected.iter().zip(actual.iter())
        {
            assert!((x - y).abs() < 1e-12, "{x} != {y}");
        }
    }
}

#[test]
fn test_qr_update_matches_direct_recomputation()
{
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    for n in [1, 3, 6, 10]
    {
        let mut r = random_matrix(&mut rng, n);
        qr_decompose(&mut r);
        let u: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let v: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let mut direct = r.clone();
        for i in 0..n
        {
            for j in 0..n
            {
                direct[[i, j]] += u[i] * v[j];
            }
        }
        let expected = gram(&direct);

        qr_update(&mut r, &u, &v);
        for i in 0..n
        {
            for j in 0..i
            {
                assert_eq!(r[[i, j]], 0.0);
            }
        }
        let actual = gram(&r);
        for (x, y) in expected.iter().zip(actual.iter())
        {
            assert!((x - y).abs() < 1e-10, "{x} != {y}");
        }
    }
}

#[test]
fn test_qr_update_with_trailing_zeros()
{
    let mut r = super::identity::<f64>(4);
    let u = [0.5, 0.0, 0.0, 0.0];
    let v = [1.0, 2.0, 0.0, 0.0];
    qr_update(&mut r, &u, &v);
    // only the first row changes when u is a multiple of e_0
    assert_eq!(r[[0, 0]], 1.5);
    assert_eq!(r[[0, 1]], 1.0);
    assert_eq!(r[[1, 1]], 1.0);
}
