//! Dense kernels used by the tabulation points and the binary tree.
//!
//! Matrices are `ndarray::Array2` in row-major order. The kernels are generic
//! over `num_traits::Float` but the rest of the crate only instantiates them
//! with `f64`.
pub mod gauss_jordan;
pub mod qr;
pub mod svd;

use ndarray::{Array2, ArrayView2};
use num_traits::Float;

///
/// Computes `sqrt(a^2 + b^2)` without destructive underflow or overflow.
///
#[inline]
pub fn pythag<T: Float>(a: T, b: T) -> T
{
    let absa = a.abs();
    let absb = b.abs();
    if absa > absb
    {
        absa * (T::one() + (absb / absa).powi(2)).sqrt()
    }
    else if absb == T::zero()
    {
        T::zero()
    }
    else
    {
        absb * (T::one() + (absa / absb).powi(2)).sqrt()
    }
}

/// Magnitude of `a` with the sign of `b` (zero counts as positive).
#[inline]
pub fn sign<T: Float>(a: T, b: T) -> T
{
    if b >= T::zero() { a.abs() } else { -a.abs() }
}

///
/// `out = R x` where only the upper triangle of `r` is read.
///
pub fn upper_triangular_mul<T: Float>(r: ArrayView2<T>, x: &[T], out: &mut [T])
{
    let n = x.len();
    debug_assert!(r.nrows() >= n && r.ncols() >= n && out.len() >= n);
    for i in 0..n
    {
        let mut sum = T::zero();
        for j in i..n
        {
            sum = sum + r[[i, j]] * x[j];
        }
        out[i] = sum;
    }
}

///
/// `out = R^T x` where only the upper triangle of `r` is read.
///
pub fn upper_triangular_transpose_mul<T: Float>(r: ArrayView2<T>, x: &[T], out: &mut [T])
{
    let n = x.len();
    debug_assert!(r.nrows() >= n && r.ncols() >= n && out.len() >= n);
    for j in 0..n
    {
        let mut sum = T::zero();
        for i in 0..=j
        {
            sum = sum + r[[i, j]] * x[i];
        }
        out[j] = sum;
    }
}

/// Square identity matrix.
pub fn identity<T: Float>(n: usize) -> Array2<T>
{
    let mut m = Array2::from_elem((n, n), T::zero());
    for i in 0..n
    {
        m[[i, i]] = T::one();
    }
    m
}

#[test]
fn test_pythag_no_overflow()
{
    let big = 1e200_f64;
    let r = pythag(big, big);
    assert!((r / big - 2.0_f64.sqrt()).abs() < 1e-14);
    assert_eq!(pythag(0.0_f64, 0.0), 0.0);
    assert!((pythag(3.0_f64, -4.0) - 5.0).abs() < 1e-15);
}

#[test]
fn test_triangular_products()
{
    use ndarray::array;
    let r = array![[2.0, 1.0, -1.0], [7.0, 3.0, 0.5], [9.0, 9.0, 4.0]];
    let x = [1.0, 2.0, 3.0];
    let mut y = [0.0; 3];
    upper_triangular_mul(r.view(), &x, &mut y);
    // the lower triangle is ignored
    assert_eq!(y, [2.0 + 2.0 - 3.0, 6.0 + 1.5, 12.0]);
    upper_triangular_transpose_mul(r.view(), &x, &mut y);
    assert_eq!(y, [2.0, 1.0 + 6.0, -1.0 + 1.0 + 12.0]);
}
