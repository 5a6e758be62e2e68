use ndarray::Array2;
use num_traits::Float;

use crate::errors::TabulationError;

///
/// In-place inversion of a square matrix by Gauss-Jordan elimination with
/// full pivoting. Returns [`TabulationError::SingularMatrix`] if a zero pivot
/// is met; `a` is left in an unspecified state in that case.
///
pub fn invert<T: Float>(a: &mut Array2<T>) -> Result<(), TabulationError>
{
    let n = a.nrows();
    if n != a.ncols()
    {
        return Err(TabulationError::DimensionMismatch { expected: n, got: a.ncols() });
    }
    let mut indxc = vec![0usize; n];
    let mut indxr = vec![0usize; n];
    let mut ipiv = vec![false; n];

    for i in 0..n
    {
        let mut big = T::zero();
        let mut irow = 0;
        let mut icol = 0;
        for j in 0..n
        {
            if ipiv[j]
            {
                continue;
            }
            for k in 0..n
            {
                if !ipiv[k] && a[[j, k]].abs() >= big
                {
                    big = a[[j, k]].abs();
                    irow = j;
                    icol = k;
                }
            }
        }
        ipiv[icol] = true;
        if irow != icol
        {
            for l in 0..n
            {
                a.swap([irow, l], [icol, l]);
            }
        }
        indxr[i] = irow;
        indxc[i] = icol;
        if a[[icol, icol]] == T::zero()
        {
            return Err(TabulationError::SingularMatrix);
        }
        let pivinv = T::one() / a[[icol, icol]];
        a[[icol, icol]] = T::one();
        for l in 0..n
        {
            a[[icol, l]] = a[[icol, l]] * pivinv;
        }
        for ll in 0..n
        {
            if ll == icol
            {
                continue;
            }
            let dum = a[[ll, icol]];
            a[[ll, icol]] = T::zero();
            for l in 0..n
            {
                a[[ll, l]] = a[[ll, l]] - a[[icol, l]] * dum;
            }
        }
    }
    // unscramble the column interchanges
    for l in (0..n).rev()
    {
        if indxr[l] != indxc[l]
        {
            for k in 0..n
            {
                a.swap([k, indxr[l]], [k, indxc[l]]);
            }
        }
    }
    Ok(())
}

#[test]
fn test_invert()
{
    use ndarray::array;
    let a = array![[0.0, 2.0, 1.0], [1.0, 1.0, 0.0], [3.0, 0.0, 4.0]];
    let mut inv = a.clone();
    invert(&mut inv).unwrap();
    let product = a.dot(&inv);
    for i in 0..3
    {
        for j in 0..3
        {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((product[[i, j]] - expected).abs() < 1e-14);
        }
    }
}

#[test]
fn test_invert_singular()
{
    use ndarray::array;
    let mut a = array![[1.0, 2.0], [2.0, 4.0]];
    assert_eq!(invert(&mut a), Err(TabulationError::SingularMatrix));
}
