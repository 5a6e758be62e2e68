use ndarray::Array2;

use crate::errors::TabulationError;
use crate::linalg::gauss_jordan::invert;
use crate::options::NUM_STATE_VARIABLES;

///
/// Sensitivity of an implicit Euler step `phi_1 = phi_0 + dt f(phi_1)`:
/// `A = (I - dt J)^-1`, with `J` the Jacobian of `f` in the (possibly
/// reduced) frame of active species followed by temperature and pressure.
///
/// The temperature and pressure rows of `I - dt J` are replaced by identity
/// rows, so those rows of `A` are the identity as well. Disabled species are
/// not part of `J`; the entry treats them with an identity sensitivity.
///
pub fn implicit_euler_sensitivity(jacobian: &Array2<f64>, dt: f64) -> Result<Array2<f64>, TabulationError>
{
    let n = jacobian.nrows();
    if jacobian.ncols() != n
    {
        return Err(TabulationError::DimensionMismatch { expected: n, got: jacobian.ncols() });
    }
    if n < NUM_STATE_VARIABLES
    {
        return Err(TabulationError::TooFewDimensions(NUM_STATE_VARIABLES));
    }
    let mut a = Array2::from_shape_fn((n, n), |(i, j)|
    {
        let delta = if i == j { 1.0 } else { 0.0 };
        if i >= n - NUM_STATE_VARIABLES { delta } else { delta - dt * jacobian[[i, j]] }
    });
    invert(&mut a)?;
    Ok(a)
}

#[test]
fn test_diagonal_jacobian()
{
    use ndarray::array;
    let jacobian = array![[-2.0, 0.0, 0.0, 0.0], [0.0, -10.0, 0.0, 0.0], [5.0, 1.0, 3.0, 0.0], [0.0, 0.0, 7.0, 1.0]];
    let a = implicit_euler_sensitivity(&jacobian, 0.1).unwrap();
    assert!((a[[0, 0]] - 1.0 / 1.2).abs() < 1e-14);
    assert!((a[[1, 1]] - 0.5).abs() < 1e-14);
    assert!(a[[0, 1]].abs() < 1e-14);
    for i in 2..4
    {
        for j in 0..4
        {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((a[[i, j]] - expected).abs() < 1e-14);
        }
    }
}

#[test]
fn test_coupled_jacobian_inverse()
{
    use ndarray::array;
    let jacobian = array![[-1.0, 2.0, 0.5, 0.0], [3.0, -4.0, 0.0, 0.1], [0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]];
    let dt = 0.05;
    let a = implicit_euler_sensitivity(&jacobian, dt).unwrap();
    let m = Array2::from_shape_fn((4, 4), |(i, j)| (if i == j { 1.0 } else { 0.0 }) - if i < 2 { dt * jacobian[[i, j]] } else { 0.0 });
    let product = m.dot(&a);
    for i in 0..4
    {
        for j in 0..4
        {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((product[[i, j]] - expected).abs() < 1e-13);
        }
    }
    assert!(implicit_euler_sensitivity(&Array2::zeros((3, 2)), dt).is_err());
}
