//! Complex, broadcastable response values.
//!
//! Every scattering entry evaluates to a [`Value`]: a dynamically shaped array
//! of complex amplitudes. A zero-dimensional array is a plain scalar, and any
//! array-valued parameter (a wavelength sweep, say) turns into an array-valued
//! response with the same shape.
//!
//! Binary operations follow the usual broadcasting rules: shapes are aligned
//! from the right and each axis must either match or be of length one.

use ndarray::{arr0, ArrayD, Zip};
use num_complex::Complex64;

use crate::{EvalError, EvalResult};

/// A complex scattering amplitude, possibly swept over parameter arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Value(ArrayD<Complex64>);

impl Value {
    /// A zero-dimensional complex value.
    pub fn scalar(value: Complex64) -> Self {
        Self(arr0(value).into_dyn())
    }

    /// A zero-dimensional value with no imaginary part.
    pub fn real(value: f64) -> Self {
        Self::scalar(Complex64::new(value, 0.0))
    }

    /// The scalar `0`.
    pub fn zero() -> Self {
        Self::real(0.0)
    }

    /// The scalar `1`.
    pub fn one() -> Self {
        Self::real(1.0)
    }

    /// Wraps a complex array as is.
    pub fn from_array(array: ArrayD<Complex64>) -> Self {
        Self(array)
    }

    /// Lifts a real parameter array into a complex value of the same shape.
    pub fn from_real(array: &ArrayD<f64>) -> Self {
        Self(array.mapv(|x| Complex64::new(x, 0.0)))
    }

    /// `amplitude * exp(i * phase)`, broadcast over both arrays.
    pub fn polar(amplitude: &ArrayD<f64>, phase: &ArrayD<f64>) -> EvalResult<Self> {
        zip_broadcast(amplitude, phase, |&r, &theta| Complex64::from_polar(r, theta)).map(Self)
    }

    /// Shape of the underlying array; empty for a scalar.
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for a zero-dimensional value.
    pub fn is_scalar(&self) -> bool {
        self.0.ndim() == 0
    }

    /// The single element of a value holding exactly one amplitude.
    pub fn as_scalar(&self) -> Option<Complex64> {
        if self.0.len() == 1 {
            self.0.iter().next().copied()
        } else {
            None
        }
    }

    /// Borrows the underlying array.
    pub fn array(&self) -> &ArrayD<Complex64> {
        &self.0
    }

    /// Unwraps the underlying array.
    pub fn into_array(self) -> ArrayD<Complex64> {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Complex64> {
        self.0.iter()
    }

    /// Applies `f` to every element.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(Complex64) -> Complex64,
    {
        Self(self.0.mapv(f))
    }

    /// Elementwise combination with broadcasting.
    pub fn zip_with<F>(&self, other: &Value, f: F) -> EvalResult<Self>
    where
        F: Fn(Complex64, Complex64) -> Complex64,
    {
        zip_broadcast(&self.0, &other.0, |&a, &b| f(a, b)).map(Self)
    }

    /// Elementwise sum.
    pub fn try_add(&self, other: &Value) -> EvalResult<Self> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise difference.
    pub fn try_sub(&self, other: &Value) -> EvalResult<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Elementwise product.
    pub fn try_mul(&self, other: &Value) -> EvalResult<Self> {
        self.zip_with(other, |a, b| a * b)
    }

    /// Elementwise quotient. Division by zero yields inf/NaN, never an error.
    pub fn try_div(&self, other: &Value) -> EvalResult<Self> {
        self.zip_with(other, |a, b| a / b)
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: Complex64) -> Self {
        self.map(|z| z * factor)
    }

    /// `1 - self`
    pub fn one_minus(&self) -> Self {
        self.map(|z| Complex64::new(1.0, 0.0) - z)
    }

    pub fn recip(&self) -> Self {
        self.map(|z| Complex64::new(1.0, 0.0) / z)
    }

    /// Power `|z|^2` of every element.
    pub fn norm_sqr(&self) -> ArrayD<f64> {
        self.0.mapv(|z| z.norm_sqr())
    }

    /// Expands the value to `shape` following broadcasting rules.
    pub fn broadcast_to(&self, shape: &[usize]) -> EvalResult<Self> {
        self.0
            .broadcast(shape)
            .map(|view| Self(view.to_owned()))
            .ok_or_else(|| EvalError::ShapeMismatch { lhs: self.shape().to_vec(), rhs: shape.to_vec() })
    }
}

impl From<Complex64> for Value {
    fn from(value: Complex64) -> Self {
        Self::scalar(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::real(value)
    }
}

impl From<ArrayD<Complex64>> for Value {
    fn from(array: ArrayD<Complex64>) -> Self {
        Self(array)
    }
}

/// Resulting shape of broadcasting `a` against `b`, or `None` when some axis
/// differs and neither side has length one.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut shape = vec![0; ndim];
    for (axis, out) in shape.iter_mut().enumerate() {
        let da = axis.checked_sub(ndim - a.len()).map_or(1, |i| a[i]);
        let db = axis.checked_sub(ndim - b.len()).map_or(1, |i| b[i]);
        *out = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(shape)
}

/// Applies `f` elementwise after broadcasting both arrays to a common shape.
pub(crate) fn zip_broadcast<A, B, F>(a: &ArrayD<A>, b: &ArrayD<B>, f: F) -> EvalResult<ArrayD<Complex64>>
where
    F: Fn(&A, &B) -> Complex64,
{
    let mismatch = || EvalError::ShapeMismatch { lhs: a.shape().to_vec(), rhs: b.shape().to_vec() };
    let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(mismatch)?;
    let va = a.broadcast(shape.as_slice()).ok_or_else(mismatch)?;
    let vb = b.broadcast(shape.as_slice()).ok_or_else(mismatch)?;
    Ok(Zip::from(&va).and(&vb).map_collect(|x, y| f(x, y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_broadcast_shape_rules() {
        assert_eq!(broadcast_shape(&[], &[3]), Some(vec![3]));
        assert_eq!(broadcast_shape(&[4, 1], &[3]), Some(vec![4, 3]));
        assert_eq!(broadcast_shape(&[2, 3], &[2, 3]), Some(vec![2, 3]));
        assert_eq!(broadcast_shape(&[2], &[3]), None);
    }

    #[test]
    fn test_scalar_times_sweep() {
        let sweep = Value::from_real(&Array1::from(vec![1.0, 2.0, 3.0]).into_dyn());
        let factor = Value::scalar(c(0.0, 1.0));
        let product = factor.try_mul(&sweep).unwrap();

        assert_eq!(product.shape(), &[3]);
        assert_eq!(product.array()[[2]], c(0.0, 3.0));
    }

    #[test]
    fn test_mismatched_shapes_are_reported() {
        let a = Value::from_real(&array![1.0, 2.0].into_dyn());
        let b = Value::from_real(&array![1.0, 2.0, 3.0].into_dyn());

        match a.try_add(&b) {
            Err(EvalError::ShapeMismatch { lhs, rhs }) => {
                assert_eq!(lhs, vec![2]);
                assert_eq!(rhs, vec![3]);
            }
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_division_by_zero_is_not_an_error() {
        let result = Value::one().try_div(&Value::zero()).unwrap();
        let z = result.as_scalar().unwrap();
        assert!(!z.re.is_finite() || !z.im.is_finite());
    }

    #[test]
    fn test_polar_and_power() {
        let amp = array![0.5_f64.sqrt()].into_dyn();
        let phase = arr0(std::f64::consts::FRAC_PI_2).into_dyn();
        let value = Value::polar(&amp, &phase).unwrap();

        assert_eq!(value.shape(), &[1]);
        assert!((value.norm_sqr()[[0]] - 0.5).abs() < 1e-12);
        assert!(value.array()[[0]].re.abs() < 1e-12);
    }

    #[test]
    fn test_broadcast_to() {
        let v = Value::real(2.0).broadcast_to(&[2, 2]).unwrap();
        assert_eq!(v.len(), 4);
        assert!(Value::from_real(&array![1.0, 2.0].into_dyn()).broadcast_to(&[3]).is_err());
    }
}
