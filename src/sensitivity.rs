//! Finite-difference sensitivities of model responses.
//!
//! Composite models are pure functions of their parameter record, so a
//! derivative only needs two extra evaluations per parameter. The step for
//! each element is scaled by its magnitude, `h = step * (1 + |x|)`.
//!
//! Array leaves are perturbed elementwise all at once. For responses that act
//! elementwise on their parameters (the usual case for swept quantities) this
//! yields the derivative at every sweep point in one pair of evaluations.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use crate::model::{Model, PortKey};
use crate::params::{ParamNode, ParamRecord};
use crate::value::Value;
use crate::{EvalError, EvalResult};

/// Relative step used when callers have no better choice.
pub const DEFAULT_STEP: f64 = 1e-6;

/// Central-difference derivative of the `input -> output` response with
/// respect to the leaf at `path`.
pub fn derivative<P, Q>(
    model: &Model<P>,
    output: &Q,
    input: &Q,
    params: &ParamRecord,
    path: &[&str],
    step: f64,
) -> EvalResult<Value>
where
    P: PortKey + Borrow<Q>,
    Q: Hash + Eq + fmt::Display + ?Sized,
{
    let x = match params.lookup(path)? {
        ParamNode::Value(array) => array.clone(),
        ParamNode::Record(_) => return Err(EvalError::NotAValue { name: path.join(".") }),
    };
    let h = x.mapv(|v| step * (1.0 + v.abs()));

    let mut shifted = params.duplicate();
    shifted.set_path(path, &x + &h)?;
    let forward = model.evaluate(output, input, &shifted)?;
    shifted.set_path(path, &x - &h)?;
    let backward = model.evaluate(output, input, &shifted)?;

    forward.try_sub(&backward)?.try_div(&Value::from_real(&(&h * 2.0)))
}

/// One [`derivative`] per path, in path order.
pub fn gradient<P, Q>(
    model: &Model<P>,
    output: &Q,
    input: &Q,
    params: &ParamRecord,
    paths: &[&[&str]],
    step: f64,
) -> EvalResult<Vec<Value>>
where
    P: PortKey + Borrow<Q>,
    Q: Hash + Eq + fmt::Display + ?Sized,
{
    paths.iter().map(|path| derivative(model, output, input, params, path, step)).collect()
}
