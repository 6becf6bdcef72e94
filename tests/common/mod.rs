//! Component models and closed forms shared by the integration tests.

#![allow(dead_code)]

use std::f64::consts::PI;

use ndarray::ArrayD;
use num_complex::Complex64;
use sfold::{circuit, Model, ModelBuilder, ParamRecord, Response, Value};

/// Partially transmitting mirror between ports `in` and `out`.
///
/// `t = t_amp * exp(i t_ang)` and `r = i * sqrt(1 - t_amp^2) * exp(i t_ang)`,
/// the same on both sides.
/// Amplitudes outside `[0, 1]` are reported as a component error.
pub fn half_mirror() -> Model {
    fn amplitude(p: &ParamRecord) -> sfold::EvalResult<&ArrayD<f64>> {
        let t_amp = p.value("t_amp")?;
        if t_amp.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err(sfold::EvalError::Component("t_amp must lie in [0, 1]".to_string()));
        }
        Ok(t_amp)
    }

    fn transmission(p: &ParamRecord) -> sfold::EvalResult<Value> {
        Value::polar(amplitude(p)?, p.value("t_ang")?)
    }

    fn reflection(p: &ParamRecord) -> sfold::EvalResult<Value> {
        let r_amp = amplitude(p)?.mapv(|t| (1.0 - t * t).sqrt());
        Ok(Value::polar(&r_amp, p.value("t_ang")?)?.scale(Complex64::i()))
    }

    ModelBuilder::new(["in", "out"])
        .with_defaults(ParamRecord::new().with("t_amp", 0.5_f64.sqrt()).with("t_ang", 0.0))
        .build(|i, j| Some(if i == j { Response::new(reflection) } else { Response::new(transmission) }))
        .unwrap()
}

/// Free propagation over `di` in a medium of index `ni` at wavelength `wl`.
pub fn gap() -> Model {
    ModelBuilder::new(["in", "out"])
        .with_defaults(ParamRecord::new().with("ni", 1.0).with("di", 500.0).with("wl", 532.0))
        .build(|i, j| {
            (i != j).then(|| {
                Response::new(|p| {
                    let optical = p.value("ni")? * p.value("di")?;
                    let wl = p.value("wl")?;
                    let phase = Value::from_real(&optical).try_div(&Value::from_real(wl))?;
                    Ok(phase.map(|x| Complex64::new(0.0, 2.0 * PI * x.re).exp()))
                })
            })
        })
        .unwrap()
}

/// Lossless directional coupler: `out0 <- in0` is `sqrt(1 - coupling)`,
/// `out1 <- in0` is `i sqrt(coupling)`, and symmetric for `in1`.
pub fn coupler() -> Model {
    ModelBuilder::new(["in0", "in1", "out0", "out1"])
        .with_defaults(ParamRecord::new().with("coupling", 0.5))
        .build(|i, j| match (i, j) {
            (0, 2) | (1, 3) => Some(Response::new(|p| {
                Ok(Value::from_array(p.value("coupling")?.mapv(|c| Complex64::new((1.0 - c).sqrt(), 0.0))))
            })),
            (0, 3) | (1, 2) => Some(Response::new(|p| {
                Ok(Value::from_array(p.value("coupling")?.mapv(|c| Complex64::new(0.0, c.sqrt()))))
            })),
            _ => None,
        })
        .unwrap()
}

/// Straight waveguide: `exp(2 pi i neff length / wl)` attenuated by `loss`
/// (amplitude transmission per unit length).
pub fn waveguide() -> Model {
    ModelBuilder::new(["in", "out"])
        .with_defaults(
            ParamRecord::new().with("neff", 2.4).with("length", 10.0).with("wl", 1.55).with("loss", 1.0),
        )
        .build(|i, j| {
            (i != j).then(|| {
                Response::new(|p| {
                    let length = p.value("length")?;
                    let phase = Value::from_real(&(p.value("neff")? * length)).try_div(&Value::from_real(p.value("wl")?))?;
                    let amplitude = Value::from_real(p.value("loss")?)
                        .zip_with(&Value::from_real(length), |loss, len| Complex64::new(loss.re.powf(len.re), 0.0))?;
                    phase.map(|x| Complex64::new(0.0, 2.0 * PI * x.re).exp()).try_mul(&amplitude)
                })
            })
        })
        .unwrap()
}

/// A component whose every port pair has a distinct constant response of
/// magnitude below `0.35`, so any interconnection stays well conditioned.
pub fn dense_component(ports: &[&str], seed: u32) -> Model {
    let n = ports.len();
    ModelBuilder::new(ports.iter().copied())
        .reciprocal(false)
        .build(|i, j| {
            let k = (seed as usize * 31 + i * n + j) as f64;
            let z = Complex64::from_polar(0.1 + 0.2 * (0.37 * k).sin().abs(), 1.3 * k);
            Some(Response::constant(z))
        })
        .unwrap()
}

/// Mirror, gap, mirror.
pub fn fabry_perot() -> Model {
    circuit(
        [("mirror1", half_mirror()), ("gap", gap()), ("mirror2", half_mirror())],
        [("mirror1,out", "gap,in"), ("gap,out", "mirror2,in")],
        [("mirror1,in", "in"), ("mirror2,out", "out")],
    )
    .unwrap()
}

/// Round-trip phase `2 pi ni di / wl` of the gap.
pub fn gap_phase(ni: f64, di: f64, wl: f64) -> f64 {
    2.0 * PI * ni * di / wl
}

/// Amplitude transmission of a cavity between mirrors with single-pass
/// transmissions `t1`, `t2` and inner reflections `r1`, `r2`.
pub fn airy_transmission(t1: Complex64, t2: Complex64, r1: Complex64, r2: Complex64, phase: f64) -> Complex64 {
    let e = Complex64::new(0.0, phase).exp();
    t1 * t2 * e / (1.0 - r1 * r2 * e * e)
}

/// Amplitude reflection of the same cavity seen from mirror 1.
pub fn airy_reflection(t1: Complex64, r1: Complex64, r2: Complex64, phase: f64) -> Complex64 {
    let e2 = Complex64::new(0.0, 2.0 * phase).exp();
    r1 + t1 * t1 * r2 * e2 / (1.0 - r1 * r2 * e2)
}

/// Textbook Airy power transmission for mirror power reflectivities `r1`,
/// `r2` and a round-trip phase `delta` including reflection phases.
pub fn airy_power(big_r1: f64, big_r2: f64, delta: f64) -> f64 {
    let rr = (big_r1 * big_r2).sqrt();
    (1.0 - big_r1) * (1.0 - big_r2) / (1.0 + rr * rr - 2.0 * rr * delta.cos())
}

/// Half-mirror amplitudes `(t, r)` for the given parameters.
pub fn mirror_amplitudes(t_amp: f64, t_ang: f64) -> (Complex64, Complex64) {
    let t = Complex64::from_polar(t_amp, t_ang);
    let r = Complex64::i() * Complex64::from_polar((1.0 - t_amp * t_amp).sqrt(), t_ang);
    (t, r)
}

pub fn scalar(value: &Value) -> Complex64 {
    value.as_scalar().unwrap()
}

pub fn linspace(start: f64, stop: f64, n: usize) -> ArrayD<f64> {
    ndarray::Array1::linspace(start, stop, n).into_dyn()
}

pub fn assert_close(a: Complex64, b: Complex64, tol: f64) {
    assert!((a - b).norm() <= tol * (1.0 + b.norm()), "{a} != {b} (tol {tol})");
}
