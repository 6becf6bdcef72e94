//! Fabry-Perot cavity built from two half mirrors and a gap, checked against
//! the closed-form Airy expressions.

mod common;

use std::f64::consts::PI;

use common::*;
use num_complex::Complex64;
use sfold::sensitivity::{derivative, DEFAULT_STEP};
use sfold::ParamRecord;

#[test_log::test]
fn test_single_point_matches_airy() {
    let fp = fabry_perot();
    let params = fp.defaults().broadcast_set("ni", 1.0).broadcast_set("di", 2000.0).broadcast_set("wl", 532.0);

    let (t, r) = mirror_amplitudes(0.5_f64.sqrt(), 0.0);
    let phase = gap_phase(1.0, 2000.0, 532.0);

    let s21 = scalar(&fp.evaluate("out", "in", &params).unwrap());
    let s11 = scalar(&fp.evaluate("in", "in", &params).unwrap());
    assert_close(s21, airy_transmission(t, t, r, r, phase), 1e-10);
    assert_close(s11, airy_reflection(t, r, r, phase), 1e-10);

    // reflection phases of i each shift the round trip by pi
    let expected = airy_power(0.5, 0.5, 2.0 * phase + PI);
    assert!((s21.norm_sqr() - expected).abs() < 1e-10, "{} vs {expected}", s21.norm_sqr());
}

#[test]
fn test_wavelength_sweep() {
    let fp = fabry_perot();
    let wavelengths = linspace(500.0, 600.0, 101);
    let params = fp.defaults().broadcast_set("di", 2000.0).broadcast_set("wl", wavelengths.clone());

    let s21 = fp.evaluate("out", "in", &params).unwrap();
    let s11 = fp.evaluate("in", "in", &params).unwrap();
    assert_eq!(s21.shape(), &[101]);
    assert_eq!(s11.shape(), &[101]);

    for ((wl, t21), r11) in wavelengths.iter().zip(s21.iter()).zip(s11.iter()) {
        let delta = 2.0 * gap_phase(1.0, 2000.0, *wl) + PI;
        let expected = airy_power(0.5, 0.5, delta);
        let transmitted = t21.norm_sqr();
        assert!((transmitted - expected).abs() <= 1e-3 * expected, "at {wl}: {transmitted} vs {expected}");
        // lossless cavity
        assert!((transmitted + r11.norm_sqr() - 1.0).abs() < 1e-9, "at {wl}");
    }
}

#[test]
fn test_asymmetric_mirrors() {
    let fp = fabry_perot();
    let mut params = fp.duplicate_defaults();
    params.set_path(&["mirror1", "t_amp"], 0.9).unwrap();
    params.set_path(&["mirror2", "t_amp"], 0.3).unwrap();
    params.set_path(&["mirror2", "t_ang"], 0.4).unwrap();
    params.set_path(&["gap", "di"], 1234.0).unwrap();

    let (t1, r1) = mirror_amplitudes(0.9, 0.0);
    let (t2, r2) = mirror_amplitudes(0.3, 0.4);
    let phase = gap_phase(1.0, 1234.0, 532.0);

    let s21 = scalar(&fp.evaluate("out", "in", &params).unwrap());
    let s12 = scalar(&fp.evaluate("in", "out", &params).unwrap());
    let s11 = scalar(&fp.evaluate("in", "in", &params).unwrap());
    assert_close(s21, airy_transmission(t1, t2, r1, r2, phase), 1e-10);
    assert_close(s12, s21, 1e-10);
    assert_close(s11, airy_reflection(t1, r1, r2, phase), 1e-10);
}

#[test]
fn test_scattering_matrix_is_lossless_and_reciprocal() {
    let fp = fabry_perot();
    let params = fp.defaults().broadcast_set("wl", linspace(520.0, 540.0, 7));
    let s = fp.s_matrix(&params).unwrap();

    assert_eq!(s.ports(), &["in".to_string(), "out".to_string()]);
    assert_eq!(s.shape(), &[7]);
    assert!(s.is_reciprocal(1e-10));
    assert!(s.is_passive(1e-10));
    assert!(s.is_lossless(1e-10));

    let total = s.power_out("in").unwrap();
    assert!(total.iter().all(|p| (p - 1.0).abs() < 1e-10));
}

#[test]
fn test_gap_length_sensitivity() {
    let fp = fabry_perot();
    let (ni, di, wl) = (1.0, 2000.0, 532.0);
    let params = fp.defaults().broadcast_set("di", di);

    let got = derivative(&fp, "out", "in", &params, &["gap", "di"], DEFAULT_STEP).unwrap();
    let got = scalar(&got);

    let (t, r) = mirror_amplitudes(0.5_f64.sqrt(), 0.0);
    let e = Complex64::new(0.0, gap_phase(ni, di, wl)).exp();
    let loop_term = r * r * e * e;
    let d_phase = Complex64::i() * t * t * e * (1.0 + loop_term) / ((1.0 - loop_term) * (1.0 - loop_term));
    let expected = d_phase * (2.0 * PI * ni / wl);
    assert_close(got, expected, 1e-5);
}

#[test]
fn test_overrides_only_touch_one_instance() {
    let fp = fabry_perot();
    let base = fp.duplicate_defaults();
    let mut tweaked = base.duplicate();
    tweaked.set_path(&["mirror2", "t_amp"], 1.0).unwrap();

    // a fully transparent second mirror removes the cavity
    let s21 = scalar(&fp.evaluate("out", "in", &tweaked).unwrap());
    let (t, _) = mirror_amplitudes(0.5_f64.sqrt(), 0.0);
    let e = Complex64::new(0.0, gap_phase(1.0, 500.0, 532.0)).exp();
    assert_close(s21, t * e, 1e-12);

    // the untouched record still sees the cavity
    let original = scalar(&fp.evaluate("out", "in", &base).unwrap());
    assert!((original - s21).norm() > 1e-3);
    let kept = base.lookup(&["mirror2", "t_amp"]).unwrap().as_value().unwrap();
    assert_eq!(kept.iter().next().copied(), Some(0.5_f64.sqrt()));
}

#[test]
fn test_partial_params_are_reported() {
    let fp = fabry_perot();
    let params = ParamRecord::new().with("mirror1", ParamRecord::new().with("t_amp", 0.5));
    let err = fp.evaluate("out", "in", &params).unwrap_err();
    assert!(matches!(err, sfold::EvalError::Scoped { .. }), "{err}");
}

#[test]
fn test_component_errors_name_the_instance() {
    let fp = fabry_perot();
    let mut params = fp.duplicate_defaults();
    params.set_path(&["mirror2", "t_amp"], vec![0.5, 1.5]).unwrap();

    match fp.evaluate("out", "in", &params).unwrap_err() {
        sfold::EvalError::Scoped { instance, source } => {
            assert_eq!(instance, "mirror2");
            assert!(matches!(*source, sfold::EvalError::Component(_)), "{source}");
        }
        other => panic!("unexpected error {other}"),
    }
}
