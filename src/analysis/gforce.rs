use log::debug;
use serde::{Deserialize, Serialize};

use crate::telemetry::{Sample, normalize::heading_delta_deg};

use super::centered_moving_average;

/// Standard gravity, m/s²
pub const GRAVITY_MPS2: f64 = 9.80665;

/// Sample spacing below this is a duplicate timestamp
pub(crate) const MIN_DT_MS: f64 = 20.;
/// Sample spacing above this is a logging gap
pub(crate) const MAX_DT_MS: f64 = 2500.;

/// Fewest points a cubic fit is attempted on
const MIN_POLYNOMIAL_POINTS: usize = 5;
const POLYNOMIAL_TERMS: usize = 4;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DerivativeMethod {
    /// Local polynomial when the sequence is at least one polynomial window long,
    /// central difference otherwise
    #[default]
    Auto,
    CentralDifference,
    LocalPolynomial,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GForceConfig {
    /// Shorter spans are duplicate timestamps
    pub min_dt_ms: f64,
    /// Longer spans are logging gaps
    pub max_dt_ms: f64,
    /// Fixes reporting a worse horizontal accuracy get zero g
    pub max_accuracy_m: f64,
    /// Heading is noise below this speed, so lateral g is zero
    pub min_speed_for_lateral_mps: f64,
    /// Heading changes faster than this are GPS jumps, not the car turning
    pub max_heading_rate_deg_s: f64,
    pub max_g: f64,
    /// Centered moving average window, in samples. 1 disables smoothing.
    pub smoothing_window: usize,
    pub method: DerivativeMethod,
    /// Samples used for each local polynomial fit
    pub polynomial_window: usize,
}

impl Default for GForceConfig {
    fn default() -> Self {
        Self {
            min_dt_ms: MIN_DT_MS,
            max_dt_ms: MAX_DT_MS,
            max_accuracy_m: 10.,
            min_speed_for_lateral_mps: 3.,
            max_heading_rate_deg_s: 120.,
            max_g: 3.,
            smoothing_window: 5,
            method: DerivativeMethod::Auto,
            polynomial_window: 15,
        }
    }
}

/// Per-sample acceleration aligned to the sample index space
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DerivedChannels {
    /// Positive when the car turns clockwise (to the right)
    pub lateral_g: Vec<f64>,
    /// Positive when accelerating
    pub longitudinal_g: Vec<f64>,
}

/// Computes lateral and longitudinal acceleration in g for every sample
pub fn compute_g_forces(samples: &[Sample], config: &GForceConfig) -> DerivedChannels {
    let n = samples.len();
    if n < 2 {
        return DerivedChannels {
            lateral_g: vec![0.; n],
            longitudinal_g: vec![0.; n],
        };
    }

    let use_polynomial = match config.method {
        DerivativeMethod::CentralDifference => false,
        DerivativeMethod::LocalPolynomial => true,
        DerivativeMethod::Auto => n >= config.polynomial_window,
    };

    let mut lateral = Vec::with_capacity(n);
    let mut longitudinal = Vec::with_capacity(n);
    for i in 0..n {
        let (lat_g, long_g) = central_difference(samples, i, config);
        let long_g = if use_polynomial && long_g.is_some() {
            polynomial_derivative(samples, i, config)
                .map(|accel| accel / GRAVITY_MPS2)
                .or(long_g)
        } else {
            long_g
        };
        lateral.push(clamp_g(lat_g.unwrap_or(0.), config.max_g));
        longitudinal.push(clamp_g(long_g.unwrap_or(0.), config.max_g));
    }

    let lateral_g = centered_moving_average(&lateral, config.smoothing_window);
    // The cubic fit already smooths; a second pass would only add lag at the edges
    let longitudinal_g = if use_polynomial {
        longitudinal
    } else {
        centered_moving_average(&longitudinal, config.smoothing_window)
    };
    debug!(
        "Derived g channels for {} samples ({})",
        n,
        if use_polynomial {
            "local polynomial"
        } else {
            "central difference"
        }
    );
    DerivedChannels {
        lateral_g,
        longitudinal_g,
    }
}

fn clamp_g(value: f64, max_g: f64) -> f64 {
    value.clamp(-max_g, max_g)
}

/// Central difference around `i`, neighbors clamped at the ends. `None` for each
/// component whose inputs fail the quality gates.
fn central_difference(
    samples: &[Sample],
    i: usize,
    config: &GForceConfig,
) -> (Option<f64>, Option<f64>) {
    let prev = &samples[i.saturating_sub(1)];
    let next = &samples[(i + 1).min(samples.len() - 1)];
    let current = &samples[i];

    let dt_ms = next.time_ms - prev.time_ms;
    if dt_ms < config.min_dt_ms || dt_ms > config.max_dt_ms {
        return (None, None);
    }
    if current
        .accuracy_m()
        .is_some_and(|accuracy| accuracy > config.max_accuracy_m)
    {
        return (None, None);
    }
    let dt_s = dt_ms / 1000.;

    let longitudinal = (next.speed_mps - prev.speed_mps) / dt_s / GRAVITY_MPS2;

    let lateral = match (prev.heading_deg, next.heading_deg) {
        (Some(from), Some(to)) if current.speed_mps > config.min_speed_for_lateral_mps => {
            let rate_deg_s = heading_delta_deg(from, to) / dt_s;
            (rate_deg_s.abs() <= config.max_heading_rate_deg_s)
                .then(|| current.speed_mps * rate_deg_s.to_radians() / GRAVITY_MPS2)
        }
        _ => None,
    };

    (lateral, Some(longitudinal))
}

/// Slope of a least-squares cubic through the speed series around `i`, in m/s².
/// The window stops at logging gaps so a fit never spans one.
fn polynomial_derivative(samples: &[Sample], i: usize, config: &GForceConfig) -> Option<f64> {
    let half = config.polynomial_window / 2;
    let contiguous = |a: &Sample, b: &Sample| {
        let dt = b.time_ms - a.time_ms;
        (0. ..=config.max_dt_ms).contains(&dt)
    };

    let mut start = i;
    while start > 0 && i - start < half && contiguous(&samples[start - 1], &samples[start]) {
        start -= 1;
    }
    let mut end = i;
    while end + 1 < samples.len()
        && end - i < half
        && contiguous(&samples[end], &samples[end + 1])
    {
        end += 1;
    }
    let window = &samples[start..=end];
    if window.len() < MIN_POLYNOMIAL_POINTS {
        return None;
    }

    let origin_ms = samples[i].time_ms;
    let points: Vec<(f64, f64)> = window
        .iter()
        .map(|s| ((s.time_ms - origin_ms) / 1000., s.speed_mps))
        .collect();
    let coefficients = fit_polynomial(&points)?;
    Some(coefficients[1])
}

/// Least-squares cubic coefficients (constant term first) via the normal equations
fn fit_polynomial(points: &[(f64, f64)]) -> Option<[f64; POLYNOMIAL_TERMS]> {
    let mut matrix = [[0.; POLYNOMIAL_TERMS + 1]; POLYNOMIAL_TERMS];
    for &(t, v) in points {
        let mut powers = [1.; 2 * POLYNOMIAL_TERMS - 1];
        for k in 1..powers.len() {
            powers[k] = powers[k - 1] * t;
        }
        for (row, equation) in matrix.iter_mut().enumerate() {
            for col in 0..POLYNOMIAL_TERMS {
                equation[col] += powers[row + col];
            }
            equation[POLYNOMIAL_TERMS] += powers[row] * v;
        }
    }
    solve(matrix)
}

/// Gaussian elimination with partial pivoting on an augmented matrix
fn solve(
    mut matrix: [[f64; POLYNOMIAL_TERMS + 1]; POLYNOMIAL_TERMS],
) -> Option<[f64; POLYNOMIAL_TERMS]> {
    for col in 0..POLYNOMIAL_TERMS {
        let pivot = (col..POLYNOMIAL_TERMS).max_by(|&a, &b| {
            matrix[a][col].abs().total_cmp(&matrix[b][col].abs())
        })?;
        if matrix[pivot][col].abs() < 1e-12 {
            return None;
        }
        matrix.swap(col, pivot);
        for row in col + 1..POLYNOMIAL_TERMS {
            let factor = matrix[row][col] / matrix[col][col];
            for k in col..=POLYNOMIAL_TERMS {
                matrix[row][k] -= factor * matrix[col][k];
            }
        }
    }

    let mut solution = [0.; POLYNOMIAL_TERMS];
    for row in (0..POLYNOMIAL_TERMS).rev() {
        let tail: f64 = (row + 1..POLYNOMIAL_TERMS)
            .map(|k| matrix[row][k] * solution[k])
            .sum();
        solution[row] = (matrix[row][POLYNOMIAL_TERMS] - tail) / matrix[row][row];
    }
    solution.iter().all(|c| c.is_finite()).then_some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ACCURACY_CHANNEL;

    fn sample(time_ms: f64, speed_mps: f64, heading_deg: Option<f64>) -> Sample {
        Sample {
            time_ms,
            lat: 45.,
            lon: 9.,
            speed_mps,
            heading_deg,
            ..Default::default()
        }
    }

    fn config(method: DerivativeMethod) -> GForceConfig {
        GForceConfig {
            method,
            ..Default::default()
        }
    }

    #[test]
    fn test_constant_acceleration_is_one_g() {
        let samples: Vec<Sample> = (0..30)
            .map(|i| {
                let t = i as f64 * 100.;
                sample(t, 5. + GRAVITY_MPS2 * t / 1000., Some(0.))
            })
            .collect();
        for method in [
            DerivativeMethod::CentralDifference,
            DerivativeMethod::LocalPolynomial,
        ] {
            let derived = compute_g_forces(&samples, &config(method));
            for g in &derived.longitudinal_g {
                assert!((g - 1.).abs() < 1e-6, "{:?} gave {}", method, g);
            }
            assert!(derived.lateral_g.iter().all(|g| g.abs() < 1e-9));
        }
    }

    #[test]
    fn test_right_turn_is_positive_lateral_g() {
        // 20 m/s while heading swings 10°/s across north
        let samples: Vec<Sample> = (0..10)
            .map(|i| sample(i as f64 * 100., 20., Some((355. + i as f64).rem_euclid(360.))))
            .collect();
        let derived = compute_g_forces(&samples, &config(DerivativeMethod::CentralDifference));
        let expected = 20. * 10f64.to_radians() / GRAVITY_MPS2;
        for g in &derived.lateral_g {
            assert!((g - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_quality_gates_zero_the_output() {
        let mut slow = config(DerivativeMethod::CentralDifference);
        slow.smoothing_window = 1;
        // crawling: no lateral, even though the heading rotates
        let crawling: Vec<Sample> = (0..5)
            .map(|i| sample(i as f64 * 100., 1., Some(i as f64 * 5.)))
            .collect();
        let derived = compute_g_forces(&crawling, &slow);
        assert!(derived.lateral_g.iter().all(|g| *g == 0.));

        // heading flips 180° in a tenth of a second
        let mut spinning = vec![
            sample(0., 18., Some(0.)),
            sample(100., 20., Some(0.)),
            sample(200., 22., Some(180.)),
        ];
        let derived = compute_g_forces(&spinning, &slow);
        assert_eq!(derived.lateral_g[1], 0.);
        assert!(derived.longitudinal_g[1] > 2.);

        // poor fix
        spinning[1].heading_deg = Some(90.);
        spinning[1]
            .channels
            .insert(ACCURACY_CHANNEL.to_string(), 25.);
        let derived = compute_g_forces(&spinning, &slow);
        assert_eq!(derived.longitudinal_g[1], 0.);
    }

    #[test]
    fn test_logging_gap_yields_zero() {
        let mut gapped = config(DerivativeMethod::CentralDifference);
        gapped.smoothing_window = 1;
        let samples = vec![
            sample(0., 10., None),
            sample(100., 11., None),
            sample(5000., 30., None),
            sample(5100., 31., None),
        ];
        let derived = compute_g_forces(&samples, &gapped);
        assert!(derived.longitudinal_g[0] > 0.);
        assert_eq!(derived.longitudinal_g[1], 0.);
        assert_eq!(derived.longitudinal_g[2], 0.);
    }

    #[test]
    fn test_values_are_clamped() {
        let mut unsmoothed = config(DerivativeMethod::CentralDifference);
        unsmoothed.smoothing_window = 1;
        let samples = vec![sample(0., 0., None), sample(100., 40., None)];
        let derived = compute_g_forces(&samples, &unsmoothed);
        assert_eq!(derived.longitudinal_g, vec![3., 3.]);
    }

    #[test]
    fn test_short_sequences_fall_back_to_central_difference() {
        let samples: Vec<Sample> = (0..4)
            .map(|i| sample(i as f64 * 100., i as f64, None))
            .collect();
        let auto = compute_g_forces(&samples, &GForceConfig::default());
        let central = compute_g_forces(&samples, &config(DerivativeMethod::CentralDifference));
        assert_eq!(auto, central);
        assert_eq!(compute_g_forces(&samples[..1], &GForceConfig::default()).lateral_g, vec![0.]);
    }

    #[test]
    fn test_fit_polynomial_recovers_cubic() {
        let points: Vec<(f64, f64)> = (-5..=5)
            .map(|i| {
                let t = i as f64 * 0.1;
                (t, 1. + 2. * t - 3. * t * t + 0.5 * t * t * t)
            })
            .collect();
        let coefficients = fit_polynomial(&points).unwrap();
        for (got, want) in coefficients.iter().zip([1., 2., -3., 0.5]) {
            assert!((got - want).abs() < 1e-6);
        }
    }
}
