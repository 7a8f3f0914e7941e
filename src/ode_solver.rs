// ODE Solver - Adaptive Dormand-Prince 5(4) integration over an output grid
// Lands exactly on every requested time and reports derivative failures as DomainError

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// =============================================================================
// SYSTEM + SETTINGS
// =============================================================================

/// A first-order system dy/dt = f(t, y).
///
/// `rhs` may fail (e.g. a gravitational singularity); the solver aborts on the
/// first failure instead of stepping through it.
pub trait OdeSystem {
    /// Length of the state vector
    fn dimension(&self) -> usize;

    /// Write f(t, y) into `dydt`
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DomainError>;
}

/// Mixed error control: component i may err by `atol + rtol * |y_i|`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerances {
    /// LSODA-style defaults (sqrt of machine epsilon)
    pub const DEFAULT_TOL: f64 = 1.49012e-8;

    pub fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    fn scale(&self, a: f64, b: f64) -> f64 {
        self.atol + self.rtol * a.abs().max(b.abs())
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOL, Self::DEFAULT_TOL)
    }
}

/// Work counters for one integration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub fn_evals: usize,
}

// =============================================================================
// DORMAND-PRINCE TABLEAU
// =============================================================================

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th-order weights (also the 7th stage row, so k7 = f(t + h, y_new))
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between 5th and embedded 4th-order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;

// =============================================================================
// SOLVER
// =============================================================================

/// Embedded Runge-Kutta 5(4) with first-same-as-last stages.
///
/// The step size is chosen freely inside each output interval and carried
/// across intervals; steps are shortened so every grid time is hit exactly.
pub struct DormandPrince {
    tol: Tolerances,
    max_steps: usize,
    pub stats: SolverStats,
}

struct Step {
    y_new: Vec<f64>,
    k7: Vec<f64>,
    err: f64,
}

impl DormandPrince {
    pub fn new(tol: Tolerances, max_steps: usize) -> Self {
        Self {
            tol,
            max_steps,
            stats: SolverStats::default(),
        }
    }

    /// Integrate `sys` from `y0` at `times[0]` and return the state at every
    /// entry of `times`. Entry 0 is a copy of `y0`.
    ///
    /// `times` must be strictly increasing.
    pub fn integrate_grid<S>(
        &mut self,
        sys: &S,
        y0: &[f64],
        times: &[f64],
    ) -> Result<Vec<Vec<f64>>, DomainError>
    where
        S: OdeSystem + ?Sized,
    {
        let n = y0.len();
        debug_assert_eq!(n, sys.dimension());

        let mut out = Vec::with_capacity(times.len());
        let Some(&t0) = times.first() else {
            return Ok(out);
        };
        out.push(y0.to_vec());

        let mut t = t0;
        let mut y = y0.to_vec();
        let mut k1 = vec![0.0; n];
        self.eval(sys, t, &y, &mut k1)?;

        if times.len() < 2 {
            return Ok(out);
        }

        let span = times[times.len() - 1] - t0;
        let mut h = self.initial_step(sys, t, &y, &k1, span)?;

        for &t_next in &times[1..] {
            let t_start = t;
            let mut steps = 0usize;

            while t < t_next {
                if steps >= self.max_steps {
                    return Err(DomainError::StepLimitExceeded {
                        from: t_start,
                        to: t_next,
                        max_steps: self.max_steps,
                    });
                }
                steps += 1;

                let remaining = t_next - t;
                let landing = h >= remaining;
                let h_try = if landing { remaining } else { h };

                let min_step = 10.0 * f64::EPSILON * t.abs().max(t_next.abs());
                if h_try <= min_step {
                    return Err(DomainError::StepSizeUnderflow { t, h: h_try });
                }

                let Some(step) = self.attempt(sys, t, &y, &k1, h_try)? else {
                    // Stage state overflowed; shrink hard and retry
                    self.stats.rejected_steps += 1;
                    h = h_try * MIN_FACTOR;
                    continue;
                };

                if step.err <= 1.0 {
                    self.stats.accepted_steps += 1;
                    t = if landing { t_next } else { t + h_try };
                    y = step.y_new;
                    k1 = step.k7;

                    let factor = if step.err == 0.0 {
                        MAX_FACTOR
                    } else {
                        (SAFETY * step.err.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
                    };
                    // A step cut short to land on the grid says nothing about the untried h
                    h = if landing && h_try < h {
                        h.max(h_try * factor)
                    } else {
                        h_try * factor
                    };
                } else {
                    self.stats.rejected_steps += 1;
                    let factor = (SAFETY * step.err.powf(-0.2)).clamp(MIN_FACTOR, 1.0);
                    h = h_try * factor;
                }
            }

            out.push(y.clone());
        }

        Ok(out)
    }

    fn eval<S>(&mut self, sys: &S, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DomainError>
    where
        S: OdeSystem + ?Sized,
    {
        self.stats.fn_evals += 1;
        sys.rhs(t, y, dydt)
    }

    /// One trial step of size `h`. `None` means an intermediate or final
    /// state was not finite and the step has to be retried smaller.
    fn attempt<S>(
        &mut self,
        sys: &S,
        t: f64,
        y: &[f64],
        k1: &[f64],
        h: f64,
    ) -> Result<Option<Step>, DomainError>
    where
        S: OdeSystem + ?Sized,
    {
        let n = y.len();
        let mut tmp = vec![0.0; n];
        let mut k2 = vec![0.0; n];
        let mut k3 = vec![0.0; n];
        let mut k4 = vec![0.0; n];
        let mut k5 = vec![0.0; n];
        let mut k6 = vec![0.0; n];
        let mut k7 = vec![0.0; n];

        for i in 0..n {
            tmp[i] = y[i] + h * A21 * k1[i];
        }
        if !all_finite(&tmp) {
            return Ok(None);
        }
        self.eval(sys, t + C2 * h, &tmp, &mut k2)?;

        for i in 0..n {
            tmp[i] = y[i] + h * (A31 * k1[i] + A32 * k2[i]);
        }
        if !all_finite(&tmp) {
            return Ok(None);
        }
        self.eval(sys, t + C3 * h, &tmp, &mut k3)?;

        for i in 0..n {
            tmp[i] = y[i] + h * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        if !all_finite(&tmp) {
            return Ok(None);
        }
        self.eval(sys, t + C4 * h, &tmp, &mut k4)?;

        for i in 0..n {
            tmp[i] = y[i] + h * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        if !all_finite(&tmp) {
            return Ok(None);
        }
        self.eval(sys, t + C5 * h, &tmp, &mut k5)?;

        for i in 0..n {
            tmp[i] = y[i]
                + h * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        if !all_finite(&tmp) {
            return Ok(None);
        }
        self.eval(sys, t + h, &tmp, &mut k6)?;

        let mut y_new = vec![0.0; n];
        for i in 0..n {
            y_new[i] = y[i] + h * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
        }
        if !all_finite(&y_new) {
            return Ok(None);
        }
        self.eval(sys, t + h, &y_new, &mut k7)?;

        let mut sum = 0.0;
        for i in 0..n {
            let e = h
                * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
            let sc = self.tol.scale(y[i], y_new[i]);
            sum += (e / sc).powi(2);
        }
        let err = (sum / n as f64).sqrt();
        if !err.is_finite() {
            return Ok(None);
        }

        Ok(Some(Step { y_new, k7, err }))
    }

    /// Starting step from the magnitudes of y, f(y) and a probe of f'
    fn initial_step<S>(
        &mut self,
        sys: &S,
        t: f64,
        y: &[f64],
        f0: &[f64],
        span: f64,
    ) -> Result<f64, DomainError>
    where
        S: OdeSystem + ?Sized,
    {
        let n = y.len();
        let scale: Vec<f64> = y.iter().map(|&yi| self.tol.scale(yi, yi)).collect();

        let d0 = rms(y.iter().zip(&scale).map(|(a, s)| a / s));
        let d1 = rms(f0.iter().zip(&scale).map(|(a, s)| a / s));

        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        }
        .min(span);

        let y1: Vec<f64> = y.iter().zip(f0).map(|(yi, fi)| yi + h0 * fi).collect();
        let mut f1 = vec![0.0; n];
        self.eval(sys, t + h0, &y1, &mut f1)?;

        let d2 = rms(
            f1.iter()
                .zip(f0)
                .zip(&scale)
                .map(|((a, b), s)| (a - b) / s),
        ) / h0;

        let h1 = if d1.max(d2) <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(0.2)
        };

        Ok((100.0 * h0).min(h1).min(span))
    }
}

fn rms(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v * v, c + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

// =============================================================================
// TESTS
// =============================================================================
