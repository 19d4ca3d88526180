use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::IntegratorError;
use crate::results::ResultSet;

/// Tolerances of the step-halving integrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Sub-steps at or below this length are accepted without an error check
    pub min_dt: f64,
    /// Largest accepted disagreement between one full step and two half steps
    pub error_threshold: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig {
            min_dt: 1e-5,
            error_threshold: 1e-5,
        }
    }
}

impl IntegratorConfig {
    pub fn validate(&self) -> Result<(), IntegratorError> {
        if !(self.min_dt.is_finite() && self.min_dt > 0.0) {
            return Err(IntegratorError::InvalidMinDt(self.min_dt));
        }
        if !(self.error_threshold.is_finite() && self.error_threshold > 0.0) {
            return Err(IntegratorError::InvalidErrorThreshold(self.error_threshold));
        }
        Ok(())
    }
}

/// A system that can be advanced by an arbitrary step length.
pub trait TimeStepModel {
    type State: Clone;

    /// Advance `state` by `dt`, returning the new state
    fn step(&self, state: &Self::State, dt: f64) -> Self::State;

    /// Disagreement between two candidate states for the same instant
    fn distance(&self, a: &Self::State, b: &Self::State) -> f64;
}

/// Error-controlled step-halving integrator.
///
/// Each candidate sub-step is taken once at full length and once as two half
/// steps; the half-step result is kept when the two agree, otherwise the
/// sub-step is halved. After an accepted sub-step the next proposal doubles.
#[derive(Debug, Clone)]
pub struct AdaptiveIntegrator {
    config: IntegratorConfig,
}

impl AdaptiveIntegrator {
    pub fn new(config: IntegratorConfig) -> Result<Self, IntegratorError> {
        config.validate()?;
        Ok(AdaptiveIntegrator { config })
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Advance `initial` by `total_time`, recording every accepted sub-step.
    /// A non-positive `total_time` yields an empty set.
    pub fn integrate<M: TimeStepModel>(&self, model: &M, initial: &M::State, total_time: f64) -> ResultSet<M::State> {
        let mut results = ResultSet::new();
        if !(total_time > 0.0) {
            return results;
        }
        debug_assert!(total_time.is_finite(), "cannot integrate over {}s", total_time);

        // leftovers this small are float noise from repeated subtraction
        let negligible = total_time * 1e-12;

        let mut state = initial.clone();
        let mut remaining = total_time;
        let mut dt = total_time;

        while remaining > 0.0 {
            let (accepted_dt, next) = self.accept_step(model, &state, dt.min(remaining));
            results.push(accepted_dt, next.clone());
            state = next;

            remaining -= accepted_dt;
            if remaining <= negligible {
                remaining = 0.0;
            }
            dt = (accepted_dt * 2.0).min(remaining);
        }

        trace!("integrated {:.3e}s in {} sub-steps", total_time, results.len());
        results
    }

    /// Find the longest sub-step, at most `dt`, that meets the error threshold
    fn accept_step<M: TimeStepModel>(&self, model: &M, state: &M::State, dt: f64) -> (f64, M::State) {
        let mut dt = dt;
        let mut coarse: Option<M::State> = None;

        loop {
            if dt <= self.config.min_dt {
                let accepted = coarse.unwrap_or_else(|| model.step(state, dt));
                return (dt, accepted);
            }

            let full = coarse.take().unwrap_or_else(|| model.step(state, dt));
            let half = model.step(state, dt / 2.0);
            let fine = model.step(&half, dt / 2.0);

            let error = model.distance(&full, &fine);
            if error < self.config.error_threshold {
                return (dt, fine);
            }

            trace!("rejected dt={:.3e} (error {:.3e})", dt, error);
            dt /= 2.0;
            // the first half step is the full step of the next attempt
            coarse = Some(half);
        }
    }
}

impl Default for AdaptiveIntegrator {
    fn default() -> Self {
        AdaptiveIntegrator {
            config: IntegratorConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;

    /// Counts calls and reports a fixed disagreement
    struct FixedError {
        error: f64,
        calls: Cell<usize>,
    }

    impl FixedError {
        fn new(error: f64) -> Self {
            FixedError { error, calls: Cell::new(0) }
        }
    }

    impl TimeStepModel for FixedError {
        type State = f64;

        fn step(&self, state: &f64, dt: f64) -> f64 {
            self.calls.set(self.calls.get() + 1);
            state + dt
        }

        fn distance(&self, _a: &f64, _b: &f64) -> f64 {
            self.error
        }
    }

    /// dy/dt = -k y with explicit Euler, so halving genuinely reduces the error
    struct ExponentialDecay {
        rate: f64,
    }

    impl TimeStepModel for ExponentialDecay {
        type State = f64;

        fn step(&self, state: &f64, dt: f64) -> f64 {
            state - self.rate * state * dt
        }

        fn distance(&self, a: &f64, b: &f64) -> f64 {
            (a - b).abs()
        }
    }

    #[test]
    fn test_low_error_accepts_full_step() {
        let integrator = AdaptiveIntegrator::default();
        let model = FixedError::new(0.0);

        let results = integrator.integrate(&model, &0.0, 0.25);

        assert_eq!(results.len(), 1);
        assert_eq!(results.steps()[0].dt, 0.25);
        assert_eq!(model.calls.get(), 3);
    }

    #[test]
    fn test_high_error_subdivides_to_min_dt() {
        let config = IntegratorConfig {
            min_dt: 1e-5,
            error_threshold: 1e-5,
        };
        let integrator = AdaptiveIntegrator::new(config).unwrap();
        let model = FixedError::new(f64::INFINITY);
        let total = 1e-3;

        let results = integrator.integrate(&model, &0.0, total);

        assert!(results.steps().iter().all(|s| s.dt <= config.min_dt));
        assert!(results.len() as f64 <= 2.0 * total / config.min_dt + 1.0);
        assert_relative_eq!(results.total_duration(), total, epsilon = 1e-12);
    }

    #[test]
    fn test_half_step_reused_after_rejection() {
        let config = IntegratorConfig {
            min_dt: 1.0,
            error_threshold: 1e-9,
        };
        let integrator = AdaptiveIntegrator::new(config).unwrap();
        let model = FixedError::new(1.0);

        let results = integrator.integrate(&model, &0.0, 4.0);

        let dts: Vec<f64> = results.steps().iter().map(|s| s.dt).collect();
        assert_eq!(dts, vec![1.0, 1.0, 1.0, 1.0]);
        // 3 + 2 for the first sub-step, 3 for each of the next two, 1 for the tail
        assert_eq!(model.calls.get(), 12);
        assert_eq!(*results.final_state().unwrap(), 4.0);
    }

    #[test]
    fn test_exponential_decay_tracks_analytic_solution() {
        let config = IntegratorConfig {
            min_dt: 1e-6,
            error_threshold: 1e-6,
        };
        let integrator = AdaptiveIntegrator::new(config).unwrap();
        let model = ExponentialDecay { rate: 2.0 };

        let results = integrator.integrate(&model, &1.0, 0.5);

        assert!(results.len() > 1);
        assert_relative_eq!(results.total_duration(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(*results.final_state().unwrap(), (-1.0f64).exp(), epsilon = 1e-3);
    }

    #[test]
    fn test_step_growth_after_acceptance() {
        let integrator = AdaptiveIntegrator::default();
        let model = ExponentialDecay { rate: 50.0 };

        let results = integrator.integrate(&model, &1.0, 0.1);

        // once the transient has decayed the accepted sub-steps get longer
        let steps = results.steps();
        let longest = steps.iter().map(|s| s.dt).fold(0.0, f64::max);
        assert!(longest > 2.0 * steps[0].dt);
    }

    #[test]
    fn test_zero_duration_is_empty() {
        let integrator = AdaptiveIntegrator::default();
        let model = FixedError::new(0.0);

        assert!(integrator.integrate(&model, &0.0, 0.0).is_empty());
        assert!(integrator.integrate(&model, &0.0, -1.0).is_empty());
        assert_eq!(model.calls.get(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = IntegratorConfig {
            min_dt: 0.0,
            ..IntegratorConfig::default()
        };
        assert_eq!(AdaptiveIntegrator::new(config).unwrap_err(), IntegratorError::InvalidMinDt(0.0));

        let config = IntegratorConfig {
            error_threshold: f64::NAN,
            ..IntegratorConfig::default()
        };
        assert!(matches!(
            AdaptiveIntegrator::new(config),
            Err(IntegratorError::InvalidErrorThreshold(_))
        ));
    }
}
