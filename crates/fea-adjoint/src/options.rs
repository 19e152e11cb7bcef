//! Solver configuration snapshots.
//!
//! Each recorded solve carries an immutable [`SolverOptions`] value taken at
//! recording time. The record is structured and validated up front rather
//! than an open-ended key/value bag: tolerances and iteration caps are
//! named fields, and anything backend-specific goes into `extras` under an
//! explicit name.

use std::collections::BTreeMap;

use fea_la::{KrylovOptions, SolveError};
use serde::{Deserialize, Serialize};

/// Immutable-per-node solver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    relative_tolerance: f64,
    absolute_tolerance: f64,
    max_iterations: usize,
    nonzero_initial_guess: bool,
    extras: BTreeMap<String, f64>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-50,
            max_iterations: 1000,
            nonzero_initial_guess: false,
            extras: BTreeMap::new(),
        }
    }
}

impl SolverOptions {
    /// Validated construction; invalid values are configuration errors.
    pub fn new(
        relative_tolerance: f64,
        absolute_tolerance: f64,
        max_iterations: usize,
    ) -> Result<Self, SolveError> {
        let options = Self {
            relative_tolerance,
            absolute_tolerance,
            max_iterations,
            ..Self::default()
        };
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<(), SolveError> {
        if !self.relative_tolerance.is_finite() || self.relative_tolerance <= 0.0 {
            return Err(SolveError::Config(format!(
                "relative tolerance must be finite and positive, got {}",
                self.relative_tolerance
            )));
        }
        if !self.absolute_tolerance.is_finite() || self.absolute_tolerance <= 0.0 {
            return Err(SolveError::Config(format!(
                "absolute tolerance must be finite and positive, got {}",
                self.absolute_tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(SolveError::Config(
                "max iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Request warm-starting from the solution variable's current value.
    pub fn with_nonzero_initial_guess(mut self, nonzero: bool) -> Self {
        self.nonzero_initial_guess = nonzero;
        self
    }

    /// Attach a named backend-specific option.
    pub fn with_extra(mut self, name: &str, value: f64) -> Self {
        self.extras.insert(name.to_string(), value);
        self
    }

    pub fn relative_tolerance(&self) -> f64 {
        self.relative_tolerance
    }

    pub fn absolute_tolerance(&self) -> f64 {
        self.absolute_tolerance
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn nonzero_initial_guess(&self) -> bool {
        self.nonzero_initial_guess
    }

    pub fn extra(&self, name: &str) -> Option<f64> {
        self.extras.get(name).copied()
    }

    pub fn extras(&self) -> &BTreeMap<String, f64> {
        &self.extras
    }

    /// The backend-facing subset of these options.
    pub fn to_krylov_options(&self) -> KrylovOptions {
        KrylovOptions {
            relative_tolerance: self.relative_tolerance,
            absolute_tolerance: self.absolute_tolerance,
            max_iterations: self.max_iterations,
            nonzero_initial_guess: self.nonzero_initial_guess,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let o = SolverOptions::default();
        assert!(o.validate().is_ok());
        assert_eq!(o.max_iterations(), 1000);
        assert!(!o.nonzero_initial_guess());
    }

    #[test]
    fn invalid_tolerances_are_rejected() {
        assert!(SolverOptions::new(-1e-10, 1e-50, 100).is_err());
        assert!(SolverOptions::new(1e-10, f64::NAN, 100).is_err());
        assert!(SolverOptions::new(1e-10, 1e-50, 0).is_err());
    }

    #[test]
    fn extras_are_stored_by_name() {
        let o = SolverOptions::default().with_extra("divergence_limit", 1e5);
        assert_eq!(o.extra("divergence_limit"), Some(1e5));
        assert_eq!(o.extra("missing"), None);
    }

    #[test]
    fn backend_conversion_carries_fields() {
        let o = SolverOptions::new(1e-8, 1e-30, 50)
            .unwrap()
            .with_nonzero_initial_guess(true);
        let k = o.to_krylov_options();
        assert_eq!(k.relative_tolerance, 1e-8);
        assert_eq!(k.max_iterations, 50);
        assert!(k.nonzero_initial_guess);
    }

    #[test]
    fn serde_round_trip() {
        let o = SolverOptions::new(1e-9, 1e-40, 200)
            .unwrap()
            .with_extra("restart", 30.0);
        let json = serde_json::to_string(&o).unwrap();
        let back: SolverOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(o, back);
    }
}
