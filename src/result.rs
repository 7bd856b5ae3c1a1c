//! Post-run result validation.
//!
//! A benchmark run ends with a [`BenchResult`] tree: leaves compare one expected value against
//! one observed value, composites aggregate children. Evaluation is lazy (building a tree costs
//! nothing), never mutates state, and happens once after the measured invocations complete, so a
//! failing check costs no measured time but still fails the run loudly.

use crate::error::ValidationError;

type Probe = Box<dyn Fn() -> Result<(), ValidationError> + Send + Sync>;

/// A lazily evaluated validation unit.
pub enum BenchResult {
    /// Two integers expected to be equal.
    Int {
        name: String,
        expected: i64,
        actual: i64,
    },

    /// Two floats expected to be equal within `epsilon`.
    Float {
        name: String,
        expected: f64,
        actual: f64,
        epsilon: f64,
    },

    /// Two strings expected to be equal by value.
    Text {
        name: String,
        expected: String,
        actual: String,
    },

    /// An engine-specific predicate.
    Check { name: String, probe: Probe },

    /// Validates only if every child validates, in order. The first failing child's message wins
    /// and the remaining children are not evaluated. An empty composite is vacuously valid.
    Compound(Vec<BenchResult>),
}

impl BenchResult {
    pub fn int(name: &str, expected: i64, actual: i64) -> Self {
        Self::Int {
            name: name.to_string(),
            expected,
            actual,
        }
    }

    pub fn float(name: &str, expected: f64, actual: f64, epsilon: f64) -> Self {
        Self::Float {
            name: name.to_string(),
            expected,
            actual,
            epsilon,
        }
    }

    pub fn text(name: &str, expected: &str, actual: &str) -> Self {
        Self::Text {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn check(
        name: &str,
        probe: impl Fn() -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        Self::Check {
            name: name.to_string(),
            probe: Box::new(probe),
        }
    }

    pub fn compound(children: Vec<BenchResult>) -> Self {
        Self::Compound(children)
    }

    /// Evaluate the tree, failing with the first unmet check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Int {
                name,
                expected,
                actual,
            } => {
                if expected != actual {
                    return Err(ValidationError(format!(
                        "{}: expected {} but got {}",
                        name, expected, actual
                    )));
                }
                Ok(())
            }
            Self::Float {
                name,
                expected,
                actual,
                epsilon,
            } => {
                if (expected + epsilon) < *actual || (expected - epsilon) > *actual {
                    return Err(ValidationError(format!(
                        "{}: expected {:.5} +- {:.5} but got {:.5}",
                        name, expected, epsilon, actual
                    )));
                }
                Ok(())
            }
            Self::Text {
                name,
                expected,
                actual,
            } => {
                if expected != actual {
                    return Err(ValidationError(format!(
                        "{}: expected {} but got {}",
                        name, expected, actual
                    )));
                }
                Ok(())
            }
            Self::Check { name, probe } => {
                probe().map_err(|e| ValidationError(format!("{}: {}", name, e.0)))
            }
            Self::Compound(children) => {
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn int_equality() {
        assert!(BenchResult::int("ops", 1000, 1000).validate().is_ok());
        let err = BenchResult::int("ops", 1000, 997).validate().unwrap_err();
        assert_eq!(err.0, "ops: expected 1000 but got 997");
    }

    #[test]
    fn float_within_epsilon() {
        assert!(BenchResult::float("mean", 1.0, 1.0005, 0.001)
            .validate()
            .is_ok());
        let err = BenchResult::float("mean", 1.0, 1.0005, 0.0001)
            .validate()
            .unwrap_err();
        assert!(err.0.contains("1.00000"));
        assert!(err.0.contains("0.00010"));
        assert!(err.0.contains("1.00050"));
    }

    #[test]
    fn text_value_equality() {
        assert!(BenchResult::text("mode", "read", "read").validate().is_ok());
        let err = BenchResult::text("mode", "read", "write")
            .validate()
            .unwrap_err();
        assert_eq!(err.0, "mode: expected read but got write");
    }

    #[test]
    fn empty_compound_is_vacuously_valid() {
        assert!(BenchResult::compound(Vec::new()).validate().is_ok());
    }

    #[test]
    fn compound_validates_all_children() {
        let result = BenchResult::compound(vec![
            BenchResult::int("a", 1, 1),
            BenchResult::float("b", 2.0, 2.0, 0.1),
            BenchResult::text("c", "x", "x"),
        ]);
        assert!(result.validate().is_ok());
    }

    #[test]
    fn compound_fails_fast_with_first_error() {
        let evaluated = Arc::new(AtomicU64::new(0));
        let sentinel = evaluated.clone();
        let result = BenchResult::compound(vec![
            BenchResult::int("a", 1, 1),
            BenchResult::int("b", 10, 20),
            BenchResult::check("c", move || {
                sentinel.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            BenchResult::int("d", 3, 4),
        ]);
        let err = result.validate().unwrap_err();
        assert_eq!(err.0, "b: expected 10 but got 20");
        assert_eq!(evaluated.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn check_runs_before_a_failure() {
        let evaluated = Arc::new(AtomicU64::new(0));
        let sentinel = evaluated.clone();
        let result = BenchResult::compound(vec![
            BenchResult::check("c", move || {
                sentinel.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            BenchResult::int("d", 3, 4),
        ]);
        assert!(result.validate().is_err());
        assert_eq!(evaluated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn check_failure_carries_its_name() {
        let result = BenchResult::check("store size", || {
            Err(ValidationError("expected 10 but got 0".to_string()))
        });
        let err = result.validate().unwrap_err();
        assert_eq!(err.0, "store size: expected 10 but got 0");
    }

    #[test]
    fn nested_compounds_short_circuit() {
        let inner = BenchResult::compound(vec![BenchResult::int("inner", 5, 6)]);
        let outer = BenchResult::compound(vec![inner, BenchResult::int("outer", 1, 2)]);
        let err = outer.validate().unwrap_err();
        assert_eq!(err.0, "inner: expected 5 but got 6");
    }

    #[test]
    fn validation_is_repeatable() {
        let result = BenchResult::int("ops", 7, 7);
        assert!(result.validate().is_ok());
        assert!(result.validate().is_ok());
    }
}
