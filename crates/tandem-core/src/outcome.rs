//! Per-store results of one coordinated operation

use crate::classify::{ClassifiedError, FailureKind};
use crate::error::{Error, Result};
use crate::store::{StoreResult, StoreRole};

/// What happened at one store
#[derive(Debug)]
pub enum Attempt<V> {
    /// The store completed the operation
    Success(V),
    /// The store was not consulted
    Skipped,
    /// The store failed
    Failed(ClassifiedError),
}

impl<V> Attempt<V> {
    /// Wrap a store call result
    pub fn from_result(result: StoreResult<V>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failed(err),
        }
    }

    /// Check for success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Check whether the store was skipped
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Check for any failure
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Check for a connectivity failure
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(self, Self::Failed(err) if err.is_connectivity())
    }

    /// Failure kind, if the attempt failed
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error().map(ClassifiedError::kind)
    }

    /// Successful value, if any
    pub fn as_success(&self) -> Option<&V> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Failure, if any
    pub fn error(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Map the successful value
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Attempt<U> {
        match self {
            Self::Success(value) => Attempt::Success(f(value)),
            Self::Skipped => Attempt::Skipped,
            Self::Failed(err) => Attempt::Failed(err),
        }
    }
}

/// Combined result of one coordinated operation
///
/// Whenever the primary failed with a connectivity failure on a write, the
/// secondary was attempted: `secondary` is never `Skipped` in that case.
#[derive(Debug)]
pub struct ReplicationOutcome<V> {
    /// Primary store result
    pub primary: Attempt<V>,
    /// Secondary store result
    pub secondary: Attempt<V>,
}

impl<V> ReplicationOutcome<V> {
    /// Create an outcome
    pub fn new(primary: Attempt<V>, secondary: Attempt<V>) -> Self {
        Self { primary, secondary }
    }

    /// Map both results
    pub fn map<U>(self, f: impl Fn(V) -> U) -> ReplicationOutcome<U> {
        ReplicationOutcome {
            primary: self.primary.map(&f),
            secondary: self.secondary.map(&f),
        }
    }

    /// The externally visible value, if the operation succeeded
    pub fn value(&self) -> Option<&V> {
        match (&self.primary, &self.secondary) {
            (Attempt::Success(value), _) => Some(value),
            (Attempt::Failed(err), _) if !err.is_connectivity() => None,
            (_, Attempt::Success(value)) => Some(value),
            _ => None,
        }
    }

    /// Check whether the two stores may have diverged
    ///
    /// True when exactly one store applied the change: the primary succeeded
    /// but the secondary failed, or the primary was unreachable and the
    /// secondary served the operation.
    pub fn is_degraded(&self) -> bool {
        matches!(
            (&self.primary, &self.secondary),
            (Attempt::Success(_), Attempt::Failed(_)) | (Attempt::Failed(_), Attempt::Success(_))
        )
    }

    /// Check whether the secondary served the operation in place of the
    /// primary
    pub fn served_by_secondary(&self) -> bool {
        !self.primary.is_success() && self.secondary.is_success()
    }

    /// Resolve to the caller-visible result
    ///
    /// | primary              | secondary            | result                   |
    /// |----------------------|----------------------|--------------------------|
    /// | success              | any                  | primary value            |
    /// | logic failure        | any                  | `Logic { Primary }`      |
    /// | connectivity failure | success              | secondary value          |
    /// | connectivity failure | logic failure        | `Logic { Secondary }`    |
    /// | connectivity failure | connectivity failure | `Combined`               |
    /// | connectivity failure | skipped              | `Unavailable { Primary }`|
    /// | skipped              | success              | secondary value          |
    /// | skipped              | failure              | secondary's error        |
    pub fn into_result(self) -> Result<V> {
        match (self.primary, self.secondary) {
            (Attempt::Success(value), _) => Ok(value),
            (Attempt::Failed(err), _) if !err.is_connectivity() => Err(Error::Logic {
                role: StoreRole::Primary,
                source: err,
            }),
            (Attempt::Failed(_), Attempt::Success(value)) => Ok(value),
            (Attempt::Failed(primary), Attempt::Failed(secondary)) => {
                if secondary.is_connectivity() {
                    Err(Error::Combined { primary, secondary })
                } else {
                    Err(Error::Logic {
                        role: StoreRole::Secondary,
                        source: secondary,
                    })
                }
            }
            (Attempt::Failed(err), Attempt::Skipped) => Err(Error::Unavailable {
                role: StoreRole::Primary,
                source: err,
            }),
            (Attempt::Skipped, Attempt::Success(value)) => Ok(value),
            (Attempt::Skipped, Attempt::Failed(err)) => {
                let role = StoreRole::Secondary;
                if err.is_connectivity() {
                    Err(Error::Unavailable { role, source: err })
                } else {
                    Err(Error::Logic { role, source: err })
                }
            }
            (Attempt::Skipped, Attempt::Skipped) => {
                Err(Error::internal("operation reached neither store"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StoreError;

    fn down() -> Attempt<u64> {
        Attempt::Failed(StoreError::unreachable("cloud").into())
    }

    fn rejected() -> Attempt<u64> {
        Attempt::Failed(StoreError::constraint("duplicate").into())
    }

    #[test]
    fn test_primary_success_wins() {
        let outcome = ReplicationOutcome::new(Attempt::Success(7), down());
        assert!(outcome.is_degraded());
        assert_eq!(outcome.value(), Some(&7));
        assert_eq!(outcome.into_result().unwrap(), 7);
    }

    #[test]
    fn test_primary_logic_failure_is_surfaced() {
        let outcome = ReplicationOutcome::new(rejected(), Attempt::Skipped);
        assert_eq!(outcome.value(), None);
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, Error::Logic { role: StoreRole::Primary, .. }));

        let outcome = ReplicationOutcome::new(rejected(), rejected());
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, Error::Logic { role: StoreRole::Primary, .. }));
    }

    #[test]
    fn test_failover_result() {
        let outcome = ReplicationOutcome::new(down(), Attempt::Success(1 << 48));
        assert!(outcome.served_by_secondary());
        assert!(outcome.is_degraded());
        assert_eq!(outcome.into_result().unwrap(), 1 << 48);
    }

    #[test]
    fn test_secondary_logic_failure_after_failover() {
        let outcome = ReplicationOutcome::new(down(), rejected());
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, Error::Logic { role: StoreRole::Secondary, .. }));
    }

    #[test]
    fn test_both_unreachable_is_combined() {
        let outcome = ReplicationOutcome::new(down(), down());
        assert!(!outcome.is_degraded());
        assert!(outcome.into_result().unwrap_err().is_combined());
    }

    #[test]
    fn test_skipped_primary() {
        let outcome = ReplicationOutcome::new(Attempt::Skipped, Attempt::Success(3));
        assert_eq!(outcome.into_result().unwrap(), 3);

        let outcome = ReplicationOutcome::new(Attempt::Skipped, down());
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, Error::Unavailable { role: StoreRole::Secondary, .. }));

        let outcome: ReplicationOutcome<u64> =
            ReplicationOutcome::new(Attempt::Skipped, Attempt::Skipped);
        assert!(matches!(outcome.into_result(), Err(Error::Internal(_))));
    }

    #[test]
    fn test_unreachable_primary_without_fallback() {
        let outcome = ReplicationOutcome::new(down(), Attempt::Skipped);
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, Error::Unavailable { role: StoreRole::Primary, .. }));
    }

    #[test]
    fn test_map_keeps_failures() {
        let outcome = ReplicationOutcome::new(Attempt::Success(2u64), down()).map(|v| v * 10);
        assert_eq!(outcome.primary.as_success(), Some(&20));
        assert!(outcome.secondary.is_connectivity_failure());
        assert_eq!(outcome.secondary.failure_kind(), Some(FailureKind::Connectivity));
    }
}
