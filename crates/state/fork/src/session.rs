use forkdb_state_remote::RemoteStateError;
use serde::{Deserialize, Serialize};

/// How a forked state reacts to remote failures that are neither conflicts
/// nor cancellations.
///
/// Under both policies the missing value is replaced by an empty account or a
/// zero slot, so execution never stalls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorPolicy {
    /// Record the first failure for the end of the session and continue.
    #[default]
    FailSoft,
    /// Abort the operation with the failure.
    FailStrict,
}

/// Remote failures that were absorbed during a session.
///
/// Cancelled requests are not failures. They are only counted, for
/// diagnostics, and never affect [`SessionErrors::is_empty`] or
/// [`SessionErrors::into_result`].
#[derive(Debug, Default)]
pub struct SessionErrors {
    first_failure: Option<RemoteStateError>,
    failures: usize,
    cancellations: usize,
}

impl SessionErrors {
    /// The first failure that was recorded, if any.
    pub fn first_failure(&self) -> Option<&RemoteStateError> {
        self.first_failure.as_ref()
    }

    /// The number of failures that were absorbed, including the first.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// The number of remote requests that were cancelled or timed out. This is
    /// a diagnostic count; cancellations are never recorded as failures.
    pub fn cancellations(&self) -> usize {
        self.cancellations
    }

    /// Whether no failure was recorded. Cancellations don't count.
    pub fn is_empty(&self) -> bool {
        self.first_failure.is_none()
    }

    /// Converts the accumulator into the session's outcome.
    pub fn into_result(self) -> Result<(), RemoteStateError> {
        self.first_failure.map_or(Ok(()), Err)
    }

    pub(crate) fn record_failure(&mut self, error: RemoteStateError) {
        self.failures += 1;
        if self.first_failure.is_none() {
            self.first_failure = Some(error);
        }
    }

    pub(crate) fn record_cancellation(&mut self) {
        self.cancellations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_policy_serde() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&ErrorPolicy::FailSoft)?, "\"failSoft\"");
        assert_eq!(
            serde_json::from_str::<ErrorPolicy>("\"failStrict\"")?,
            ErrorPolicy::FailStrict
        );

        Ok(())
    }

    #[test]
    fn only_first_failure_is_kept() {
        let mut errors = SessionErrors::default();
        assert!(errors.is_empty());

        errors.record_cancellation();
        assert!(errors.is_empty());

        errors.record_failure(RemoteStateError::Other("first".into()));
        errors.record_failure(RemoteStateError::Other("second".into()));

        assert_eq!(errors.failures(), 2);
        assert_eq!(errors.cancellations(), 1);
        assert_eq!(
            errors.first_failure().map(ToString::to_string),
            Some("first".to_string())
        );

        let error = errors.into_result().expect_err("a failure was recorded");
        assert_eq!(error.to_string(), "first");
    }
}
