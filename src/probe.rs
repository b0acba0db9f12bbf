//! Fallback policy for probes whose failure should not abort a workflow.

use std::fmt::Display;

use tracing::warn;

/// What to do when a read-only probe (container listing, dedup lookup) fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProbeFailurePolicy {
    /// Log the failure and continue as if the probed thing does not exist.
    #[default]
    TreatAsAbsent,
    /// Surface the failure to the caller.
    Propagate,
}

impl ProbeFailurePolicy {
    /// Applies the policy to a probe result, substituting `absent` on failure
    /// under [`ProbeFailurePolicy::TreatAsAbsent`].
    ///
    /// # Errors
    ///
    /// Returns the original error under [`ProbeFailurePolicy::Propagate`].
    pub fn apply<T, E: Display>(self, probe: &str, result: Result<T, E>, absent: T) -> Result<T, E> {
        match (self, result) {
            (_, Ok(value)) => Ok(value),
            (Self::TreatAsAbsent, Err(err)) => {
                warn!(probe, error = %err, "probe failed; treating as absent");
                Ok(absent)
            }
            (Self::Propagate, Err(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn treat_as_absent_substitutes_fallback() {
        let result: Result<bool, String> = Err(String::from("boom"));
        assert_eq!(
            ProbeFailurePolicy::TreatAsAbsent.apply("containers", result, false),
            Ok(false)
        );
    }

    #[test]
    fn propagate_returns_original_error() {
        let result: Result<bool, String> = Err(String::from("boom"));
        assert_eq!(
            ProbeFailurePolicy::Propagate.apply("containers", result, false),
            Err(String::from("boom"))
        );
    }

    #[test]
    fn successful_probe_is_untouched_by_either_policy() {
        for policy in [ProbeFailurePolicy::TreatAsAbsent, ProbeFailurePolicy::Propagate] {
            assert_eq!(policy.apply::<_, String>("dedup", Ok(true), false), Ok(true));
        }
    }

    #[test]
    fn default_policy_treats_failures_as_absent() {
        assert_eq!(ProbeFailurePolicy::default(), ProbeFailurePolicy::TreatAsAbsent);
    }
}
