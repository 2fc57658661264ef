//! Pure reductions over a dispatch's output list.
//!
//! Permission aggregation is order-independent (`deny > ask > allow`);
//! every other reduction is first-non-empty in registration order.

use serde_json::Value;

use super::{HookOutput, PermissionDecision};

/// Aggregated permission with the winning reason.
#[derive(Clone, Debug, PartialEq)]
pub struct PermissionResolution {
    pub decision: PermissionDecision,
    pub reason: Option<String>,
}

impl Default for PermissionResolution {
    fn default() -> Self {
        Self {
            decision: PermissionDecision::Allow,
            reason: None,
        }
    }
}

/// `deny > ask > allow`, default allow. The first hook contributing the
/// winning level supplies the reason.
pub fn aggregate_permission(outputs: &[HookOutput]) -> PermissionResolution {
    let mut resolution = PermissionResolution::default();
    for output in outputs {
        match output.permission_decision {
            Some(PermissionDecision::Deny) => {
                if resolution.decision != PermissionDecision::Deny {
                    resolution.decision = PermissionDecision::Deny;
                    resolution.reason = output.permission_decision_reason.clone();
                }
            }
            Some(PermissionDecision::Ask) => {
                if resolution.decision == PermissionDecision::Allow {
                    resolution.decision = PermissionDecision::Ask;
                    resolution.reason = output.permission_decision_reason.clone();
                }
            }
            Some(PermissionDecision::Allow) | None => {}
        }
    }
    resolution
}

pub fn first_respond_with(outputs: &[HookOutput]) -> Option<&Value> {
    outputs.iter().find_map(|o| o.respond_with.as_ref())
}

pub fn first_updated_input(outputs: &[HookOutput]) -> Option<&Value> {
    outputs.iter().find_map(|o| o.updated_input.as_ref())
}

pub fn first_updated_result(outputs: &[HookOutput]) -> Option<&Value> {
    outputs.iter().find_map(|o| o.updated_result.as_ref())
}

/// First output that states a retry opinion, either way.
pub fn retry_decision(outputs: &[HookOutput]) -> Option<super::RetryDecision> {
    outputs.iter().find_map(|o| {
        o.retry.map(|retry| super::RetryDecision {
            retry,
            delay_ms: o.retry_delay_ms.unwrap_or(0),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deny_beats_ask_beats_allow() {
        let outputs = vec![
            HookOutput::allow(),
            HookOutput::ask("confirm?"),
            HookOutput::deny("blocked"),
            HookOutput::deny("second deny"),
        ];
        let resolution = aggregate_permission(&outputs);
        assert_eq!(resolution.decision, PermissionDecision::Deny);
        assert_eq!(resolution.reason.as_deref(), Some("blocked"));
    }

    #[test]
    fn test_default_allow_and_monotonicity() {
        assert_eq!(
            aggregate_permission(&[]).decision,
            PermissionDecision::Allow
        );
        // Removing an allow never changes a deny aggregate.
        let with_allow = vec![HookOutput::allow(), HookOutput::deny("no")];
        let without_allow = vec![HookOutput::deny("no")];
        assert_eq!(
            aggregate_permission(&with_allow).decision,
            aggregate_permission(&without_allow).decision
        );
    }

    #[test]
    fn test_first_wins_reductions() {
        let outputs = vec![
            HookOutput::default(),
            HookOutput::respond_with(json!("first")),
            HookOutput::respond_with(json!("second")),
        ];
        assert_eq!(first_respond_with(&outputs), Some(&json!("first")));

        let outputs = vec![
            HookOutput {
                retry: Some(false),
                ..Default::default()
            },
            HookOutput::retry_after(50),
        ];
        let decision = retry_decision(&outputs).unwrap();
        assert!(!decision.retry);
    }
}
