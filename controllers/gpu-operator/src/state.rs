//! Per-state results and the aggregate outcome of a pass.

use crate::error::ControllerError;
use crds::{ClusterPolicyStatus, OperandState, OperandStatus, PolicyState};

/// Outcome of one operand state in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateResult {
    pub name: String,
    pub state: OperandState,
    pub message: Option<String>,
    /// Set when the state was aborted by a configuration error
    pub config_error: bool,
}

impl StateResult {
    pub fn ready(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: OperandState::Ready,
            message: None,
            config_error: false,
        }
    }

    pub fn disabled(name: &str) -> Self {
        Self {
            state: OperandState::Disabled,
            ..Self::ready(name)
        }
    }

    pub fn not_ready(name: &str, message: impl Into<String>) -> Self {
        Self {
            state: OperandState::NotReady,
            message: Some(message.into()),
            ..Self::ready(name)
        }
    }

    /// NotReady from an error; configuration errors are flagged so the pass
    /// can report them.
    pub fn failed(name: &str, err: &ControllerError) -> Self {
        Self {
            config_error: !err.is_retryable(),
            ..Self::not_ready(name, err.to_string())
        }
    }
}

/// Results of every state of one pass, in reconciliation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub states: Vec<StateResult>,
}

impl PassReport {
    pub fn push(&mut self, result: StateResult) {
        self.states.push(result);
    }

    /// `Disabled` when every state is disabled, `Ready` when every enabled
    /// state is ready, `NotReady` otherwise.
    pub fn aggregate(&self) -> PolicyState {
        let mut enabled = self.states.iter().filter(|s| s.state != OperandState::Disabled).peekable();
        if enabled.peek().is_none() {
            return PolicyState::Disabled;
        }
        if enabled.all(|s| s.state == OperandState::Ready) {
            PolicyState::Ready
        } else {
            PolicyState::NotReady
        }
    }

    /// Message of the first state aborted by a configuration error.
    pub fn first_config_error(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|s| s.config_error)
            .and_then(|s| s.message.as_deref())
    }

    pub fn has_config_error(&self) -> bool {
        self.states.iter().any(|s| s.config_error)
    }

    pub fn to_status(&self, namespace: &str) -> ClusterPolicyStatus {
        ClusterPolicyStatus {
            state: self.aggregate(),
            namespace: Some(namespace.to_string()),
            operands: self
                .states
                .iter()
                .map(|s| OperandStatus {
                    name: s.name.clone(),
                    state: s.state,
                    message: s.message.clone(),
                })
                .collect(),
            error: self.first_config_error().map(str::to_string),
            last_reconciled: Some(chrono::Utc::now()),
        }
    }
}
