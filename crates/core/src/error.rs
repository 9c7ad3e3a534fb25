//! Error taxonomy for traffic cutover.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reconciliation phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Fetch,
    Preview,
    Active,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Fetch => "fetch",
            Phase::Preview => "preview",
            Phase::Active => "active",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrafficError {
    #[error("invalid spec: rollout {rollout} missing field activeService")]
    MissingActiveService { rollout: String },

    #[error("more than one rollout selects service {namespace}/{service}: {}", .rollouts.join(", "))]
    OwnershipConflict { namespace: String, service: String, rollouts: Vec<String> },

    #[error("invalid {kind}: {reason}")]
    InvalidObject { kind: &'static str, reason: String },

    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: &'static str, namespace: String, name: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error("{phase} phase: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<TrafficError>,
    },
}

pub type TrafficResult<T> = Result<T, TrafficError>;

impl TrafficError {
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            already @ TrafficError::Phase { .. } => already,
            other => TrafficError::Phase { phase, source: Box::new(other) },
        }
    }

    /// Unwraps phase context.
    pub fn root(&self) -> &TrafficError {
        match self {
            TrafficError::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Configuration errors need a spec change; retrying will not help.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            TrafficError::MissingActiveService { .. }
                | TrafficError::OwnershipConflict { .. }
                | TrafficError::InvalidObject { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), TrafficError::NotFound { .. })
    }
}
