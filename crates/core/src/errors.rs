use crate::resp::FrameError;

/// Errors surfaced while a single client/upstream connection pair is pumped.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to dial upstream redis: {0}")]
    UpstreamDial(#[source] std::io::Error),

    #[error("io error on {side}: {source}")]
    Io {
        side: Side,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed RESP stream from {side}: {source}")]
    Frame {
        side: Side,
        #[source]
        source: FrameError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Upstream => write!(f, "upstream"),
        }
    }
}

/// Errors returned by plan mutation operations (add/delete/lookup), surfaced
/// both to the control API and to the plan-file loader.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("rule {0:?} already exists")]
    DuplicateRule(String),

    #[error("rule {0:?} not found")]
    RuleNotFound(String),

    #[error("rule {name:?} has invalid percentage {percentage}: must be 0..=100")]
    InvalidPercentage { name: String, percentage: i32 },
}
