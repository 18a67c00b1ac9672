//! Deserializes a JSON plan file into a populated [`rfault_core::Plan`]
//! (§6, "Plan file"). Out of scope for the core crate per §1's Non-goals,
//! but its failure policy is the same: any error here is fatal at startup
//! (§7, `plan-file-io` / `plan-parse`).

use std::path::Path;

use rfault_core::{Direction, MsgOrdering, Plan, PlanError, RuleDef};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum PlanLoadError {
    #[error("failed to read plan file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse plan file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid ordering {0:?}: must be one of ordered, unordered, unordered-delays")]
    InvalidOrdering(String),
    #[error("rule validation failed: {0}")]
    RuleRejected(#[from] PlanError),
}

/// The wire shape of a single rule, matching the field names in §3
/// verbatim. Omitted fields take their `Default` (zero) value (§6).
#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RuleFileDef {
    name: String,
    delay: u64,
    drop: bool,
    return_empty: bool,
    return_err: String,
    percentage: u8,
    log: bool,
    client_addr: String,
    client_name: String,
    command: String,
    raw_match_any: Vec<String>,
    raw_match_all: Vec<String>,
    always_match: bool,
}

impl From<RuleFileDef> for RuleDef {
    fn from(d: RuleFileDef) -> Self {
        RuleDef {
            name: d.name,
            delay_ms: d.delay,
            drop: d.drop,
            return_empty: d.return_empty,
            return_err: d.return_err,
            percentage: d.percentage,
            log: d.log,
            client_addr: d.client_addr,
            client_name: d.client_name,
            command: d.command,
            raw_match_any: d.raw_match_any.into_iter().map(String::into_bytes).collect(),
            raw_match_all: d.raw_match_all.into_iter().map(String::into_bytes).collect(),
            always_match: d.always_match,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PlanFile {
    msg_ordering: String,
    request_rules: Vec<RuleFileDef>,
    response_rules: Vec<RuleFileDef>,
}

/// Loads and validates a plan file from disk, building a fresh [`Plan`].
pub fn load_plan_file(path: impl AsRef<Path>) -> Result<Plan, PlanLoadError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| PlanLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_plan(&text).map_err(|err| match err {
        PlanLoadError::Parse { source, .. } => PlanLoadError::Parse {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })
}

/// Parses plan JSON text directly, without touching the filesystem —
/// split out from [`load_plan_file`] so it can be exercised with inline
/// JSON in tests.
pub fn parse_plan(text: &str) -> Result<Plan, PlanLoadError> {
    let file: PlanFile = serde_json::from_str(text).map_err(|source| PlanLoadError::Parse {
        path: String::new(),
        source,
    })?;

    let ordering = if file.msg_ordering.is_empty() {
        MsgOrdering::Ordered
    } else {
        MsgOrdering::parse(&file.msg_ordering)
            .ok_or_else(|| PlanLoadError::InvalidOrdering(file.msg_ordering.clone()))?
    };

    let plan = Plan::new(ordering);
    for rule in file.request_rules {
        plan.add_rule(Direction::Request, rule.into())?;
    }
    for rule in file.response_rules {
        plan.add_rule(Direction::Response, rule.into())?;
    }
    Ok(plan)
}

/// Builds an empty, default-ordered plan — used when `--plan` is omitted
/// (§6).
pub fn empty_plan() -> Plan {
    Plan::new(MsgOrdering::Ordered)
}
