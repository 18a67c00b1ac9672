use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A single fault-injection rule.
///
/// Rules are immutable after insertion except for `hits`, which is
/// incremented atomically outside of the plan's lock (§5, shared-resource
/// policy).
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub delay_ms: u64,
    pub drop: bool,
    pub return_empty: bool,
    pub return_err: String,
    pub percentage: u8,
    pub log: bool,

    pub client_addr: String,
    pub client_name: String,
    pub command: String,
    pub raw_match_any: Vec<Vec<u8>>,
    pub raw_match_all: Vec<Vec<u8>>,
    pub always_match: bool,

    hits: Arc<AtomicU64>,
}

impl Rule {
    pub fn new(def: RuleDef) -> Self {
        Rule {
            name: def.name,
            delay_ms: def.delay_ms,
            drop: def.drop,
            return_empty: def.return_empty,
            return_err: def.return_err,
            percentage: def.percentage,
            log: def.log,
            client_addr: def.client_addr,
            client_name: def.client_name,
            command: def.command,
            raw_match_any: def.raw_match_any,
            raw_match_all: def.raw_match_all,
            always_match: def.always_match,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// The plain-data shape of a rule as accepted by `Plan::add_rule`, with no
/// hit counter of its own — the counter is allocated on insertion.
#[derive(Debug, Clone, Default)]
pub struct RuleDef {
    pub name: String,
    pub delay_ms: u64,
    pub drop: bool,
    pub return_empty: bool,
    pub return_err: String,
    pub percentage: u8,
    pub log: bool,
    pub client_addr: String,
    pub client_name: String,
    pub command: String,
    pub raw_match_any: Vec<Vec<u8>>,
    pub raw_match_all: Vec<Vec<u8>>,
    pub always_match: bool,
}

impl RuleDef {
    pub fn named(name: impl Into<String>) -> Self {
        RuleDef {
            name: name.into(),
            ..Default::default()
        }
    }
}
