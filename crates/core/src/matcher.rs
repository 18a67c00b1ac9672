//! Pure rule-matching logic (§4.2).
//!
//! Deliberately free of any locking or I/O so it can be exercised with plain
//! unit tests: [`Plan::select_rule`](crate::plan::Plan::select_rule) is the
//! only caller in the running proxy, and it supplies the lock-protected
//! inputs this module treats as plain data.

use crate::resp::RespValue;
use crate::rule::Rule;
use rfault_helpers::rng::PercentGate;

/// Behavioral switches for predicates the source this system was modeled on
/// implements ambiguously or, most likely, incorrectly (§9).
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// When true (the default, preserving observed behavior), the
    /// `clientAddr` predicate matches when the address does **not** start
    /// with the configured prefix — almost certainly a bug upstream. When
    /// false, the predicate uses the intended positive-prefix match.
    pub invert_client_addr_prefix: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions {
            invert_client_addr_prefix: true,
        }
    }
}

/// Looks up the display name a client previously registered via
/// `CLIENT SETNAME`, keyed by its remote address.
pub trait ClientNameLookup {
    fn name_for(&self, client_addr: &str) -> Option<String>;
}

impl<F: Fn(&str) -> Option<String>> ClientNameLookup for F {
    fn name_for(&self, client_addr: &str) -> Option<String> {
        self(client_addr)
    }
}

/// Scans `rules` in order and returns the first one whose predicates match,
/// applying the percentage gate and recording a hit on success.
///
/// Returns `None` if no rule matches, or if the single matching rule's
/// percentage gate rolled against it.
pub fn select_rule<'a>(
    rules: &'a [Rule],
    client_addr: &str,
    msg: &RespValue,
    raw: &[u8],
    names: &dyn ClientNameLookup,
    gate: &dyn PercentGate,
    opts: MatchOptions,
) -> Option<&'a Rule> {
    for rule in rules {
        if rule.always_match {
            return gate_and_record(rule, gate);
        }

        if !rule_has_active_predicate(rule) {
            continue;
        }

        if !predicates_match(rule, client_addr, msg, raw, names, opts) {
            continue;
        }

        return gate_and_record(rule, gate);
    }
    None
}

fn rule_has_active_predicate(rule: &Rule) -> bool {
    !rule.client_name.is_empty()
        || !rule.client_addr.is_empty()
        || !rule.command.is_empty()
        || !rule.raw_match_any.is_empty()
        || !rule.raw_match_all.is_empty()
}

fn predicates_match(
    rule: &Rule,
    client_addr: &str,
    msg: &RespValue,
    raw: &[u8],
    names: &dyn ClientNameLookup,
    opts: MatchOptions,
) -> bool {
    let mut matches = true;

    if !rule.client_name.is_empty() {
        matches &= names.name_for(client_addr).as_deref() == Some(rule.client_name.as_str());
    }

    if !rule.client_addr.is_empty() {
        let has_prefix = client_addr.starts_with(&rule.client_addr);
        matches &= if opts.invert_client_addr_prefix {
            !has_prefix
        } else {
            has_prefix
        };
    }

    if !rule.command.is_empty() {
        match msg.array_elements() {
            None => matches = false,
            Some(elems) => {
                if let Some(first) = elems.first() {
                    matches &= first.scalar_data() == Some(rule.command.as_bytes());
                }
                // An empty array leaves `matches` unchanged, matching the
                // source's iteration-that-never-visits-anything behavior.
            }
        }
    }

    if !rule.raw_match_any.is_empty() {
        matches &= rule.raw_match_any.iter().any(|frag| contains(raw, frag));
    }

    if !rule.raw_match_all.is_empty() {
        matches &= rule.raw_match_all.iter().all(|frag| contains(raw, frag));
    }

    matches
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn gate_and_record<'a>(rule: &'a Rule, gate: &dyn PercentGate) -> Option<&'a Rule> {
    if rule.percentage > 0 && gate.roll() > rule.percentage as u32 {
        return None;
    }
    rule.record_hit();
    Some(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleDef;
    use pretty_assertions::assert_eq;

    struct AlwaysGate(u32);
    impl PercentGate for AlwaysGate {
        fn roll(&self) -> u32 {
            self.0
        }
    }

    fn no_names(_: &str) -> Option<String> {
        None
    }

    fn array_of(parts: &[&[u8]]) -> RespValue {
        RespValue::Array(Some(
            parts
                .iter()
                .map(|p| RespValue::BulkString(Some(p.to_vec())))
                .collect(),
        ))
    }

    #[test]
    fn empty_predicate_rule_never_matches_without_always_match() {
        let rules = vec![Rule::new(RuleDef::named("noop"))];
        let msg = array_of(&[b"PING"]);
        let got = select_rule(
            &rules,
            "1.2.3.4:1",
            &msg,
            b"*1\r\n$4\r\nPING\r\n",
            &no_names,
            &AlwaysGate(0),
            MatchOptions::default(),
        );
        assert!(got.is_none());
    }

    #[test]
    fn always_match_short_circuits() {
        let rules = vec![Rule::new(RuleDef {
            always_match: true,
            ..RuleDef::named("any")
        })];
        let msg = array_of(&[b"PING"]);
        let got = select_rule(
            &rules,
            "1.2.3.4:1",
            &msg,
            b"*1\r\n$4\r\nPING\r\n",
            &no_names,
            &AlwaysGate(0),
            MatchOptions::default(),
        );
        assert_eq!(got.unwrap().name, "any");
        assert_eq!(got.unwrap().hits(), 1);
    }

    /// S1: inverted clientAddr prefix semantics are the default.
    #[test]
    fn scenario_s1_inverted_client_addr_prefix() {
        let rules = vec![Rule::new(RuleDef {
            delay_ms: 1000,
            client_addr: "192.0.0.1:8001".into(),
            ..RuleDef::named("r1")
        })];
        let msg = RespValue::Array(Some(vec![]));
        let got = select_rule(
            &rules,
            "192.0.0.1",
            &msg,
            b"*0\r\n",
            &no_names,
            &AlwaysGate(0),
            MatchOptions::default(),
        );
        assert!(got.is_some(), "inverted prefix should match a non-prefixed address");
    }

    #[test]
    fn client_addr_positive_prefix_mode() {
        let rules = vec![Rule::new(RuleDef {
            client_addr: "192.0.0.1".into(),
            ..RuleDef::named("r1")
        })];
        let msg = RespValue::Array(Some(vec![]));
        let opts = MatchOptions {
            invert_client_addr_prefix: false,
        };
        let got = select_rule(
            &rules,
            "192.0.0.1:8001",
            &msg,
            b"*0\r\n",
            &no_names,
            &AlwaysGate(0),
            opts,
        );
        assert!(got.is_some());
    }

    /// S2 / S3: command predicate.
    #[test]
    fn scenario_s2_command_predicate_positive() {
        let rules = vec![Rule::new(RuleDef {
            command: "GET".into(),
            ..RuleDef::named("r1")
        })];
        let msg = array_of(&[b"GET"]);
        let got = select_rule(
            &rules,
            "a",
            &msg,
            b"*1\r\n$3\r\nGET\r\n",
            &no_names,
            &AlwaysGate(0),
            MatchOptions::default(),
        );
        assert!(got.is_some());
    }

    #[test]
    fn scenario_s3_command_predicate_negative() {
        let rules = vec![Rule::new(RuleDef {
            command: "GET".into(),
            ..RuleDef::named("r1")
        })];
        let msg = array_of(&[b"KEYS"]);
        let got = select_rule(
            &rules,
            "a",
            &msg,
            b"*1\r\n$4\r\nKEYS\r\n",
            &no_names,
            &AlwaysGate(0),
            MatchOptions::default(),
        );
        assert!(got.is_none());
    }

    /// S3: a command predicate must fail outright on a non-Array message,
    /// not fall through to "unchanged" the way an empty array does.
    #[test]
    fn scenario_s3_command_predicate_non_array_message() {
        let rules = vec![Rule::new(RuleDef {
            command: "GET".into(),
            ..RuleDef::named("r1")
        })];
        let msg = RespValue::SimpleString(b"PONG".to_vec());
        let got = select_rule(
            &rules,
            "a",
            &msg,
            b"+PONG\r\n",
            &no_names,
            &AlwaysGate(0),
            MatchOptions::default(),
        );
        assert!(got.is_none());
    }

    /// S4: rawMatchAll, first rule to satisfy AND-of-fragments wins.
    #[test]
    fn scenario_s4_raw_match_all_first_wins() {
        let rules = vec![
            Rule::new(RuleDef {
                raw_match_all: vec![b"321".to_vec(), b"123".to_vec()],
                ..RuleDef::named("1")
            }),
            Rule::new(RuleDef {
                raw_match_all: vec![b"123".to_vec(), b"abc".to_vec()],
                ..RuleDef::named("2")
            }),
        ];
        let raw = b"contains 123 and abc but not the other thing";
        let msg = RespValue::SimpleString(raw.to_vec());
        let got = select_rule(&rules, "a", &msg, raw, &no_names, &AlwaysGate(0), MatchOptions::default());
        let rule = got.unwrap();
        assert_eq!(rule.name, "2");
        assert_eq!(rule.hits(), 1);
    }

    /// S5: rawMatchAny, first-match order still governs.
    #[test]
    fn scenario_s5_raw_match_any_first_wins() {
        let rules = vec![
            Rule::new(RuleDef {
                raw_match_any: vec![b"321".to_vec(), b"123".to_vec()],
                ..RuleDef::named("1")
            }),
            Rule::new(RuleDef {
                raw_match_any: vec![b"abc".to_vec(), b"123".to_vec()],
                ..RuleDef::named("2")
            }),
        ];
        let raw = b"has both 123 and 321 in it";
        let msg = RespValue::SimpleString(raw.to_vec());
        let got = select_rule(&rules, "a", &msg, raw, &no_names, &AlwaysGate(0), MatchOptions::default());
        assert_eq!(got.unwrap().name, "1");
    }

    #[test]
    fn percentage_gate_skips_when_roll_exceeds_percentage() {
        let rules = vec![Rule::new(RuleDef {
            always_match: true,
            percentage: 50,
            ..RuleDef::named("r")
        })];
        let msg = RespValue::Array(Some(vec![]));
        let got = select_rule(&rules, "a", &msg, b"", &no_names, &AlwaysGate(90), MatchOptions::default());
        assert!(got.is_none());
        assert_eq!(rules[0].hits(), 0);
    }

    #[test]
    fn percentage_gate_passes_when_roll_within_percentage() {
        let rules = vec![Rule::new(RuleDef {
            always_match: true,
            percentage: 50,
            ..RuleDef::named("r")
        })];
        let msg = RespValue::Array(Some(vec![]));
        let got = select_rule(&rules, "a", &msg, b"", &no_names, &AlwaysGate(10), MatchOptions::default());
        assert!(got.is_some());
        assert_eq!(rules[0].hits(), 1);
    }

    #[test]
    fn client_name_predicate_uses_lookup_table() {
        let rules = vec![Rule::new(RuleDef {
            client_name: "foo".into(),
            ..RuleDef::named("r")
        })];
        let msg = RespValue::Array(Some(vec![]));
        let names = |addr: &str| if addr == "A" { Some("foo".to_string()) } else { None };
        let got = select_rule(&rules, "A", &msg, b"", &names, &AlwaysGate(0), MatchOptions::default());
        assert!(got.is_some());

        let got_other = select_rule(&rules, "B", &msg, b"", &names, &AlwaysGate(0), MatchOptions::default());
        assert!(got_other.is_none());
    }

    #[test]
    fn hit_monotonicity_over_repeated_matches() {
        let rules = vec![Rule::new(RuleDef {
            always_match: true,
            ..RuleDef::named("r")
        })];
        let msg = RespValue::Array(Some(vec![]));
        for i in 1..=5u64 {
            select_rule(&rules, "a", &msg, b"", &no_names, &AlwaysGate(0), MatchOptions::default());
            assert_eq!(rules[0].hits(), i);
        }
    }
}
