//! Single-rule matching against an authentication context.

use chrono::{Local, NaiveTime, Timelike};
use ipnet::IpNet;
use std::net::IpAddr;

use mfasrv_domain::context::AuthenticationContext;
use mfasrv_domain::model::{Rule, RuleOperator, RuleType};

/// Does `rule` match `ctx`? `negate` is applied last, uniformly: a rule that
/// cannot match for lack of input (e.g. no source IP) becomes true when
/// negated.
pub fn rule_matches(rule: &Rule, ctx: &AuthenticationContext) -> bool {
    let raw = match rule.rule_type {
        RuleType::SourceUser => string_match(rule, &[ctx.user_name.as_str()]),
        RuleType::SourceGroup => {
            let groups: Vec<&str> = ctx.user_groups.iter().map(String::as_str).collect();
            string_match(rule, &groups)
        }
        RuleType::SourceOu => string_match(rule, &optional(&ctx.user_ou)),
        RuleType::TargetResource => string_match(rule, &optional(&ctx.target_resource)),
        RuleType::AuthProtocol => string_match(rule, &[ctx.protocol.as_str()]),
        RuleType::SourceIp => ip_match(rule, ctx.source_ip.as_deref()),
        RuleType::TimeWindow => time_window_match(&rule.value, ctx),
        // No scorer exists yet; the input is a placeholder.
        RuleType::RiskScore => false,
    };
    raw ^ rule.negate
}

fn optional(value: &Option<String>) -> Vec<&str> {
    value.as_deref().into_iter().collect()
}

/// Case-insensitive string operators over one or more candidate values; any
/// candidate matching is a match.
fn string_match(rule: &Rule, candidates: &[&str]) -> bool {
    let needle = rule.value.to_lowercase();
    candidates.iter().any(|candidate| {
        let hay = candidate.to_lowercase();
        match rule.operator {
            RuleOperator::Equals => hay == needle,
            RuleOperator::Contains => hay.contains(&needle),
            RuleOperator::StartsWith => hay.starts_with(&needle),
            RuleOperator::EndsWith => hay.ends_with(&needle),
            RuleOperator::Regex => regex_match(&rule.value, candidate),
        }
    })
}

fn regex_match(pattern: &str, candidate: &str) -> bool {
    match regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.is_match(candidate),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "unparseable regex rule never matches");
            false
        }
    }
}

/// `source_ip` rules: the value is a CIDR block or a literal address; other
/// operators fall back to the string comparison on the textual form.
fn ip_match(rule: &Rule, source_ip: Option<&str>) -> bool {
    let Some(ip_text) = source_ip else {
        return false;
    };
    if rule.operator == RuleOperator::Equals {
        if let Ok(net) = rule.value.trim().parse::<IpNet>() {
            if let Ok(addr) = ip_text.parse::<IpAddr>() {
                return net.contains(&addr);
            }
        }
        if let (Ok(a), Ok(b)) = (rule.value.trim().parse::<IpAddr>(), ip_text.parse::<IpAddr>()) {
            return a == b;
        }
    }
    string_match(rule, &[ip_text])
}

/// `HH:MM-HH:MM` in center-local time; wrap-around across midnight allowed.
fn time_window_match(value: &str, ctx: &AuthenticationContext) -> bool {
    let Some((start, end)) = parse_window(value) else {
        tracing::warn!(value, "unparseable time window never matches");
        return false;
    };
    let local = ctx.timestamp.with_timezone(&Local).time();
    let t = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).expect("valid wall time");
    if start <= end {
        t >= start && t < end
    } else {
        // Wraps midnight, e.g. 22:00-06:00.
        t >= start || t < end
    }
}

fn parse_window(value: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (a, b) = value.trim().split_once('-')?;
    let parse = |s: &str| NaiveTime::parse_from_str(s.trim(), "%H:%M").ok();
    Some((parse(a)?, parse(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mfasrv_domain::model::RuleOperator;

    fn ctx() -> AuthenticationContext {
        AuthenticationContext {
            user_name: "alice".into(),
            user_groups: vec![
                "S-1-5-21-1111-2222-3333-512".into(),
                "S-1-5-21-1111-2222-3333-513".into(),
            ],
            source_ip: Some("10.0.0.7".into()),
            user_ou: Some("OU=Admins,DC=corp,DC=example".into()),
            target_resource: Some("fileserver01".into()),
            protocol: "kerberos".into(),
            timestamp: Utc::now(),
        }
    }

    fn rule(rule_type: RuleType, operator: RuleOperator, value: &str) -> Rule {
        Rule {
            rule_type,
            operator,
            value: value.into(),
            negate: false,
        }
    }

    #[test]
    fn string_ops_are_case_insensitive() {
        assert!(rule_matches(
            &rule(RuleType::SourceUser, RuleOperator::Equals, "ALICE"),
            &ctx()
        ));
        assert!(rule_matches(
            &rule(RuleType::SourceOu, RuleOperator::Contains, "ou=admins"),
            &ctx()
        ));
        assert!(rule_matches(
            &rule(RuleType::TargetResource, RuleOperator::StartsWith, "FILE"),
            &ctx()
        ));
        assert!(rule_matches(
            &rule(RuleType::AuthProtocol, RuleOperator::EndsWith, "BEROS"),
            &ctx()
        ));
        assert!(!rule_matches(
            &rule(RuleType::SourceUser, RuleOperator::Equals, "bob"),
            &ctx()
        ));
    }

    #[test]
    fn group_rules_match_any_membership() {
        assert!(rule_matches(
            &rule(
                RuleType::SourceGroup,
                RuleOperator::Equals,
                "s-1-5-21-1111-2222-3333-512"
            ),
            &ctx()
        ));
        assert!(rule_matches(
            &rule(RuleType::SourceGroup, RuleOperator::EndsWith, "-513"),
            &ctx()
        ));
        assert!(!rule_matches(
            &rule(RuleType::SourceGroup, RuleOperator::Equals, "S-1-5-32-544"),
            &ctx()
        ));
    }

    #[test]
    fn cidr_and_literal_ip() {
        assert!(rule_matches(
            &rule(RuleType::SourceIp, RuleOperator::Equals, "10.0.0.0/24"),
            &ctx()
        ));
        assert!(rule_matches(
            &rule(RuleType::SourceIp, RuleOperator::Equals, "10.0.0.7"),
            &ctx()
        ));
        assert!(!rule_matches(
            &rule(RuleType::SourceIp, RuleOperator::Equals, "192.168.0.0/16"),
            &ctx()
        ));
        assert!(rule_matches(
            &rule(RuleType::SourceIp, RuleOperator::StartsWith, "10.0."),
            &ctx()
        ));

        let mut no_ip = ctx();
        no_ip.source_ip = None;
        assert!(!rule_matches(
            &rule(RuleType::SourceIp, RuleOperator::Equals, "10.0.0.0/8"),
            &no_ip
        ));
    }

    #[test]
    fn negate_inverts_including_missing_input() {
        let mut r = rule(RuleType::SourceUser, RuleOperator::Equals, "alice");
        r.negate = true;
        assert!(!rule_matches(&r, &ctx()));

        let mut no_ip = ctx();
        no_ip.source_ip = None;
        let mut r = rule(RuleType::SourceIp, RuleOperator::Equals, "10.0.0.0/8");
        r.negate = true;
        assert!(rule_matches(&r, &no_ip));
    }

    #[test]
    fn regex_rules() {
        assert!(rule_matches(
            &rule(RuleType::SourceUser, RuleOperator::Regex, "^ali.e$"),
            &ctx()
        ));
        // Broken patterns never match instead of erroring the evaluation.
        assert!(!rule_matches(
            &rule(RuleType::SourceUser, RuleOperator::Regex, "(unclosed"),
            &ctx()
        ));
    }

    #[test]
    fn risk_score_never_matches() {
        assert!(!rule_matches(
            &rule(RuleType::RiskScore, RuleOperator::Equals, "90"),
            &ctx()
        ));
    }

    #[test]
    fn time_window_with_wraparound() {
        // Build a context whose local wall-clock we control by picking the
        // window around the current local time.
        let now_local = Utc::now().with_timezone(&Local).time();
        let inside = format!(
            "{:02}:00-{:02}:00",
            now_local.hour(),
            (now_local.hour() + 1) % 24
        );
        assert!(rule_matches(
            &rule(RuleType::TimeWindow, RuleOperator::Equals, &inside),
            &ctx()
        ));

        // A window that wraps midnight and excludes the current hour.
        let excluded_start = (now_local.hour() + 2) % 24;
        let excluded_end = (now_local.hour() + 23) % 24;
        let outside = format!("{excluded_start:02}:00-{excluded_end:02}:00");
        assert!(!rule_matches(
            &rule(RuleType::TimeWindow, RuleOperator::Equals, &outside),
            &ctx()
        ));

        assert!(!rule_matches(
            &rule(RuleType::TimeWindow, RuleOperator::Equals, "25:00-26:00"),
            &ctx()
        ));
    }
}
