//! Policy persistence. Rule groups and actions are stored as JSON columns on
//! the policy row — the engine always loads a policy whole, so there is no
//! value in normalizing them into child tables.

use rusqlite::{params, OptionalExtension, Row};

use mfasrv_domain::model::{FailoverMode, Policy, PolicyAction, RuleGroup};
use mfasrv_domain::{Error, Result};

use crate::{db_err, page_bounds, parse_ts, ts, Store};

const POLICY_COLS: &str =
    "id, name, description, enabled, priority, failover_mode, rule_groups, actions, updated";

fn row_to_policy(row: &Row<'_>) -> rusqlite::Result<RawPolicy> {
    Ok(RawPolicy {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        enabled: row.get(3)?,
        priority: row.get(4)?,
        failover_mode: row.get(5)?,
        rule_groups: row.get(6)?,
        actions: row.get(7)?,
        updated: row.get(8)?,
    })
}

struct RawPolicy {
    id: String,
    name: String,
    description: Option<String>,
    enabled: bool,
    priority: i64,
    failover_mode: String,
    rule_groups: String,
    actions: String,
    updated: String,
}

impl RawPolicy {
    fn into_policy(self) -> Result<Policy> {
        let rule_groups: Vec<RuleGroup> = serde_json::from_str(&self.rule_groups)?;
        let actions: Vec<PolicyAction> = serde_json::from_str(&self.actions)?;
        Ok(Policy {
            id: self.id,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            priority: self.priority,
            failover_mode: FailoverMode::parse(&self.failover_mode)?,
            rule_groups,
            actions,
            updated: parse_ts(&self.updated)?,
        })
    }
}

impl Store {
    pub fn insert_policy(&self, policy: &Policy) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO policies (id, name, description, enabled, priority, failover_mode, \
                                       rule_groups, actions, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    policy.id,
                    policy.name,
                    policy.description,
                    policy.enabled,
                    policy.priority,
                    policy.failover_mode.as_str(),
                    serde_json::to_string(&policy.rule_groups)?,
                    serde_json::to_string(&policy.actions)?,
                    ts(policy.updated),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Full replacement; returns `NotFound` if the id does not exist.
    pub fn update_policy(&self, policy: &Policy) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE policies SET name = ?2, description = ?3, enabled = ?4, \
                     priority = ?5, failover_mode = ?6, rule_groups = ?7, actions = ?8, \
                     updated = ?9 WHERE id = ?1",
                    params![
                        policy.id,
                        policy.name,
                        policy.description,
                        policy.enabled,
                        policy.priority,
                        policy.failover_mode.as_str(),
                        serde_json::to_string(&policy.rule_groups)?,
                        serde_json::to_string(&policy.actions)?,
                        ts(policy.updated),
                    ],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(Error::NotFound(format!("policy {}", policy.id)));
            }
            Ok(())
        })
    }

    pub fn delete_policy(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM policies WHERE id = ?1", [id])
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    pub fn get_policy(&self, id: &str) -> Result<Option<Policy>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {POLICY_COLS} FROM policies WHERE id = ?1"),
                [id],
                row_to_policy,
            )
            .optional()
            .map_err(db_err)?
            .map(RawPolicy::into_policy)
            .transpose()
        })
    }

    /// Toggle and return the refreshed row.
    pub fn set_policy_enabled(
        &self,
        id: &str,
        enabled: bool,
        updated: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Policy>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE policies SET enabled = ?2, updated = ?3 WHERE id = ?1",
                params![id, enabled, ts(updated)],
            )
            .map_err(db_err)?;
            Ok(())
        })?;
        self.get_policy(id)
    }

    pub fn list_policies(&self, page: u64, page_size: u64) -> Result<(u64, Vec<Policy>)> {
        let (limit, offset) = page_bounds(page, page_size);
        self.with_conn(|conn| {
            let total: u64 = conn
                .query_row("SELECT COUNT(*) FROM policies", [], |r| r.get(0))
                .map_err(db_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {POLICY_COLS} FROM policies ORDER BY priority, id LIMIT ?1 OFFSET ?2"
                ))
                .map_err(db_err)?;
            let raws = stmt
                .query_map(params![limit, offset], row_to_policy)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let policies = raws
                .into_iter()
                .map(RawPolicy::into_policy)
                .collect::<Result<_>>()?;
            Ok((total, policies))
        })
    }

    /// Everything the engine evaluates, in evaluation order (priority
    /// ascending, id breaking ties). One statement — SQLite gives the
    /// engine a consistent snapshot of the policy set.
    pub fn load_enabled_policies(&self) -> Result<Vec<Policy>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {POLICY_COLS} FROM policies WHERE enabled = 1 ORDER BY priority, id"
                ))
                .map_err(db_err)?;
            let raws = stmt
                .query_map([], row_to_policy)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            raws.into_iter().map(RawPolicy::into_policy).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mfasrv_domain::model::{ActionType, Rule, RuleOperator, RuleType};

    pub(crate) fn sample_policy(id: &str, priority: i64) -> Policy {
        Policy {
            id: id.into(),
            name: format!("policy-{id}"),
            description: None,
            enabled: true,
            priority,
            failover_mode: FailoverMode::FailOpen,
            rule_groups: vec![RuleGroup {
                id: format!("{id}-g0"),
                policy_id: id.into(),
                order: 0,
                rules: vec![Rule {
                    rule_type: RuleType::SourceUser,
                    operator: RuleOperator::Equals,
                    value: "alice".into(),
                    negate: false,
                }],
            }],
            actions: vec![PolicyAction {
                action_type: ActionType::RequireMfa,
                required_method: None,
            }],
            updated: Utc::now(),
        }
    }

    #[test]
    fn crud_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let mut p = sample_policy("p1", 10);
        store.insert_policy(&p).unwrap();

        let loaded = store.get_policy("p1").unwrap().unwrap();
        assert_eq!(loaded.rule_groups[0].rules[0].value, "alice");

        p.priority = 5;
        store.update_policy(&p).unwrap();
        assert_eq!(store.get_policy("p1").unwrap().unwrap().priority, 5);

        assert!(store.delete_policy("p1").unwrap());
        assert!(!store.delete_policy("p1").unwrap());
        assert!(store.get_policy("p1").unwrap().is_none());
    }

    #[test]
    fn update_missing_policy_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.update_policy(&sample_policy("ghost", 1)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn enabled_load_orders_by_priority_then_id() {
        let store = Store::open_in_memory().unwrap();
        store.insert_policy(&sample_policy("pb", 20)).unwrap();
        store.insert_policy(&sample_policy("pa", 20)).unwrap();
        store.insert_policy(&sample_policy("pc", 10)).unwrap();
        let mut disabled = sample_policy("pd", 1);
        disabled.enabled = false;
        store.insert_policy(&disabled).unwrap();

        let ids: Vec<_> = store
            .load_enabled_policies()
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["pc", "pa", "pb"]);
    }
}
