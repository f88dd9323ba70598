//! redb table definitions for the ModelGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Model versions keyed by `{model}/{version}`.
pub const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");

/// Deployments keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// A/B tests keyed by test id.
pub const AB_TESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("ab_tests");

/// Breach start times keyed by `{model}/{version}/{metric}`.
pub const BREACHES: TableDefinition<&str, &[u8]> = TableDefinition::new("breaches");

/// Per-model threshold overrides keyed by model name.
pub const THRESHOLDS: TableDefinition<&str, &[u8]> = TableDefinition::new("thresholds");

/// Update tasks keyed by update id.
pub const UPDATES: TableDefinition<&str, &[u8]> = TableDefinition::new("updates");

/// Update schedules keyed by schedule id.
pub const SCHEDULES: TableDefinition<&str, &[u8]> = TableDefinition::new("schedules");

/// Record tables exposed to other crates through the generic record API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Deployments,
    AbTests,
    Breaches,
    Thresholds,
    Updates,
    Schedules,
}

impl Table {
    pub(crate) fn definition(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Table::Deployments => DEPLOYMENTS,
            Table::AbTests => AB_TESTS,
            Table::Breaches => BREACHES,
            Table::Thresholds => THRESHOLDS,
            Table::Updates => UPDATES,
            Table::Schedules => SCHEDULES,
        }
    }
}
