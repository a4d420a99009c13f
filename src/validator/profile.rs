// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection profiles: the per-database catalog entry the validator and
//! dispatcher consult for safety policy, sensitive-column rules, and the
//! safe-function allow-list.

use crate::session::token_store::PseudonymizeStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnPolicyMode {
    Pseudonymize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnPolicy {
    pub mode: ColumnPolicyMode,
    pub strategy: PseudonymizeStrategy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyPolicy {
    pub read_only: bool,
    pub statement_timeout_ms: u32,
    pub max_rows: u32,
    pub max_payload_bytes: u32,
    /// Row cap enforced on top of `max_rows` once a query is in sensitive
    /// mode (open question 2, resolved in DESIGN.md).
    pub max_rows_sensitive_mode: u32,
    pub column_policy: Option<ColumnPolicy>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            read_only: true,
            statement_timeout_ms: 5_000,
            max_rows: 1_000,
            max_rows_sensitive_mode: 200,
            max_payload_bytes: 4 * 1024 * 1024,
            column_policy: None,
        }
    }
}

/// A fully-qualified `[schema.]table.column` rule, stored pre-rendered so
/// lookups are a single string comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SensitiveColumnRule {
    pub schema: Option<String>,
    pub table: String,
    pub column: String,
}

impl SensitiveColumnRule {
    fn key(schema: Option<&str>, table: &str, column: &str) -> String {
        match schema {
            Some(schema) => format!("{schema}.{table}.{column}"),
            None => format!("{table}.{column}"),
        }
    }

    fn rendered(&self) -> String {
        Self::key(self.schema.as_deref(), &self.table, &self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SafeFunctionRule {
    pub schema: Option<String>,
    pub name: String,
}

impl SafeFunctionRule {
    fn key(schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!("{schema}.{name}"),
            None => name.to_string(),
        }
    }

    fn rendered(&self) -> String {
        Self::key(self.schema.as_deref(), &self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionProfile {
    pub name: String,
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub options: Option<String>,
    pub safety: SafetyPolicy,
    /// Whether this connection's encryption vault is open. Spec §4.6
    /// references a profile's vault state without defining where it comes
    /// from; the catalog schema names no such key, so this is not loaded
    /// from the catalog file and instead defaults open, settable only
    /// programmatically (e.g. by a future secrets-vault integration).
    pub vault_open: bool,
    /// Sorted by rendered key; built by `normalize`.
    sensitive_columns: Vec<SensitiveColumnRule>,
    /// Sorted by rendered key; built by `normalize`.
    safe_functions: Vec<SafeFunctionRule>,
}

impl ConnectionProfile {
    pub fn new(
        name: String,
        kind: DatabaseKind,
        host: String,
        port: u16,
        user: String,
        database: String,
        options: Option<String>,
        safety: SafetyPolicy,
        mut sensitive_columns: Vec<SensitiveColumnRule>,
        mut safe_functions: Vec<SafeFunctionRule>,
    ) -> Self {
        sensitive_columns.sort_by_key(|r| r.rendered());
        sensitive_columns.dedup_by_key(|r| r.rendered());
        safe_functions.sort_by_key(|r| r.rendered());
        safe_functions.dedup_by_key(|r| r.rendered());
        Self {
            name,
            kind,
            host,
            port,
            user,
            database,
            options,
            safety,
            vault_open: true,
            sensitive_columns,
            safe_functions,
        }
    }

    pub fn is_sensitive_column(&self, schema: Option<&str>, table: &str, column: &str) -> bool {
        let key = SensitiveColumnRule::key(schema, table, column);
        self.sensitive_columns
            .binary_search_by_key(&key, |r| r.rendered())
            .is_ok()
    }

    pub fn is_allow_listed_function(&self, schema: Option<&str>, name: &str) -> bool {
        let key = SafeFunctionRule::key(schema, name);
        self.safe_functions
            .binary_search_by_key(&key, |r| r.rendered())
            .is_ok()
    }
}
