// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The broker's database/policy catalog: a JSON document describing every
//! connection the broker is willing to mediate plus the safety policy
//! applied to it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use crate::cfg::enums::{DatabaseTypeTag, ReadOnlyMode};
use crate::validator::profile::{
    ColumnPolicy, ColumnPolicyMode, ConnectionProfile, DatabaseKind, SafeFunctionRule, SafetyPolicy,
    SensitiveColumnRule,
};
use crate::session::token_store::PseudonymizeStrategy;

/// Hard cap on the catalog file's size (spec.md §6).
pub const MAX_CATALOG_BYTES: u64 = 8 * 1024 * 1024;
/// Hard cap on the number of database entries a catalog may declare.
pub const MAX_DATABASES: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCatalog {
    version: String,
    safety_policy: RawSafetyPolicy,
    databases: Vec<RawDatabase>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct RawSafetyPolicy {
    read_only: ReadOnlyMode,
    statement_timeout_ms: u32,
    max_row_returned: u32,
    max_payload_kilo_bytes: u32,
    #[serde(default)]
    column_policy: Option<RawColumnPolicy>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct RawColumnPolicy {
    mode: String,
    strategy: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDatabase {
    #[serde(rename = "type")]
    kind: DatabaseTypeTag,
    connection_name: String,
    host: String,
    port: u16,
    username: String,
    database: String,
    #[serde(default)]
    options: Option<String>,
    #[serde(default)]
    sensitive_columns: Vec<String>,
    #[serde(default)]
    safe_functions: Vec<String>,
    #[serde(default)]
    safety_policy: Option<RawSafetyPolicy>,
}

/// The broker's fully-validated, ready-to-use database catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub version: String,
    profiles: HashMap<String, Arc<ConnectionProfile>>,
}

impl Catalog {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let size = fs::metadata(path)
            .with_context(|| format!("failed to stat catalog file {path:?}"))?
            .len();
        ensure!(
            size <= MAX_CATALOG_BYTES,
            "catalog file {path:?} is {size} bytes, exceeding the {MAX_CATALOG_BYTES} byte cap"
        );
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file {path:?}"))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        ensure!(
            contents.len() as u64 <= MAX_CATALOG_BYTES,
            "catalog document exceeds the {MAX_CATALOG_BYTES} byte cap"
        );
        let raw: RawCatalog =
            serde_json::from_str(contents).context("failed to parse catalog JSON")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawCatalog) -> Result<Self> {
        ensure!(
            raw.databases.len() <= MAX_DATABASES,
            "catalog declares {} databases, exceeding the {MAX_DATABASES} entry cap",
            raw.databases.len()
        );

        let mut profiles = HashMap::with_capacity(raw.databases.len());
        for db in &raw.databases {
            let key = db.connection_name.to_lowercase();
            ensure!(
                !profiles.contains_key(&key),
                "duplicate connectionName '{}' (case-insensitive)",
                db.connection_name
            );

            let safety = build_safety_policy(db.safety_policy.as_ref().unwrap_or(&raw.safety_policy))?;
            let sensitive_columns = db
                .sensitive_columns
                .iter()
                .map(|s| parse_sensitive_column(s))
                .collect::<Result<Vec<_>>>()?;
            let safe_functions = db
                .safe_functions
                .iter()
                .map(|s| parse_safe_function(s))
                .collect::<Result<Vec<_>>>()?;

            let kind = match db.kind {
                DatabaseTypeTag::Postgres => DatabaseKind::Postgres,
            };

            let profile = ConnectionProfile::new(
                db.connection_name.clone(),
                kind,
                db.host.clone(),
                db.port,
                db.username.clone(),
                db.database.clone(),
                db.options.clone(),
                safety,
                sensitive_columns,
                safe_functions,
            );
            profiles.insert(key, Arc::new(profile));
        }

        Ok(Self {
            version: raw.version,
            profiles,
        })
    }

    pub fn get(&self, connection_name: &str) -> Option<Arc<ConnectionProfile>> {
        self.profiles.get(&connection_name.to_lowercase()).cloned()
    }

    /// Iterates over every profile the catalog declares, in no particular
    /// order.
    pub fn profiles(&self) -> impl Iterator<Item = Arc<ConnectionProfile>> + '_ {
        self.profiles.values().cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn build_safety_policy(raw: &RawSafetyPolicy) -> Result<SafetyPolicy> {
    let column_policy = match &raw.column_policy {
        None => None,
        Some(raw_policy) => {
            ensure!(
                raw_policy.mode == "pseudonymize",
                "unsupported columnPolicy.mode '{}'",
                raw_policy.mode
            );
            let strategy = match raw_policy.strategy.as_str() {
                "deterministic" => PseudonymizeStrategy::Deterministic,
                "randomized" => PseudonymizeStrategy::Randomized,
                other => bail!("unsupported columnPolicy.strategy '{other}'"),
            };
            Some(ColumnPolicy {
                mode: ColumnPolicyMode::Pseudonymize,
                strategy,
            })
        }
    };

    Ok(SafetyPolicy {
        read_only: raw.read_only.as_bool(),
        statement_timeout_ms: raw.statement_timeout_ms,
        max_rows: raw.max_row_returned,
        max_payload_bytes: raw.max_payload_kilo_bytes.saturating_mul(1024),
        // Not a catalog key (spec.md §9 open question): the sensitive-mode
        // row cap is a design constant, carried from `SafetyPolicy::default`.
        max_rows_sensitive_mode: SafetyPolicy::default().max_rows_sensitive_mode,
        column_policy,
    })
}

/// Parses a lower-cased `[schema.]table.column` rule. Exactly two dot-
/// separated segments names `table.column`; three or more treats every
/// segment but the last two as the (possibly multi-part) schema.
fn parse_sensitive_column(raw: &str) -> Result<SensitiveColumnRule> {
    let lowered = raw.to_lowercase();
    let parts: Vec<&str> = lowered.split('.').collect();
    match parts.as_slice() {
        [table, column] => Ok(SensitiveColumnRule {
            schema: None,
            table: table.to_string(),
            column: column.to_string(),
        }),
        [schema @ .., table, column] if !schema.is_empty() => Ok(SensitiveColumnRule {
            schema: Some(schema.join(".")),
            table: table.to_string(),
            column: column.to_string(),
        }),
        _ => bail!("malformed sensitive column rule '{raw}', expected [schema.]table.column"),
    }
}

/// Parses a lower-cased `[schema.]name` function rule.
fn parse_safe_function(raw: &str) -> Result<SafeFunctionRule> {
    let lowered = raw.to_lowercase();
    let parts: Vec<&str> = lowered.split('.').collect();
    match parts.as_slice() {
        [name] => Ok(SafeFunctionRule {
            schema: None,
            name: name.to_string(),
        }),
        [schema @ .., name] if !schema.is_empty() => Ok(SafeFunctionRule {
            schema: Some(schema.join(".")),
            name: name.to_string(),
        }),
        _ => bail!("malformed safe function rule '{raw}', expected [schema.]name"),
    }
}
