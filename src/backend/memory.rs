// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An in-memory stand-in for a real PostgreSQL driver. Used only by this
//! crate's own test suite: a real backend is explicitly out of scope
//! (spec.md §1). There is no SQL parser here either — callers register a
//! fixture mapping exact query text to a pre-built IR, mirroring how a
//! real backend would hand the broker an IR it built from its own parser.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{BackendError, BackendHandle, Column, DatabaseBackend, FunctionSafety, QueryResult, ResolveError};
use crate::validator::ir::{Expr, FromSource, Literal, Query};
use crate::validator::profile::{ConnectionProfile, SafetyPolicy};

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    profiles: HashMap<String, Arc<ConnectionProfile>>,
    fixtures: HashMap<(String, String), Query>,
    tables: HashMap<(String, String), Vec<Vec<(String, Option<String>)>>>,
    globally_safe_functions: Vec<String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            globally_safe_functions: vec!["lower".to_string(), "upper".to_string(), "now".to_string()],
            ..Default::default()
        }
    }

    pub fn register_profile(&mut self, profile: Arc<ConnectionProfile>) {
        self.profiles.insert(profile.name.to_lowercase(), profile);
    }

    /// Registers the IR a real parser would have produced for `sql` on
    /// `connection`. `make_query_ir` looks up queries by exact text match.
    pub fn register_fixture(&mut self, connection: &str, sql: &str, query: Query) {
        self.fixtures
            .insert((connection.to_lowercase(), sql.to_string()), query);
    }

    pub fn seed_rows(&mut self, connection: &str, table: &str, rows: Vec<Vec<(String, Option<String>)>>) {
        self.tables
            .insert((connection.to_lowercase(), table.to_string()), rows);
    }
}

fn base_table_name(ir: &Query) -> Option<&str> {
    ir.from.first().and_then(|item| match &item.source {
        FromSource::BaseRelation { name, .. } => Some(name.as_str()),
        FromSource::SubQuery(_) => None,
    })
}

fn literal_limit(ir: &Query) -> Option<usize> {
    match ir.limit.as_ref()? {
        Expr::Literal(Literal::Int(n)) if *n >= 0 => Some(*n as usize),
        _ => None,
    }
}

#[async_trait]
impl DatabaseBackend for InMemoryBackend {
    async fn resolve(
        &self,
        connection_name: &str,
    ) -> Result<(BackendHandle, Arc<ConnectionProfile>), ResolveError> {
        let profile = self
            .profiles
            .get(&connection_name.to_lowercase())
            .cloned()
            .ok_or(ResolveError::Unknown)?;
        Ok((BackendHandle(Arc::from(connection_name)), profile))
    }

    async fn is_function_safe(&self, _handle: &BackendHandle, qualified_name: &str) -> FunctionSafety {
        if self
            .globally_safe_functions
            .iter()
            .any(|f| f == qualified_name)
        {
            FunctionSafety::Yes
        } else {
            FunctionSafety::No
        }
    }

    async fn make_query_ir(&self, handle: &BackendHandle, sql: &str) -> Result<Query, BackendError> {
        self.fixtures
            .get(&(handle.0.to_lowercase(), sql.to_string()))
            .cloned()
            .ok_or(BackendError::UnparseableQuery)
    }

    async fn exec(
        &self,
        handle: &BackendHandle,
        ir: &Query,
        policy: &SafetyPolicy,
    ) -> Result<QueryResult, BackendError> {
        let table = base_table_name(ir).ok_or(BackendError::UnparseableQuery)?;
        let rows = self
            .tables
            .get(&(handle.0.to_lowercase(), table.to_string()))
            .cloned()
            .unwrap_or_default();

        let column_names: Vec<String> = ir
            .select
            .iter()
            .filter_map(|item| match &item.expr {
                Expr::Column(c) => Some(c.name.clone()),
                _ => None,
            })
            .collect();
        if column_names.is_empty() {
            return Err(BackendError::UnparseableQuery);
        }

        let mut projected: Vec<Vec<Option<String>>> = rows
            .iter()
            .map(|row| {
                column_names
                    .iter()
                    .map(|name| {
                        row.iter()
                            .find(|(col_name, _)| col_name == name)
                            .and_then(|(_, value)| value.clone())
                    })
                    .collect()
            })
            .collect();

        // No separate bound-parameters array reaches this stub (the
        // tool-call arguments carry only `connectionName`/`query`), so a
        // query whose IR still contains a `Parameter` node is executed
        // unfiltered rather than matched against a real bound value.
        let cap = literal_limit(ir)
            .map(|l| l.min(policy.max_rows as usize))
            .unwrap_or(policy.max_rows as usize);
        let truncated = projected.len() > cap;
        projected.truncate(cap);

        let columns = column_names
            .into_iter()
            .map(|name| Column {
                name,
                type_name: "text".to_string(),
            })
            .collect();
        let rowcount = projected.len() as u32;

        Ok(QueryResult {
            columns,
            rows: projected,
            rowcount,
            truncated,
            exec_ms: 0,
        })
    }
}
