// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The narrow database-backend interface the broker dispatches through,
//! plus an in-memory implementation used by the test suite in place of a
//! real PostgreSQL driver (out of scope, spec.md §1).

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::validator::ir::Query;
use crate::validator::profile::{ConnectionProfile, SafetyPolicy};
use crate::validator::touches::TouchReport;

/// Opaque handle identifying a resolved connection to the backend; the
/// broker never inspects its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHandle(pub Arc<str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown connection")]
    Unknown,
    #[error("backend unreachable")]
    Unreachable,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("the query could not be parsed into an IR the validator understands")]
    UnparseableQuery,
    #[error("execution failed")]
    ExecFailed,
    #[error("this connection is read-only and the statement is not a read")]
    ReadOnlyViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionSafety {
    Yes,
    No,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
    pub rowcount: u32,
    pub truncated: bool,
    pub exec_ms: u64,
}

/// The database-backend seam. A real implementation wraps a pooled
/// PostgreSQL driver; this crate ships only `memory::InMemoryBackend`.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn resolve(
        &self,
        connection_name: &str,
    ) -> Result<(BackendHandle, Arc<ConnectionProfile>), ResolveError>;

    async fn is_function_safe(&self, handle: &BackendHandle, qualified_name: &str) -> FunctionSafety;

    async fn make_query_ir(&self, handle: &BackendHandle, sql: &str) -> Result<Query, BackendError>;

    async fn extract_touches(&self, ir: &Query) -> TouchReport {
        crate::validator::touches::analyze(ir)
    }

    async fn exec(
        &self,
        handle: &BackendHandle,
        ir: &Query,
        policy: &SafetyPolicy,
    ) -> Result<QueryResult, BackendError>;
}
