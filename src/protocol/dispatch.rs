// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request dispatch: decodes one JSON-RPC request per ready session,
//! routes it to a tool, and always produces a response — the dispatcher
//! itself never fails the connection.

use std::collections::HashSet;
use std::time::Instant;

use serde_json::Value;

use super::rpc::{self, EnvelopeError, Id};
use crate::backend::{BackendError, DatabaseBackend, FunctionSafety, QueryResult, ResolveError};
use crate::session::Session;
use crate::validator::profile::{ColumnPolicyMode, ConnectionProfile};
use crate::validator::ir::{Expr, FromSource, Query};
use crate::validator::{self, Rejection};

const ERR_INVALID_ENVELOPE: i64 = -32600;
const ERR_UNKNOWN_TOOL: i64 = -32601;
const ERR_INVALID_ARGUMENTS: i64 = -32602;
const ERR_RESOURCE: i64 = -32001;
const ERR_VALIDATOR: i64 = -32002;
const ERR_BACKEND: i64 = -32003;

/// Handles one request frame end to end and returns the serialized
/// JSON-RPC response bytes. Never panics on untrusted input and never
/// returns an `Err` — every failure path is encoded as a JSON-RPC error
/// response instead.
pub async fn handle_request(
    frame: &[u8],
    session: &mut Session,
    backend: &dyn DatabaseBackend,
) -> Vec<u8> {
    let response = match rpc::parse_tool_call(frame) {
        Ok(request) => route(request, session, backend).await,
        Err(EnvelopeError::Invalid) => {
            rpc::error_response(None, ERR_INVALID_ENVELOPE, "Invalid JSON-RPC request")
        }
        Err(EnvelopeError::UnknownMethod { id, method }) => rpc::error_response(
            Some(&id),
            ERR_UNKNOWN_TOOL,
            &format!("unknown method '{method}'"),
        ),
    };
    serde_json::to_vec(&response).unwrap_or_else(|_| {
        serde_json::to_vec(&rpc::error_response(None, ERR_BACKEND, "Internal error"))
            .expect("a fixed literal object always serializes")
    })
}

async fn route(
    request: rpc::ToolCallRequest,
    session: &mut Session,
    backend: &dyn DatabaseBackend,
) -> Value {
    match request.tool_name.as_str() {
        "run_sql_query" => run_sql_query(&request.id, &request.arguments, session, backend).await,
        other => rpc::error_response(
            Some(&request.id),
            ERR_UNKNOWN_TOOL,
            &format!("unknown tool '{other}'"),
        ),
    }
}

async fn run_sql_query(
    id: &Id,
    arguments: &Value,
    session: &mut Session,
    backend: &dyn DatabaseBackend,
) -> Value {
    let start = Instant::now();

    let Some(connection_name) = arguments.get("connectionName").and_then(Value::as_str) else {
        return rpc::error_response(Some(id), ERR_INVALID_ARGUMENTS, "missing 'connectionName'");
    };
    let Some(sql) = arguments.get("query").and_then(Value::as_str) else {
        return rpc::error_response(Some(id), ERR_INVALID_ARGUMENTS, "missing 'query'");
    };

    let (handle, profile) = match backend.resolve(connection_name).await {
        Ok(resolved) => resolved,
        Err(ResolveError::Unknown | ResolveError::Unreachable) => {
            return rpc::error_response(
                Some(id),
                ERR_RESOURCE,
                "Unable to connect to the requested database.",
            );
        }
    };

    let ir = match backend.make_query_ir(&handle, sql).await {
        Ok(ir) => ir,
        Err(_) => {
            return rpc::error_response(
                Some(id),
                ERR_BACKEND,
                "Something went wrong while communicating with the database",
            );
        }
    };
    let touches = backend.extract_touches(&ir).await;

    // Pre-resolve "is this function globally safe" once per distinct
    // name so the validator itself stays a pure function of its inputs.
    let mut globally_safe = HashSet::new();
    for name in collect_function_names(&ir) {
        match backend.is_function_safe(&handle, &name).await {
            FunctionSafety::Yes => {
                globally_safe.insert(name);
            }
            FunctionSafety::No => {}
            FunctionSafety::Error => {
                return rpc::error_response(
                    Some(id),
                    ERR_BACKEND,
                    "Something went wrong while communicating with the database",
                );
            }
        }
    }

    let outcome = match validator::validate(
        &ir,
        &touches,
        &profile,
        &|name| globally_safe.contains(name),
        profile.vault_open,
    ) {
        Ok(outcome) => outcome,
        Err(Rejection { error, .. }) => {
            return rpc::error_response(Some(id), ERR_VALIDATOR, &error.to_string());
        }
    };

    let mut result = match backend.exec(&handle, &ir, &profile.safety).await {
        Ok(result) => result,
        Err(BackendError::UnparseableQuery | BackendError::ExecFailed | BackendError::ReadOnlyViolation) => {
            return rpc::error_response(
                Some(id),
                ERR_BACKEND,
                "Something went wrong while communicating with the database",
            );
        }
    };

    if outcome.sensitive_mode {
        pseudonymize_sensitive_columns(&mut result, &profile, session, connection_name, &ir);
    }

    result.exec_ms = start.elapsed().as_millis() as u64;
    rpc::success_response(id, query_result_to_json(&result))
}

fn query_result_to_json(result: &QueryResult) -> Value {
    serde_json::json!({
        "exec_ms": result.exec_ms,
        "columns": result.columns.iter().map(|c| serde_json::json!({
            "name": c.name,
            "type": c.type_name,
        })).collect::<Vec<_>>(),
        "rows": result.rows,
        "rowcount": result.rowcount,
        "truncated": result.truncated,
    })
}

fn collect_function_names(query: &Query) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_from_query(query, &mut names);
    names
}

fn collect_from_query(query: &Query, names: &mut HashSet<String>) {
    for item in &query.from {
        if let FromSource::SubQuery(sub) = &item.source {
            collect_from_query(sub, names);
        }
    }
    for join in &query.joins {
        if let FromSource::SubQuery(sub) = &join.rhs.source {
            collect_from_query(sub, names);
        }
        collect_from_expr(&join.on, names);
    }
    for item in &query.select {
        collect_from_expr(&item.expr, names);
    }
    if let Some(w) = &query.where_clause {
        collect_from_expr(w, names);
    }
    for e in &query.group_by {
        collect_from_expr(e, names);
    }
    if let Some(h) = &query.having {
        collect_from_expr(h, names);
    }
    for e in &query.order_by {
        collect_from_expr(e, names);
    }
    for cte in &query.ctes {
        collect_from_query(&cte.query, names);
    }
}

fn collect_from_expr(expr: &Expr, names: &mut HashSet<String>) {
    match expr {
        Expr::Column(_) | Expr::Parameter(_) | Expr::Literal(_) | Expr::Unsupported => {}
        Expr::FunctionCall(fc) => {
            names.insert(fc.qualified_name());
            for arg in &fc.args {
                collect_from_expr(arg, names);
            }
        }
        Expr::Cast(inner, _) => collect_from_expr(inner, names),
        Expr::Comparison { lhs, rhs, .. } => {
            collect_from_expr(lhs, names);
            collect_from_expr(rhs, names);
        }
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            collect_from_expr(lhs, names);
            collect_from_expr(rhs, names);
        }
        Expr::Not(inner) => collect_from_expr(inner, names),
        Expr::In { lhs, items } => {
            collect_from_expr(lhs, names);
            for item in items {
                collect_from_expr(item, names);
            }
        }
        Expr::Case {
            operand,
            whens,
            else_,
        } => {
            if let Some(o) = operand {
                collect_from_expr(o, names);
            }
            for (w, t) in whens {
                collect_from_expr(w, names);
                collect_from_expr(t, names);
            }
            if let Some(e) = else_ {
                collect_from_expr(e, names);
            }
        }
        Expr::Window {
            func,
            partition_by,
            order_by,
        } => {
            names.insert(func.qualified_name());
            for arg in &func.args {
                collect_from_expr(arg, names);
            }
            for e in partition_by {
                collect_from_expr(e, names);
            }
            for e in order_by {
                collect_from_expr(e, names);
            }
        }
        Expr::SubQuery(sub) => collect_from_query(sub, names),
    }
}

/// Replaces sensitive-column values in `result`'s rows with per-session
/// pseudonyms, matching output columns by bare name against the
/// profile's sensitive-column rules (schema/table qualification is not
/// recoverable from a result set's column list alone).
fn pseudonymize_sensitive_columns(
    result: &mut QueryResult,
    profile: &ConnectionProfile,
    session: &mut Session,
    connection_name: &str,
    ir: &Query,
) {
    let Some(policy) = profile.safety.column_policy else {
        return;
    };
    if policy.mode != ColumnPolicyMode::Pseudonymize {
        return;
    }
    let sensitive_indices: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .filter(|(_, col)| is_sensitive_in_select(ir, profile, &col.name))
        .map(|(i, _)| i)
        .collect();
    if sensitive_indices.is_empty() {
        return;
    }

    // Split borrow: `token_stores` and `arena` are disjoint fields, so
    // both can be borrowed mutably at once even though `get_or_assign`
    // needs the arena while the store itself is held across the loop.
    let store = session
        .token_stores
        .entry(connection_name.to_string())
        .or_default();
    for row in &mut result.rows {
        for &idx in &sensitive_indices {
            let Some(value) = row[idx].clone() else {
                continue;
            };
            let column_name = result.columns[idx].name.clone();
            if let Ok(token) =
                store.get_or_assign(&mut session.arena, policy.strategy, connection_name, &column_name, &value)
            {
                row[idx] = Some(token);
            }
        }
    }
}

fn is_sensitive_in_select(query: &Query, profile: &ConnectionProfile, column_name: &str) -> bool {
    for item in &query.select {
        if let Expr::Column(col) = &item.expr {
            if col.name == column_name {
                if let Some(qualifier) = &col.qualifier {
                    if let Some(table) = base_table_for_alias(query, qualifier) {
                        if profile.is_sensitive_column(None, &table, column_name) {
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

fn base_table_for_alias(query: &Query, alias: &str) -> Option<String> {
    for item in &query.from {
        if item.alias.as_deref() == Some(alias) {
            if let FromSource::BaseRelation { name, .. } = &item.source {
                return Some(name.clone());
            }
        }
    }
    for join in &query.joins {
        if join.rhs.alias.as_deref() == Some(alias) {
            if let FromSource::BaseRelation { name, .. } = &join.rhs.source {
                return Some(name.clone());
            }
        }
    }
    None
}
