// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! JSON-RPC 2.0 envelope parsing and response construction for the
//! broker's request/response wire format (spec §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The MCP request id: an unsigned integer or an owned string. Modeled
/// as an explicit variant type rather than a loosely-typed JSON value so
/// every call site exhaustively handles both kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(u64),
    String(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Invalid JSON-RPC request")]
    Invalid,
    /// A well-formed envelope (valid `jsonrpc`, `id`) whose `method` is
    /// not `tools/call`. Carries the request's own `id` so the dispatcher
    /// can echo it rather than responding with `id: null`.
    #[error("unknown method '{method}'")]
    UnknownMethod { id: Id, method: String },
}

/// A decoded, minimally-validated `tools/call` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: Id,
    pub tool_name: String,
    pub arguments: Value,
}

/// Parses and validates the JSON-RPC envelope, returning the decoded
/// `tools/call` request. Malformed JSON, a missing/malformed `id`, a
/// wrong `jsonrpc` version, or a missing `method` is an
/// `EnvelopeError::Invalid` (the envelope itself is unusable, so the
/// caller responds with `id: null`). A well-formed envelope whose
/// `method` is not `tools/call` is `EnvelopeError::UnknownMethod`, which
/// carries the request's own `id` so it can still be echoed.
pub fn parse_tool_call(bytes: &[u8]) -> Result<ToolCallRequest, EnvelopeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| EnvelopeError::Invalid)?;
    let obj = value.as_object().ok_or(EnvelopeError::Invalid)?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(EnvelopeError::Invalid);
    }
    let id = match obj.get("id") {
        Some(Value::Number(n)) => Id::Number(n.as_u64().ok_or(EnvelopeError::Invalid)?),
        Some(Value::String(s)) => Id::String(s.clone()),
        _ => return Err(EnvelopeError::Invalid),
    };
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or(EnvelopeError::Invalid)?;
    if method != "tools/call" {
        return Err(EnvelopeError::UnknownMethod {
            id,
            method: method.to_string(),
        });
    }
    let params = obj.get("params").and_then(Value::as_object).ok_or(EnvelopeError::Invalid)?;
    let tool_name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or(EnvelopeError::Invalid)?
        .to_string();
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    Ok(ToolCallRequest {
        id,
        tool_name,
        arguments,
    })
}

pub fn success_response(id: &Id, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn error_response(id: Option<&Id>, code: i64, message: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}
