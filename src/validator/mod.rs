// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The two-pass SQL safety validator: touch analysis decides whether a
//! query is in sensitive mode, Pass A runs unconditionally, Pass B runs
//! only in sensitive mode.

pub mod error;
pub mod ir;
pub mod pass_a;
pub mod pass_b;
pub mod profile;
pub mod touches;

use error::ValidatorError;
use ir::Query;
use profile::ConnectionProfile;
use touches::{Scope, TouchKind, TouchReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub sensitive_mode: bool,
}

/// Mirrors the source's `StateMachine`/`Transition` shape: the validator
/// always moves forward through the same four states and never repeats
/// one, so a plain function expresses it more directly than a trait
/// object would — but the states are still named so logs and tests can
/// refer to where in the pipeline a rejection happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Touches,
    PassA,
    PassB,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub stage: Stage,
    pub error: ValidatorError,
}

/// Runs the full validator pipeline against `query`, whose touch report
/// has already been computed by `touches::analyze` (or supplied directly
/// by a backend-produced IR).
///
/// `is_globally_safe` answers whether a fully-qualified function name is
/// safe across every connection, independent of this connection's own
/// allow-list; the dispatcher resolves this (consulting the backend,
/// which may itself be async) before calling in, so this function stays
/// a pure computation over its arguments.
pub fn validate(
    query: &Query,
    report: &TouchReport,
    profile: &ConnectionProfile,
    is_globally_safe: &dyn Fn(&str) -> bool,
    vault_open: bool,
) -> Result<ValidationOutcome, Rejection> {
    if report.has_unresolved_or_unsupported() {
        return Err(Rejection {
            stage: Stage::Touches,
            error: ValidatorError::UnknownColumnReference,
        });
    }

    for touch in &report.touches {
        if touch.scope != Scope::Nested {
            continue;
        }
        if let TouchKind::BaseRelation {
            schema,
            table,
            column,
        } = &touch.kind
        {
            if profile.is_sensitive_column(schema.as_deref(), table, column) {
                return Err(Rejection {
                    stage: Stage::Touches,
                    error: ValidatorError::SensitiveTouchOutOfScope,
                });
            }
        }
    }

    let sensitive_mode = report.touches.iter().any(|t| {
        matches!(
            &t.kind,
            TouchKind::BaseRelation { schema, table, column }
                if profile.is_sensitive_column(schema.as_deref(), table, column)
        )
    });

    if sensitive_mode && !vault_open {
        return Err(Rejection {
            stage: Stage::Touches,
            error: ValidatorError::VaultClosed,
        });
    }

    pass_a::validate_query(query, profile, is_globally_safe).map_err(|error| Rejection {
        stage: Stage::PassA,
        error,
    })?;

    if sensitive_mode {
        pass_b::validate_query(query, profile).map_err(|error| Rejection {
            stage: Stage::PassB,
            error,
        })?;
    }

    Ok(ValidationOutcome { sensitive_mode })
}
