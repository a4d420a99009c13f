// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// One variant per rejection reason; the message text matches what the
/// dispatcher surfaces verbatim to the front-end as a tool error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidatorError {
    #[error("unknown column reference")]
    UnknownColumnReference,
    #[error("unsupported query structure")]
    UnsupportedQueryStructure,
    #[error("sensitive columns may not be referenced inside CTEs or sub-queries")]
    SensitiveTouchOutOfScope,
    #[error("the vault is closed for this connection")]
    VaultClosed,
    #[error("SELECT * is not allowed")]
    StarNotAllowed,
    #[error("every table and join must have an alias")]
    MissingAlias,
    #[error("function '{0}' is not allowed")]
    FunctionNotAllowed(String),
    #[error("parameters are only allowed inside WHERE comparisons against a sensitive column")]
    ParameterMisplaced,
    #[error("DISTINCT is not allowed in sensitive mode")]
    DistinctNotAllowed,
    #[error("OFFSET is not allowed in sensitive mode")]
    OffsetNotAllowed,
    #[error("LIMIT is required in sensitive mode")]
    LimitRequired,
    #[error("LIMIT exceeds the maximum allowed rows in sensitive mode")]
    LimitExceeded,
    #[error("joins must be INNER with a simple equality predicate in sensitive mode")]
    UnsupportedJoinShape,
    #[error("unsupported WHERE predicate in sensitive mode")]
    UnsupportedWherePredicate,
    #[error("sensitive columns must compare only to parameters")]
    SensitiveComparisonShape,
    #[error("OR and NOT are not allowed in WHERE in sensitive mode")]
    LogicalNotAllowed,
    #[error("sensitive columns in SELECT must be direct column references")]
    SensitiveSelectShape,
    #[error("sensitive columns may not appear in GROUP BY, HAVING, or ORDER BY")]
    SensitiveColumnMisuse,
}
