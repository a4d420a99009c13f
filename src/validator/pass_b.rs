// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pass B: extra structural restrictions applied only once a query has
//! been placed in sensitive mode by touch analysis.

use super::error::ValidatorError;
use super::ir::{CompareOp, Expr, FromItem, FromSource, JoinKind, Literal, Query};
use super::profile::ConnectionProfile;

#[derive(Debug, Clone)]
struct AliasBinding {
    schema: Option<String>,
    table: String,
}

type AliasMap = Vec<(String, Option<AliasBinding>)>;

fn build_alias_map(query: &Query) -> AliasMap {
    let mut map = Vec::new();
    let mut push = |item: &FromItem, map: &mut AliasMap| {
        let binding = match &item.source {
            FromSource::BaseRelation { schema, name } => Some(AliasBinding {
                schema: schema.clone(),
                table: name.clone(),
            }),
            FromSource::SubQuery(_) => None,
        };
        if let Some(alias) = item.alias.clone() {
            map.push((alias, binding));
        }
    };
    for item in &query.from {
        push(item, &mut map);
    }
    for join in &query.joins {
        push(&join.rhs, &mut map);
    }
    map
}

fn is_column_sensitive(
    col: &super::ir::ColumnRef,
    aliases: &AliasMap,
    profile: &ConnectionProfile,
) -> bool {
    let Some(qualifier) = &col.qualifier else {
        return false;
    };
    let Some(Some(binding)) = aliases.iter().find(|(a, _)| a == qualifier).map(|(_, b)| b)
    else {
        return false;
    };
    profile.is_sensitive_column(binding.schema.as_deref(), &binding.table, &col.name)
}

fn expr_contains_sensitive_column(
    expr: &Expr,
    aliases: &AliasMap,
    profile: &ConnectionProfile,
) -> bool {
    match expr {
        Expr::Column(col) => is_column_sensitive(col, aliases, profile),
        Expr::Parameter(_) | Expr::Literal(_) | Expr::SubQuery(_) | Expr::Unsupported => false,
        Expr::FunctionCall(fc) => fc
            .args
            .iter()
            .any(|a| expr_contains_sensitive_column(a, aliases, profile)),
        Expr::Cast(inner, _) => expr_contains_sensitive_column(inner, aliases, profile),
        Expr::Comparison { lhs, rhs, .. } => {
            expr_contains_sensitive_column(lhs, aliases, profile)
                || expr_contains_sensitive_column(rhs, aliases, profile)
        }
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            expr_contains_sensitive_column(lhs, aliases, profile)
                || expr_contains_sensitive_column(rhs, aliases, profile)
        }
        Expr::Not(inner) => expr_contains_sensitive_column(inner, aliases, profile),
        Expr::In { lhs, items } => {
            expr_contains_sensitive_column(lhs, aliases, profile)
                || items
                    .iter()
                    .any(|i| expr_contains_sensitive_column(i, aliases, profile))
        }
        Expr::Case {
            operand,
            whens,
            else_,
        } => {
            operand
                .as_ref()
                .is_some_and(|o| expr_contains_sensitive_column(o, aliases, profile))
                || whens.iter().any(|(w, t)| {
                    expr_contains_sensitive_column(w, aliases, profile)
                        || expr_contains_sensitive_column(t, aliases, profile)
                })
                || else_
                    .as_ref()
                    .is_some_and(|e| expr_contains_sensitive_column(e, aliases, profile))
        }
        Expr::Window {
            func,
            partition_by,
            order_by,
        } => {
            func.args
                .iter()
                .any(|a| expr_contains_sensitive_column(a, aliases, profile))
                || partition_by
                    .iter()
                    .any(|e| expr_contains_sensitive_column(e, aliases, profile))
                || order_by
                    .iter()
                    .any(|e| expr_contains_sensitive_column(e, aliases, profile))
        }
    }
}

/// Splits a WHERE/ON expression into its top-level AND-conjuncts.
/// Any top-level OR or NOT is surfaced to the caller as `None` so it can
/// be rejected distinctly from "not a conjunction at all".
fn split_conjuncts(expr: &Expr) -> Result<Vec<&Expr>, ValidatorError> {
    match expr {
        Expr::And(lhs, rhs) => {
            let mut left = split_conjuncts(lhs)?;
            left.extend(split_conjuncts(rhs)?);
            Ok(left)
        }
        Expr::Or(_, _) | Expr::Not(_) => Err(ValidatorError::LogicalNotAllowed),
        other => Ok(vec![other]),
    }
}

fn check_limit(query: &Query, profile: &ConnectionProfile) -> Result<(), ValidatorError> {
    match &query.limit {
        None => Err(ValidatorError::LimitRequired),
        Some(Expr::Literal(Literal::Int(n))) => {
            if *n < 0 || *n as u64 > profile.safety.max_rows_sensitive_mode as u64 {
                Err(ValidatorError::LimitExceeded)
            } else {
                Ok(())
            }
        }
        // Anything we can't statically bound (a parameter, an
        // expression) is treated as exceeding the cap: it could be.
        Some(_) => Err(ValidatorError::LimitExceeded),
    }
}

fn check_join_shape(
    join: &super::ir::Join,
    aliases: &AliasMap,
    profile: &ConnectionProfile,
) -> Result<(), ValidatorError> {
    if join.kind != JoinKind::Inner {
        return Err(ValidatorError::UnsupportedJoinShape);
    }
    let predicates = split_conjuncts(&join.on).map_err(|_| ValidatorError::UnsupportedJoinShape)?;
    for predicate in predicates {
        match predicate {
            Expr::Comparison {
                op: CompareOp::Eq,
                lhs,
                rhs,
            } => {
                let simple = |e: &Expr| {
                    matches!(e, Expr::Column(_) | Expr::Parameter(_) | Expr::Literal(_))
                };
                if !simple(lhs) || !simple(rhs) {
                    return Err(ValidatorError::UnsupportedJoinShape);
                }
                if expr_contains_sensitive_column(lhs, aliases, profile)
                    || expr_contains_sensitive_column(rhs, aliases, profile)
                {
                    return Err(ValidatorError::UnsupportedJoinShape);
                }
            }
            _ => return Err(ValidatorError::UnsupportedJoinShape),
        }
    }
    Ok(())
}

fn check_where_predicate(
    predicate: &Expr,
    aliases: &AliasMap,
    profile: &ConnectionProfile,
) -> Result<(), ValidatorError> {
    match predicate {
        Expr::Comparison {
            op: CompareOp::Eq,
            lhs,
            rhs,
        } => {
            let lhs_sensitive_col = matches!(lhs.as_ref(), Expr::Column(c) if is_column_sensitive(c, aliases, profile));
            let rhs_sensitive_col = matches!(rhs.as_ref(), Expr::Column(c) if is_column_sensitive(c, aliases, profile));
            if lhs_sensitive_col || rhs_sensitive_col {
                let other = if lhs_sensitive_col { rhs } else { lhs };
                if matches!(other.as_ref(), Expr::Parameter(_)) {
                    return Ok(());
                }
                return Err(ValidatorError::SensitiveComparisonShape);
            }
            let lhs_plain_col = matches!(lhs.as_ref(), Expr::Column(_));
            let rhs_plain_col = matches!(rhs.as_ref(), Expr::Column(_));
            if lhs_plain_col && rhs_plain_col {
                return Ok(());
            }
            // non-sensitive column compared against a literal is also a
            // perfectly ordinary filter predicate.
            if (lhs_plain_col && matches!(rhs.as_ref(), Expr::Literal(_)))
                || (rhs_plain_col && matches!(lhs.as_ref(), Expr::Literal(_)))
            {
                return Ok(());
            }
            Err(ValidatorError::UnsupportedWherePredicate)
        }
        Expr::In { lhs, items } => {
            let lhs_sensitive = matches!(lhs.as_ref(), Expr::Column(c) if is_column_sensitive(c, aliases, profile));
            if !lhs_sensitive {
                return Err(ValidatorError::UnsupportedWherePredicate);
            }
            if items.iter().all(|i| matches!(i, Expr::Parameter(_))) {
                Ok(())
            } else {
                Err(ValidatorError::SensitiveComparisonShape)
            }
        }
        Expr::SubQuery(sub) => validate_query(sub, profile),
        _ => Err(ValidatorError::UnsupportedWherePredicate),
    }
}

/// Runs Pass B over `query` (and, recursively, every CTE body and
/// sub-query). Only called once touch analysis has already established
/// the overall query is in sensitive mode.
pub fn validate_query(query: &Query, profile: &ConnectionProfile) -> Result<(), ValidatorError> {
    if query.has_star() {
        return Err(ValidatorError::StarNotAllowed);
    }
    if query.distinct {
        return Err(ValidatorError::DistinctNotAllowed);
    }
    if query.offset.is_some() {
        return Err(ValidatorError::OffsetNotAllowed);
    }
    check_limit(query, profile)?;

    let aliases = build_alias_map(query);

    for item in &query.from {
        if let FromSource::SubQuery(sub) = &item.source {
            validate_query(sub, profile)?;
        }
    }
    for join in &query.joins {
        check_join_shape(join, &aliases, profile)?;
        if let FromSource::SubQuery(sub) = &join.rhs.source {
            validate_query(sub, profile)?;
        }
    }

    match &query.where_clause {
        None => return Err(ValidatorError::UnsupportedWherePredicate),
        Some(where_expr) => {
            let predicates = split_conjuncts(where_expr)?;
            for predicate in predicates {
                check_where_predicate(predicate, &aliases, profile)?;
            }
        }
    }

    for item in &query.select {
        if item.is_star {
            return Err(ValidatorError::StarNotAllowed);
        }
        let is_direct_column = matches!(item.expr, Expr::Column(_));
        if !is_direct_column && expr_contains_sensitive_column(&item.expr, &aliases, profile) {
            return Err(ValidatorError::SensitiveSelectShape);
        }
    }

    for expr in query
        .group_by
        .iter()
        .chain(query.having.iter())
        .chain(query.order_by.iter())
    {
        if expr_contains_sensitive_column(expr, &aliases, profile) {
            return Err(ValidatorError::SensitiveColumnMisuse);
        }
    }

    for cte in &query.ctes {
        validate_query(&cte.query, profile)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ir::{FromItem, FromSource, Join, JoinKind, SelectItem};
    use crate::validator::profile::{
        ConnectionProfile, DatabaseKind, SafetyPolicy, SensitiveColumnRule,
    };

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(
            "primary".to_string(),
            DatabaseKind::Postgres,
            "localhost".to_string(),
            5432,
            "app".to_string(),
            "appdb".to_string(),
            None,
            SafetyPolicy::default(),
            vec![SensitiveColumnRule {
                schema: None,
                table: "users".to_string(),
                column: "email".to_string(),
            }],
            vec![],
        )
    }

    fn happy_path_query() -> Query {
        Query {
            select: vec![SelectItem {
                expr: Expr::column("u", "email"),
                is_star: false,
                alias: None,
            }],
            from: vec![FromItem {
                alias: Some("u".to_string()),
                source: FromSource::BaseRelation {
                    schema: None,
                    name: "users".to_string(),
                },
            }],
            joins: vec![],
            where_clause: Some(Expr::eq(Expr::column("u", "email"), Expr::Parameter(1))),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: Some(Expr::int_literal(10)),
            offset: None,
            distinct: false,
            ctes: vec![],
        }
    }

    #[test]
    fn happy_path_passes() {
        assert!(validate_query(&happy_path_query(), &profile()).is_ok());
    }

    #[test]
    fn missing_limit_is_rejected() {
        let mut q = happy_path_query();
        q.limit = None;
        assert_eq!(
            validate_query(&q, &profile()).unwrap_err(),
            ValidatorError::LimitRequired
        );
    }

    #[test]
    fn limit_over_cap_is_rejected() {
        let mut q = happy_path_query();
        q.limit = Some(Expr::int_literal(201));
        assert_eq!(
            validate_query(&q, &profile()).unwrap_err(),
            ValidatorError::LimitExceeded
        );
    }

    #[test]
    fn distinct_is_rejected() {
        let mut q = happy_path_query();
        q.distinct = true;
        assert_eq!(
            validate_query(&q, &profile()).unwrap_err(),
            ValidatorError::DistinctNotAllowed
        );
    }

    #[test]
    fn offset_is_rejected() {
        let mut q = happy_path_query();
        q.offset = Some(Expr::int_literal(5));
        assert_eq!(
            validate_query(&q, &profile()).unwrap_err(),
            ValidatorError::OffsetNotAllowed
        );
    }

    #[test]
    fn sensitive_column_compared_with_like_is_rejected() {
        let mut q = happy_path_query();
        q.where_clause = Some(Expr::Comparison {
            op: CompareOp::Like,
            lhs: Box::new(Expr::column("u", "email")),
            rhs: Box::new(Expr::Parameter(1)),
        });
        let err = validate_query(&q, &profile()).unwrap_err();
        assert_eq!(err, ValidatorError::UnsupportedWherePredicate);
    }

    #[test]
    fn sensitive_column_compared_to_literal_is_rejected() {
        let mut q = happy_path_query();
        q.where_clause = Some(Expr::eq(
            Expr::column("u", "email"),
            Expr::str_literal("alice@example.com"),
        ));
        let err = validate_query(&q, &profile()).unwrap_err();
        assert_eq!(err, ValidatorError::SensitiveComparisonShape);
    }

    #[test]
    fn sensitive_column_in_select_must_be_direct_reference() {
        let mut q = happy_path_query();
        q.select[0].expr = Expr::Cast(Box::new(Expr::column("u", "email")), "text".to_string());
        let err = validate_query(&q, &profile()).unwrap_err();
        assert_eq!(err, ValidatorError::SensitiveSelectShape);
    }

    #[test]
    fn sensitive_column_in_order_by_is_rejected() {
        let mut q = happy_path_query();
        q.order_by = vec![Expr::column("u", "email")];
        let err = validate_query(&q, &profile()).unwrap_err();
        assert_eq!(err, ValidatorError::SensitiveColumnMisuse);
    }

    #[test]
    fn non_inner_join_is_rejected() {
        let mut q = happy_path_query();
        q.joins = vec![Join {
            kind: JoinKind::Other,
            rhs: FromItem {
                alias: Some("o".to_string()),
                source: FromSource::BaseRelation {
                    schema: None,
                    name: "orders".to_string(),
                },
            },
            on: Expr::eq(Expr::column("u", "id"), Expr::column("o", "user_id")),
        }];
        let err = validate_query(&q, &profile()).unwrap_err();
        assert_eq!(err, ValidatorError::UnsupportedJoinShape);
    }

    #[test]
    fn inner_join_with_simple_equality_passes() {
        let mut q = happy_path_query();
        q.joins = vec![Join {
            kind: JoinKind::Inner,
            rhs: FromItem {
                alias: Some("o".to_string()),
                source: FromSource::BaseRelation {
                    schema: None,
                    name: "orders".to_string(),
                },
            },
            on: Expr::eq(Expr::column("u", "id"), Expr::column("o", "user_id")),
        }];
        assert!(validate_query(&q, &profile()).is_ok());
    }

    #[test]
    fn or_in_where_is_rejected() {
        let mut q = happy_path_query();
        q.where_clause = Some(Expr::Or(
            Box::new(Expr::eq(Expr::column("u", "email"), Expr::Parameter(1))),
            Box::new(Expr::eq(Expr::column("u", "email"), Expr::Parameter(2))),
        ));
        let err = validate_query(&q, &profile()).unwrap_err();
        assert_eq!(err, ValidatorError::LogicalNotAllowed);
    }

    #[test]
    fn missing_where_clause_is_rejected() {
        let mut q = happy_path_query();
        q.where_clause = None;
        let err = validate_query(&q, &profile()).unwrap_err();
        assert_eq!(err, ValidatorError::UnsupportedWherePredicate);
    }
}
