// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pass A: mode-independent structural checks, run on every query
//! regardless of whether it ends up in sensitive mode.

use super::error::ValidatorError;
use super::ir::{Expr, FromItem, FromSource, Query};
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

fn check_function(
    fc: &super::ir::FunctionCall,
    profile: &ConnectionProfile,
    is_globally_safe: &dyn Fn(&str) -> bool,
) -> Result<(), ValidatorError> {
    let qualified = fc.qualified_name();
    if is_globally_safe(&qualified) || profile.is_allow_listed_function(fc.schema.as_deref(), &fc.name) {
        Ok(())
    } else {
        Err(ValidatorError::FunctionNotAllowed(qualified))
    }
}

/// `in_where` tracks whether this expression is reachable from the
/// top-level WHERE clause: spec.md §4.6 allows a parameter only inside a
/// WHERE-clause comparison against a sensitive column, not in an
/// otherwise-identical comparison sitting in JOIN ON, HAVING, ORDER BY,
/// or the select-list. Pass A only checks *placement* (WHERE, anchored
/// to a sensitive column); which comparison operators are acceptable
/// against that column is a sensitive-mode shape question left to Pass
/// B, so the rejection a caller sees names the actual sensitive-mode
/// restriction instead of a generic misplaced-parameter error.
fn walk_expr(
    expr: &Expr,
    aliases: &AliasMap,
    profile: &ConnectionProfile,
    is_globally_safe: &dyn Fn(&str) -> bool,
    in_where: bool,
) -> Result<(), ValidatorError> {
    match expr {
        Expr::Column(_) | Expr::Literal(_) => Ok(()),
        Expr::Parameter(_) => Err(ValidatorError::ParameterMisplaced),
        Expr::FunctionCall(fc) => {
            check_function(fc, profile, is_globally_safe)?;
            for arg in &fc.args {
                walk_expr(arg, aliases, profile, is_globally_safe, in_where)?;
            }
            Ok(())
        }
        Expr::Cast(inner, _) => walk_expr(inner, aliases, profile, is_globally_safe, in_where),
        Expr::Comparison { op: _, lhs, rhs } => {
            let lhs_is_param = matches!(**lhs, Expr::Parameter(_));
            let rhs_is_param = matches!(**rhs, Expr::Parameter(_));
            if lhs_is_param || rhs_is_param {
                if !in_where {
                    return Err(ValidatorError::ParameterMisplaced);
                }
                let anchor = if lhs_is_param { rhs } else { lhs };
                if !expr_contains_sensitive_column(anchor, aliases, profile) {
                    return Err(ValidatorError::ParameterMisplaced);
                }
                walk_expr(anchor, aliases, profile, is_globally_safe, in_where)
            } else {
                walk_expr(lhs, aliases, profile, is_globally_safe, in_where)?;
                walk_expr(rhs, aliases, profile, is_globally_safe, in_where)
            }
        }
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            walk_expr(lhs, aliases, profile, is_globally_safe, in_where)?;
            walk_expr(rhs, aliases, profile, is_globally_safe, in_where)
        }
        Expr::Not(inner) => walk_expr(inner, aliases, profile, is_globally_safe, in_where),
        Expr::In { lhs, items } => {
            let lhs_sensitive = expr_contains_sensitive_column(lhs, aliases, profile);
            walk_expr(lhs, aliases, profile, is_globally_safe, in_where)?;
            for item in items {
                if matches!(item, Expr::Parameter(_)) {
                    if !in_where || !lhs_sensitive {
                        return Err(ValidatorError::ParameterMisplaced);
                    }
                } else {
                    walk_expr(item, aliases, profile, is_globally_safe, in_where)?;
                }
            }
            Ok(())
        }
        Expr::Case {
            operand,
            whens,
            else_,
        } => {
            if let Some(operand) = operand {
                walk_expr(operand, aliases, profile, is_globally_safe, in_where)?;
            }
            for (when, then) in whens {
                walk_expr(when, aliases, profile, is_globally_safe, in_where)?;
                walk_expr(then, aliases, profile, is_globally_safe, in_where)?;
            }
            if let Some(else_) = else_ {
                walk_expr(else_, aliases, profile, is_globally_safe, in_where)?;
            }
            Ok(())
        }
        Expr::Window {
            func,
            partition_by,
            order_by,
        } => {
            check_function(func, profile, is_globally_safe)?;
            for arg in &func.args {
                walk_expr(arg, aliases, profile, is_globally_safe, in_where)?;
            }
            for expr in partition_by {
                walk_expr(expr, aliases, profile, is_globally_safe, in_where)?;
            }
            for expr in order_by {
                walk_expr(expr, aliases, profile, is_globally_safe, in_where)?;
            }
            Ok(())
        }
        Expr::SubQuery(sub) => validate_query(sub, profile, is_globally_safe),
        Expr::Unsupported => Err(ValidatorError::UnsupportedQueryStructure),
    }
}

/// Runs Pass A over `query` and, recursively, every CTE body and
/// sub-query it contains.
pub fn validate_query(
    query: &Query,
    profile: &ConnectionProfile,
    is_globally_safe: &dyn Fn(&str) -> bool,
) -> Result<(), ValidatorError> {
    if query.has_star() {
        return Err(ValidatorError::StarNotAllowed);
    }

    let aliases = build_alias_map(query);

    for item in &query.from {
        if item.alias.as_deref().unwrap_or("").is_empty() {
            return Err(ValidatorError::MissingAlias);
        }
        if let FromSource::SubQuery(sub) = &item.source {
            validate_query(sub, profile, is_globally_safe)?;
        }
    }
    for join in &query.joins {
        if join.rhs.alias.as_deref().unwrap_or("").is_empty() {
            return Err(ValidatorError::MissingAlias);
        }
        if let FromSource::SubQuery(sub) = &join.rhs.source {
            validate_query(sub, profile, is_globally_safe)?;
        }
        walk_expr(&join.on, &aliases, profile, is_globally_safe, false)?;
    }
    for item in &query.select {
        walk_expr(&item.expr, &aliases, profile, is_globally_safe, false)?;
    }
    if let Some(where_expr) = &query.where_clause {
        walk_expr(where_expr, &aliases, profile, is_globally_safe, true)?;
    }
    for expr in &query.group_by {
        walk_expr(expr, &aliases, profile, is_globally_safe, false)?;
    }
    if let Some(having) = &query.having {
        walk_expr(having, &aliases, profile, is_globally_safe, false)?;
    }
    for expr in &query.order_by {
        walk_expr(expr, &aliases, profile, is_globally_safe, false)?;
    }
    if let Some(limit) = &query.limit {
        walk_expr(limit, &aliases, profile, is_globally_safe, false)?;
    }
    if let Some(offset) = &query.offset {
        walk_expr(offset, &aliases, profile, is_globally_safe, false)?;
    }
    for cte in &query.ctes {
        validate_query(&cte.query, profile, is_globally_safe)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ir::{ColumnRef, CompareOp, FunctionCall, Literal, SelectItem};
    use crate::validator::profile::{ConnectionProfile, DatabaseKind, SafetyPolicy};

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
            vec![crate::validator::profile::SensitiveColumnRule {
                schema: None,
                table: "users".to_string(),
                column: "email".to_string(),
            }],
            vec![],
        )
    }

    fn base_query() -> Query {
        Query {
            select: vec![SelectItem {
                expr: Expr::column("u", "id"),
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
            where_clause: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: Some(Expr::int_literal(10)),
            offset: None,
            distinct: false,
            ctes: vec![],
        }
    }

    fn always_unsafe(_: &str) -> bool {
        false
    }

    #[test]
    fn plain_query_passes() {
        let q = base_query();
        assert!(validate_query(&q, &profile(), &always_unsafe).is_ok());
    }

    #[test]
    fn star_is_rejected() {
        let mut q = base_query();
        q.select[0].is_star = true;
        let err = validate_query(&q, &profile(), &always_unsafe).expect_err("must reject");
        assert_eq!(err, ValidatorError::StarNotAllowed);
    }

    #[test]
    fn missing_alias_is_rejected() {
        let mut q = base_query();
        q.from[0].alias = None;
        let err = validate_query(&q, &profile(), &always_unsafe).expect_err("must reject");
        assert_eq!(err, ValidatorError::MissingAlias);
    }

    #[test]
    fn disallowed_function_is_rejected() {
        let mut q = base_query();
        q.select[0].expr = Expr::FunctionCall(FunctionCall {
            schema: None,
            name: "pg_sleep".to_string(),
            args: vec![Expr::Literal(Literal::Int(5))],
        });
        let err = validate_query(&q, &profile(), &always_unsafe).expect_err("must reject");
        assert_eq!(err, ValidatorError::FunctionNotAllowed("pg_sleep".to_string()));
    }

    #[test]
    fn allow_listed_function_passes() {
        let mut q = base_query();
        q.select[0].expr = Expr::FunctionCall(FunctionCall {
            schema: None,
            name: "now".to_string(),
            args: vec![],
        });
        assert!(validate_query(&q, &profile(), &|name| name == "now").is_ok());
    }

    #[test]
    fn parameter_against_sensitive_column_is_allowed() {
        let mut q = base_query();
        q.where_clause = Some(Expr::eq(Expr::column("u", "email"), Expr::Parameter(1)));
        assert!(validate_query(&q, &profile(), &always_unsafe).is_ok());
    }

    #[test]
    fn parameter_against_non_sensitive_column_is_rejected() {
        let mut q = base_query();
        q.where_clause = Some(Expr::eq(Expr::column("u", "id"), Expr::Parameter(1)));
        let err = validate_query(&q, &profile(), &always_unsafe).expect_err("must reject");
        assert_eq!(err, ValidatorError::ParameterMisplaced);
    }

    #[test]
    fn parameter_outside_where_is_rejected() {
        let mut q = base_query();
        q.select[0].expr = Expr::Parameter(1);
        let err = validate_query(&q, &profile(), &always_unsafe).expect_err("must reject");
        assert_eq!(err, ValidatorError::ParameterMisplaced);
    }

    #[test]
    fn parameter_against_sensitive_column_with_non_eq_operator_passes_pass_a() {
        // spec.md §8 scenario 4: `WHERE u.email LIKE $1`. Pass A only
        // checks that the parameter sits in WHERE anchored to a
        // sensitive column; whether `LIKE` itself is an acceptable
        // sensitive-mode shape is Pass B's call, so Pass A must not
        // reject this with `ParameterMisplaced`.
        let mut q = base_query();
        q.where_clause = Some(Expr::Comparison {
            op: CompareOp::Like,
            lhs: Box::new(Expr::column("u", "email")),
            rhs: Box::new(Expr::Parameter(1)),
        });
        assert!(validate_query(&q, &profile(), &always_unsafe).is_ok());
    }

    #[test]
    fn parameter_in_join_on_is_rejected_even_against_a_sensitive_column() {
        let mut q = base_query();
        q.joins = vec![crate::validator::ir::Join {
            kind: crate::validator::ir::JoinKind::Inner,
            rhs: FromItem {
                alias: Some("e".to_string()),
                source: FromSource::BaseRelation {
                    schema: None,
                    name: "emails".to_string(),
                },
            },
            on: Expr::eq(Expr::column("u", "email"), Expr::Parameter(1)),
        }];
        let err = validate_query(&q, &profile(), &always_unsafe).expect_err("must reject");
        assert_eq!(err, ValidatorError::ParameterMisplaced);
    }

    #[test]
    fn subquery_in_from_is_recursively_validated() {
        let mut inner = base_query();
        inner.select[0].is_star = true;
        let mut outer = base_query();
        outer.from = vec![FromItem {
            alias: Some("s".to_string()),
            source: FromSource::SubQuery(Box::new(inner)),
        }];
        let err = validate_query(&outer, &profile(), &always_unsafe).expect_err("must reject");
        assert_eq!(err, ValidatorError::StarNotAllowed);
    }

    #[test]
    fn unresolved_column_reference_with_unknown_qualifier_is_param_of_parameter_rule_exempt() {
        // A bare unqualified column (no qualifier) is fine at Pass A: the
        // "is this sensitive" check just resolves false; whether the
        // column reference itself is *resolvable* is the touch
        // analyzer's job, not Pass A's.
        let mut q = base_query();
        q.select[0].expr = Expr::Column(ColumnRef {
            qualifier: None,
            name: "id".to_string(),
        });
        assert!(validate_query(&q, &profile(), &always_unsafe).is_ok());
    }
}
