// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Touch analysis: which base-relation columns a query actually reads,
//! and at what scope (top-level vs. nested inside a CTE/sub-query).

use super::ir::{Cte, Expr, FromItem, FromSource, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Main,
    Nested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchKind {
    BaseRelation {
        schema: Option<String>,
        table: String,
        column: String,
    },
    /// A column reference the analyzer could not resolve to a concrete
    /// base relation (e.g. an unknown alias).
    Unresolved,
    /// A construct the analyzer cannot reason about at all.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Touch {
    pub scope: Scope,
    pub kind: TouchKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchReport {
    pub touches: Vec<Touch>,
}

impl TouchReport {
    pub fn has_unresolved_or_unsupported(&self) -> bool {
        self.touches
            .iter()
            .any(|t| matches!(t.kind, TouchKind::Unresolved | TouchKind::Unsupported))
    }
}

#[derive(Debug, Clone)]
struct AliasBinding {
    schema: Option<String>,
    table: String,
}

fn build_alias_map(query: &Query) -> Vec<(String, Option<AliasBinding>)> {
    let mut map = Vec::new();
    let mut push = |item: &FromItem| {
        let alias = item.alias.clone();
        let binding = match &item.source {
            FromSource::BaseRelation { schema, name } => Some(AliasBinding {
                schema: schema.clone(),
                table: name.clone(),
            }),
            FromSource::SubQuery(_) => None,
        };
        if let Some(alias) = alias {
            map.push((alias, binding));
        }
    };
    for item in &query.from {
        push(item);
    }
    for join in &query.joins {
        push(&join.rhs);
    }
    map
}

fn resolve_alias<'a>(
    map: &'a [(String, Option<AliasBinding>)],
    qualifier: &str,
) -> Option<&'a Option<AliasBinding>> {
    map.iter()
        .find(|(alias, _)| alias == qualifier)
        .map(|(_, binding)| binding)
}

/// Walks an entire query tree (top-level plus every CTE and sub-query it
/// contains) and records one touch per column reference encountered.
pub fn analyze(query: &Query) -> TouchReport {
    let mut report = TouchReport::default();
    analyze_query(query, Scope::Main, &mut report);
    report
}

fn analyze_query(query: &Query, scope: Scope, report: &mut TouchReport) {
    let alias_map = build_alias_map(query);

    for cte in &query.ctes {
        analyze_cte(cte, report);
    }
    for item in &query.from {
        if let FromSource::SubQuery(sub) = &item.source {
            analyze_query(sub, Scope::Nested, report);
        }
    }
    for join in &query.joins {
        if let FromSource::SubQuery(sub) = &join.rhs.source {
            analyze_query(sub, Scope::Nested, report);
        }
        analyze_expr(&join.on, scope, &alias_map, report);
    }
    for item in &query.select {
        analyze_expr(&item.expr, scope, &alias_map, report);
    }
    if let Some(where_expr) = &query.where_clause {
        analyze_expr(where_expr, scope, &alias_map, report);
    }
    for expr in &query.group_by {
        analyze_expr(expr, scope, &alias_map, report);
    }
    if let Some(having) = &query.having {
        analyze_expr(having, scope, &alias_map, report);
    }
    for expr in &query.order_by {
        analyze_expr(expr, scope, &alias_map, report);
    }
}

fn analyze_cte(cte: &Cte, report: &mut TouchReport) {
    analyze_query(&cte.query, Scope::Nested, report);
}

fn analyze_expr(
    expr: &Expr,
    scope: Scope,
    alias_map: &[(String, Option<AliasBinding>)],
    report: &mut TouchReport,
) {
    match expr {
        Expr::Column(col) => {
            let kind = match &col.qualifier {
                None => TouchKind::Unresolved,
                Some(qualifier) => match resolve_alias(alias_map, qualifier) {
                    Some(Some(binding)) => TouchKind::BaseRelation {
                        schema: binding.schema.clone(),
                        table: binding.table.clone(),
                        column: col.name.clone(),
                    },
                    // qualifier resolves to a sub-query alias: not a
                    // base-relation touch, nothing further to record.
                    Some(None) => return,
                    None => TouchKind::Unresolved,
                },
            };
            report.touches.push(Touch { scope, kind });
        }
        Expr::Parameter(_) | Expr::Literal(_) => {}
        Expr::FunctionCall(fc) => {
            for arg in &fc.args {
                analyze_expr(arg, scope, alias_map, report);
            }
        }
        Expr::Cast(inner, _) => analyze_expr(inner, scope, alias_map, report),
        Expr::Comparison { lhs, rhs, .. } => {
            analyze_expr(lhs, scope, alias_map, report);
            analyze_expr(rhs, scope, alias_map, report);
        }
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            analyze_expr(lhs, scope, alias_map, report);
            analyze_expr(rhs, scope, alias_map, report);
        }
        Expr::Not(inner) => analyze_expr(inner, scope, alias_map, report),
        Expr::In { lhs, items } => {
            analyze_expr(lhs, scope, alias_map, report);
            for item in items {
                analyze_expr(item, scope, alias_map, report);
            }
        }
        Expr::Case {
            operand,
            whens,
            else_,
        } => {
            if let Some(operand) = operand {
                analyze_expr(operand, scope, alias_map, report);
            }
            for (when, then) in whens {
                analyze_expr(when, scope, alias_map, report);
                analyze_expr(then, scope, alias_map, report);
            }
            if let Some(else_) = else_ {
                analyze_expr(else_, scope, alias_map, report);
            }
        }
        Expr::Window {
            func,
            partition_by,
            order_by,
        } => {
            for arg in &func.args {
                analyze_expr(arg, scope, alias_map, report);
            }
            for expr in partition_by {
                analyze_expr(expr, scope, alias_map, report);
            }
            for expr in order_by {
                analyze_expr(expr, scope, alias_map, report);
            }
        }
        Expr::SubQuery(sub) => analyze_query(sub, Scope::Nested, report),
        Expr::Unsupported => report.touches.push(Touch {
            scope,
            kind: TouchKind::Unsupported,
        }),
    }
}
