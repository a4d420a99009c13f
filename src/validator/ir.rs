// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The query intermediate representation the validator consumes.
//!
//! This crate does not parse SQL text into this shape — that is an
//! external collaborator's job (`backend::DatabaseBackend::make_query_ir`).
//! These types exist so the validator, its tests, and any real parser can
//! agree on a concrete contract.

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub select: Vec<SelectItem>,
    pub from: Vec<FromItem>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<Expr>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    pub distinct: bool,
    pub ctes: Vec<Cte>,
}

impl Query {
    pub fn has_star(&self) -> bool {
        self.select.iter().any(|item| item.is_star)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub is_star: bool,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromItem {
    pub alias: Option<String>,
    pub source: FromSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    BaseRelation {
        schema: Option<String>,
        name: String,
    },
    SubQuery(Box<Query>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub rhs: FromItem,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub schema: Option<String>,
    pub name: String,
    pub args: Vec<Expr>,
}

impl FunctionCall {
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64), // bit pattern, so `Expr` can derive `PartialEq` without NaN surprises
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Parameter(u32),
    Literal(Literal),
    FunctionCall(FunctionCall),
    Cast(Box<Expr>, String),
    Comparison {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    In {
        lhs: Box<Expr>,
        items: Vec<Expr>,
    },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_: Option<Box<Expr>>,
    },
    Window {
        func: FunctionCall,
        partition_by: Vec<Expr>,
        order_by: Vec<Expr>,
    },
    SubQuery(Box<Query>),
    /// A construct the IR producer could not represent precisely. The
    /// validator always rejects a query containing one of these rather
    /// than silently ignoring it.
    Unsupported,
}

impl Expr {
    pub fn int_literal(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn str_literal(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::Str(value.into()))
    }

    pub fn column(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        })
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Expr::Comparison {
            op: CompareOp::Eq,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}
