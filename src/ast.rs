//! Abstract syntax tree for parsed SQL templates.
//!
//! A template compiles once into a [`DynamicSql`] tree and is then shared
//! read-only across threads; `build_query` never mutates the tree. Callers
//! that want to keep appending to an already-published tree take a deep
//! [`Clone`] first.

use crate::builder::BoundSql;
use crate::context::ParamContext;
use crate::engine;
use crate::error::DynSqlResult;
use crate::registry::RegistryManager;
use crate::types::{JdbcType, SqlMode};
use serde::{Deserialize, Serialize};

/// Everything known about one `#{...}` bound parameter at parse time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Expression producing the bound value; may be empty for pure `Out`
    /// parameters declared by attributes only.
    pub expr: String,
    pub name: Option<String>,
    pub mode: SqlMode,
    pub jdbc_type: Option<JdbcType>,
    pub value_type: Option<String>,
    pub type_handler: Option<String>,
}

/// One node of a compiled template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlNode {
    /// Literal SQL text, rendered verbatim.
    Text(String),
    /// `${expr}` — raw string substitution, the injection path.
    Placeholder(String),
    /// `#{expr, attr=value...}` or `:name` — one `?` plus one argument.
    Parameter(ParamSpec),
    /// Raw `?` in the template; the value is looked up as `arg{n}`.
    PositionArg(usize),
    If {
        test: String,
        body: DynamicSql,
    },
    Choose {
        whens: Vec<(String, DynamicSql)>,
        otherwise: Option<DynamicSql>,
    },
    Foreach {
        collection: String,
        item: String,
        open: String,
        close: String,
        separator: String,
        body: DynamicSql,
    },
    Where(DynamicSql),
    Set(DynamicSql),
    Bind {
        name: String,
        expr: String,
    },
    Include {
        ref_name: String,
    },
    Macro {
        ref_name: String,
    },
    /// `@{name, activeExpr, body}` — dispatched through the rule registry.
    Rule {
        name: String,
        active_expr: Option<String>,
        body: Option<String>,
    },
}

/// An ordered sequence of template nodes; the root of every compiled
/// template and the body of every control tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicSql {
    nodes: Vec<SqlNode>,
    have_injection: bool,
}

impl DynamicSql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a template string. Shorthand for [`crate::parser::parse`].
    pub fn parse(template: &str) -> DynSqlResult<Self> {
        crate::parser::parse(template)
    }

    pub fn nodes(&self) -> &[SqlNode] {
        &self.nodes
    }

    /// True when the last child is a literal text node.
    pub fn last_is_text(&self) -> bool {
        matches!(self.nodes.last(), Some(SqlNode::Text(_)))
    }

    /// Whether any descendant performs raw text substitution (`${...}`,
    /// macros, registry rules). Computed once during construction, never
    /// recomputed per call. Such templates are unsafe for statement caching
    /// or batching.
    pub fn is_have_injection(&self) -> bool {
        self.have_injection
    }

    /// Append literal text, merging into a trailing text node. Blank
    /// appends are dropped when the text so far already ends in whitespace.
    pub fn append_string(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(SqlNode::Text(last)) = self.nodes.last_mut() {
            if text.trim().is_empty() && last.ends_with(['\r', '\n', '\t', ' ']) {
                return;
            }
            last.push_str(text);
            return;
        }
        self.nodes.push(SqlNode::Text(text.to_string()));
    }

    /// Append a `${expr}` raw substitution.
    pub fn append_placeholder_expr(&mut self, expr: impl Into<String>) {
        self.have_injection = true;
        self.nodes.push(SqlNode::Placeholder(expr.into()));
    }

    /// Append an `@{name, activeExpr, body}` registry rule.
    pub fn append_rule_expr(
        &mut self,
        name: impl Into<String>,
        active_expr: Option<String>,
        body: Option<String>,
    ) {
        self.have_injection = true;
        self.nodes.push(SqlNode::Rule {
            name: name.into(),
            active_expr,
            body,
        });
    }

    /// Append a `#{...}` bound parameter.
    pub fn append_value_expr(&mut self, spec: ParamSpec) {
        self.nodes.push(SqlNode::Parameter(spec));
    }

    /// Append a raw `?` positional parameter.
    pub fn append_position_arg(&mut self, position: usize) {
        self.nodes.push(SqlNode::PositionArg(position));
    }

    /// Append an arbitrary child node, propagating its injection flag.
    pub fn append_child(&mut self, node: SqlNode) {
        self.have_injection |= node_has_injection(&node);
        self.nodes.push(node);
    }

    /// Evaluate this tree against `data`, producing parameterized SQL plus
    /// its ordered argument list. On error the partial output is discarded.
    pub fn build_query(
        &self,
        data: &ParamContext,
        registry: &RegistryManager,
    ) -> DynSqlResult<BoundSql> {
        let mut ctx = data.clone();
        let mut out = BoundSql::default();
        engine::build_nodes(&self.nodes, &mut ctx, registry, &mut out)?;
        tracing::debug!(
            sql_len = out.sql_string().len(),
            args = out.args().len(),
            "built dynamic sql"
        );
        Ok(out)
    }
}

fn node_has_injection(node: &SqlNode) -> bool {
    match node {
        SqlNode::Text(_) | SqlNode::Parameter(_) | SqlNode::PositionArg(_) | SqlNode::Bind { .. } => {
            false
        }
        // Raw substitution, or expansion unknown until build time.
        SqlNode::Placeholder(_)
        | SqlNode::Macro { .. }
        | SqlNode::Rule { .. }
        | SqlNode::Include { .. } => true,
        SqlNode::If { body, .. } | SqlNode::Foreach { body, .. } => body.is_have_injection(),
        SqlNode::Where(body) | SqlNode::Set(body) => body.is_have_injection(),
        SqlNode::Choose { whens, otherwise } => {
            whens.iter().any(|(_, branch)| branch.is_have_injection())
                || otherwise.as_ref().is_some_and(DynamicSql::is_have_injection)
        }
    }
}
