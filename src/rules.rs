//! Built-in `@{ruleName, activeExpr, body}` rules and the [`SqlRule`] trait
//! custom rules implement.

use crate::builder::{BoundSql, SqlArg};
use crate::context::ParamContext;
use crate::engine;
use crate::error::{DynSqlError, DynSqlResult};
use crate::eval::truthy;
use crate::registry::RegistryManager;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A named rule invoked through `@{name, ...}` syntax.
///
/// `active_expr` and `body` are the raw comma-separated slots after the rule
/// name, whitespace preserved. What each slot means is up to the rule.
pub trait SqlRule: Send + Sync + fmt::Debug {
    fn execute(
        &self,
        active_expr: Option<&str>,
        body: Option<&str>,
        ctx: &mut ParamContext,
        registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()>;
}

/// Rules whose content slot is a nested template share this split: plain
/// rules take everything after the name as content, `if*` variants take a
/// test expression first.
fn split_slots<'a>(
    rule: &str,
    with_test: bool,
    active_expr: Option<&'a str>,
    body: Option<&'a str>,
) -> DynSqlResult<(Option<&'a str>, String)> {
    if with_test {
        let test = active_expr.ok_or_else(|| {
            DynSqlError::resolution(format!("rule '{rule}' requires a test expression"))
        })?;
        let content = body
            .ok_or_else(|| DynSqlError::resolution(format!("rule '{rule}' requires content")))?;
        Ok((Some(test), content.to_string()))
    } else {
        let active = active_expr
            .ok_or_else(|| DynSqlError::resolution(format!("rule '{rule}' requires content")))?;
        // The parser splits on commas; rejoin so content may contain them.
        Ok((None, rejoin_content(active, body)))
    }
}

fn build_content(
    content: &str,
    ctx: &mut ParamContext,
    registry: &RegistryManager,
) -> DynSqlResult<BoundSql> {
    let fragment = crate::parser::parse(content)?;
    let mut sub = BoundSql::default();
    engine::build_nodes(fragment.nodes(), ctx, registry, &mut sub)?;
    Ok(sub)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offset just past the last standalone occurrence of `keyword`
/// (case-insensitive, word boundaries on both sides).
fn last_keyword_end(sql: &str, keyword: &str) -> Option<usize> {
    let lower = sql.to_ascii_lowercase();
    let mut found = None;
    let mut from = 0;
    while let Some(pos) = lower[from..].find(keyword) {
        let at = from + pos;
        let end = at + keyword.len();
        let before_ok = at == 0 || !is_word_byte(lower.as_bytes()[at - 1]);
        let after_ok = end == lower.len() || !is_word_byte(lower.as_bytes()[end]);
        if before_ok && after_ok {
            found = Some(end);
        }
        from = at + 1;
    }
    found
}

/// Shared machinery of `@{and}`, `@{or}` and `@{set}` plus their `if*`
/// variants: look backwards for `keyword` in the SQL built so far, then emit
/// either the opening keyword, nothing, or the connector before the content.
struct ConnectorRule {
    rule: &'static str,
    keyword: &'static str,
    open: &'static str,
    connector: &'static str,
    with_test: bool,
}

impl fmt::Debug for ConnectorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectorRule({})", self.rule)
    }
}

impl ConnectorRule {
    /// A connector is redundant when the SQL built so far already ends in
    /// one: a trailing `and`/`or` word for the where-family rules, a
    /// trailing comma for the set-family rules.
    fn tail_ends_with_connector(&self, tail: &str) -> bool {
        let tail = tail.trim_end();
        if self.keyword == "set" {
            tail.ends_with(',')
        } else {
            ends_with_word(tail, "and") || ends_with_word(tail, "or")
        }
    }
}

impl SqlRule for ConnectorRule {
    fn execute(
        &self,
        active_expr: Option<&str>,
        body: Option<&str>,
        ctx: &mut ParamContext,
        registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()> {
        // Condition rules render empty on a missing or blank content slot.
        let (test, content) = if self.with_test {
            match (active_expr, body) {
                (Some(test), Some(content)) => (Some(test), content.to_string()),
                _ => return Ok(()),
            }
        } else {
            match active_expr {
                Some(active) => (None, rejoin_content(active, body)),
                None => return Ok(()),
            }
        };
        if let Some(test) = test {
            if !truthy(&registry.evaluator().evaluate(test, ctx)?)? {
                return Ok(());
            }
        }
        if content.trim().is_empty() {
            return Ok(());
        }
        let sub = build_content(&content, ctx, registry)?;
        // Content without any bound argument is treated as an inactive
        // condition and renders nothing.
        if sub.sql_string().trim().is_empty() || sub.args().is_empty() {
            return Ok(());
        }
        match last_keyword_end(builder.sql_string(), self.keyword) {
            None => builder.push_sql(self.open),
            Some(end) if builder.sql_string()[end..].trim().is_empty() => {}
            Some(end) if self.tail_ends_with_connector(&builder.sql_string()[end..]) => {}
            Some(_) => builder.push_sql(self.connector),
        }
        builder.extend(sub);
        Ok(())
    }
}

fn ends_with_word(tail: &str, word: &str) -> bool {
    let n = word.len();
    if tail.len() < n || !tail.is_char_boundary(tail.len() - n) {
        return false;
    }
    let (head, last) = tail.split_at(tail.len() - n);
    last.eq_ignore_ascii_case(word)
        && !head
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn rejoin_content(active: &str, body: Option<&str>) -> String {
    match body {
        Some(rest) => format!("{active},{rest}"),
        None => active.to_string(),
    }
}

/// `@{in, expr}` / `@{ifin, test, expr}`: builds the content, then expands
/// every argument holding an array into a parenthesized element list.
struct InRule {
    rule: &'static str,
    with_test: bool,
}

impl fmt::Debug for InRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InRule({})", self.rule)
    }
}

impl SqlRule for InRule {
    fn execute(
        &self,
        active_expr: Option<&str>,
        body: Option<&str>,
        ctx: &mut ParamContext,
        registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()> {
        let (test, content) = split_slots(self.rule, self.with_test, active_expr, body)?;
        if let Some(test) = test {
            if !truthy(&registry.evaluator().evaluate(test, ctx)?)? {
                return Ok(());
            }
        }
        let sub = build_content(&content, ctx, registry)?;
        expand_arrays(sub, builder)
    }
}

fn expand_arrays(sub: BoundSql, out: &mut BoundSql) -> DynSqlResult<()> {
    let (text, args) = sub.into_parts();
    let mut args = args.into_iter();
    let mut plain = String::new();
    for ch in text.chars() {
        if ch != '?' {
            plain.push(ch);
            continue;
        }
        out.push_sql(&plain);
        plain.clear();
        let arg = args.next().ok_or_else(|| {
            DynSqlError::evaluation("in-rule content has a placeholder without an argument")
        })?;
        match arg.value {
            Value::Array(items) => {
                out.push_sql("(");
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.push_sql(", ");
                    }
                    out.push_arg(SqlArg {
                        name: arg.name.clone(),
                        value: item,
                        mode: arg.mode,
                        jdbc_type: arg.jdbc_type,
                        value_type: arg.value_type.clone(),
                        type_handler: arg.type_handler.clone(),
                    });
                }
                out.push_sql(")");
            }
            _ => out.push_arg(arg),
        }
    }
    out.push_sql(&plain);
    Ok(())
}

/// `@{macro, name}`: the registered macro body is itself a template and is
/// parsed and built in place.
#[derive(Debug)]
struct MacroRule;

impl SqlRule for MacroRule {
    fn execute(
        &self,
        active_expr: Option<&str>,
        _body: Option<&str>,
        ctx: &mut ParamContext,
        registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()> {
        let name = active_expr
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DynSqlError::resolution("rule 'macro' requires a macro name"))?;
        let text = registry
            .find_macro(name)
            .ok_or_else(|| DynSqlError::resolution(format!("macro '{name}' not found")))?
            .to_string();
        let sub = build_content(&text, ctx, registry)?;
        builder.extend(sub);
        Ok(())
    }
}

/// `@{include, name}`: splices a registered fragment, same as the
/// `include(...)` tag.
#[derive(Debug)]
struct IncludeRule;

impl SqlRule for IncludeRule {
    fn execute(
        &self,
        active_expr: Option<&str>,
        _body: Option<&str>,
        ctx: &mut ParamContext,
        registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()> {
        let name = active_expr
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DynSqlError::resolution("rule 'include' requires a fragment name"))?;
        let fragment = registry
            .fragment(name)
            .ok_or_else(|| DynSqlError::resolution(format!("include fragment '{name}' not found")))?;
        let mut sub = BoundSql::default();
        engine::build_nodes(fragment.nodes(), ctx, registry, &mut sub)?;
        builder.extend_spaced(sub);
        Ok(())
    }
}

/// `@{text, content}`: inlines the content slot verbatim, no parsing.
#[derive(Debug)]
struct TextRule;

impl SqlRule for TextRule {
    fn execute(
        &self,
        active_expr: Option<&str>,
        body: Option<&str>,
        _ctx: &mut ParamContext,
        _registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()> {
        if let Some(active) = active_expr {
            builder.push_sql(&rejoin_content(active, body));
        }
        Ok(())
    }
}

/// `@{if, test, content}`: test-gated nested template, no connector logic.
#[derive(Debug)]
struct IfRule;

impl SqlRule for IfRule {
    fn execute(
        &self,
        active_expr: Option<&str>,
        body: Option<&str>,
        ctx: &mut ParamContext,
        registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()> {
        let (test, content) = split_slots("if", true, active_expr, body)?;
        if let Some(test) = test {
            if !truthy(&registry.evaluator().evaluate(test, ctx)?)? {
                return Ok(());
            }
        }
        let sub = build_content(&content, ctx, registry)?;
        builder.extend(sub);
        Ok(())
    }
}

/// `@{arg, expr, attr=value...}`: the `#{...}` parameter form spelled as a
/// rule.
#[derive(Debug)]
struct ArgRule;

impl SqlRule for ArgRule {
    fn execute(
        &self,
        active_expr: Option<&str>,
        body: Option<&str>,
        ctx: &mut ParamContext,
        registry: &RegistryManager,
        builder: &mut BoundSql,
    ) -> DynSqlResult<()> {
        let (_, content) = split_slots("arg", false, active_expr, body)?;
        let spec = crate::parser::parse_param_content(&content, 0)?;
        engine::build_parameter(&spec, ctx, registry, builder)
    }
}

pub(crate) fn builtin_rules() -> HashMap<String, Arc<dyn SqlRule>> {
    let mut rules: HashMap<String, Arc<dyn SqlRule>> = HashMap::new();
    let connector = |rule, keyword, open, connector, with_test| ConnectorRule {
        rule,
        keyword,
        open,
        connector,
        with_test,
    };
    rules.insert("and".into(), Arc::new(connector("and", "where", "where ", "and ", false)));
    rules.insert("or".into(), Arc::new(connector("or", "where", "where ", "or ", false)));
    rules.insert("set".into(), Arc::new(connector("set", "set", "set ", ", ", false)));
    rules.insert("ifand".into(), Arc::new(connector("ifand", "where", "where ", "and ", true)));
    rules.insert("ifor".into(), Arc::new(connector("ifor", "where", "where ", "or ", true)));
    rules.insert("ifset".into(), Arc::new(connector("ifset", "set", "set ", ", ", true)));
    rules.insert("in".into(), Arc::new(InRule { rule: "in", with_test: false }));
    rules.insert("ifin".into(), Arc::new(InRule { rule: "ifin", with_test: true }));
    rules.insert("macro".into(), Arc::new(MacroRule));
    rules.insert("include".into(), Arc::new(IncludeRule));
    rules.insert("arg".into(), Arc::new(ArgRule));
    rules.insert("text".into(), Arc::new(TextRule));
    rules.insert("if".into(), Arc::new(IfRule));
    rules
}
