//! AST evaluation: walks a compiled template against a call context and
//! accumulates the bound SQL.

use crate::ast::{DynamicSql, ParamSpec, SqlNode};
use crate::builder::{BoundSql, SqlArg};
use crate::context::ParamContext;
use crate::error::{DynSqlError, DynSqlResult};
use crate::eval::truthy;
use crate::registry::RegistryManager;
use crate::types::{JdbcType, SqlMode};
use crate::value::Value;

pub(crate) fn build_nodes(
    nodes: &[SqlNode],
    ctx: &mut ParamContext,
    registry: &RegistryManager,
    out: &mut BoundSql,
) -> DynSqlResult<()> {
    for node in nodes {
        build_node(node, ctx, registry, out)?;
    }
    Ok(())
}

fn build_node(
    node: &SqlNode,
    ctx: &mut ParamContext,
    registry: &RegistryManager,
    out: &mut BoundSql,
) -> DynSqlResult<()> {
    match node {
        SqlNode::Text(text) => {
            out.push_sql(text);
            Ok(())
        }
        SqlNode::Placeholder(expr) => {
            let value = registry.evaluator().evaluate(expr, ctx)?;
            out.push_sql(&value.to_string());
            Ok(())
        }
        SqlNode::Parameter(spec) => build_parameter(spec, ctx, registry, out),
        SqlNode::PositionArg(position) => {
            let name = format!("arg{position}");
            let value = ctx.get(&name).cloned().unwrap_or(Value::Null);
            let jdbc = value.is_null().then_some(JdbcType::Varchar);
            let handler = registry.type_handlers().resolve(None, jdbc, None)?;
            out.push_arg(SqlArg {
                name: Some(name),
                value,
                mode: SqlMode::In,
                jdbc_type: jdbc,
                value_type: None,
                type_handler: Some(handler),
            });
            Ok(())
        }
        SqlNode::If { test, body } => {
            if truthy(&registry.evaluator().evaluate(test, ctx)?)? {
                build_nodes(body.nodes(), ctx, registry, out)?;
            }
            Ok(())
        }
        SqlNode::Choose { whens, otherwise } => {
            for (test, branch) in whens {
                if truthy(&registry.evaluator().evaluate(test, ctx)?)? {
                    return build_nodes(branch.nodes(), ctx, registry, out);
                }
            }
            if let Some(branch) = otherwise {
                build_nodes(branch.nodes(), ctx, registry, out)?;
            }
            Ok(())
        }
        SqlNode::Foreach {
            collection,
            item,
            open,
            close,
            separator,
            body,
        } => build_foreach(collection, item, open, close, separator, body, ctx, registry, out),
        SqlNode::Where(body) => {
            let mut sub = BoundSql::default();
            build_nodes(body.nodes(), ctx, registry, &mut sub)?;
            let (text, args) = sub.into_parts();
            if text.trim().is_empty() {
                return Ok(());
            }
            let stripped = strip_leading_connector(&text);
            out.push_sql("where");
            if !stripped.starts_with(char::is_whitespace) {
                out.push_sql(" ");
            }
            out.push_sql(&stripped);
            out.push_sql(" ");
            out.push_args(args);
            Ok(())
        }
        SqlNode::Set(body) => {
            let mut sub = BoundSql::default();
            build_nodes(body.nodes(), ctx, registry, &mut sub)?;
            let (text, args) = sub.into_parts();
            if text.trim().is_empty() {
                return Ok(());
            }
            let trimmed = text.trim_end();
            let stripped = trimmed.strip_suffix(',').unwrap_or(trimmed);
            out.push_sql("set");
            if !stripped.starts_with(char::is_whitespace) {
                out.push_sql(" ");
            }
            out.push_sql(stripped);
            out.push_sql(" ");
            out.push_args(args);
            Ok(())
        }
        SqlNode::Bind { name, expr } => {
            let value = registry.evaluator().evaluate(expr, ctx)?;
            ctx.insert(name.clone(), value);
            Ok(())
        }
        SqlNode::Include { ref_name } => {
            let fragment = registry.fragment(ref_name).ok_or_else(|| {
                DynSqlError::resolution(format!("include fragment '{ref_name}' not found"))
            })?;
            let mut sub = BoundSql::default();
            build_nodes(fragment.nodes(), ctx, registry, &mut sub)?;
            out.extend_spaced(sub);
            Ok(())
        }
        SqlNode::Macro { ref_name } => {
            let body = registry
                .find_macro(ref_name)
                .ok_or_else(|| {
                    tracing::debug!(name = %ref_name, "macro lookup miss");
                    DynSqlError::resolution(format!("macro '{ref_name}' not found"))
                })?
                .to_string();
            // Macro bodies are templates themselves.
            let fragment = crate::parser::parse(&body)?;
            build_nodes(fragment.nodes(), ctx, registry, out)
        }
        SqlNode::Rule {
            name,
            active_expr,
            body,
        } => {
            let rule = registry.rule(name).ok_or_else(|| {
                tracing::debug!(name = %name, "rule lookup miss");
                DynSqlError::resolution(format!("rule '{name}' not found"))
            })?;
            rule.execute(active_expr.as_deref(), body.as_deref(), ctx, registry, out)
        }
    }
}

/// Shared by `#{...}` parameters and the `@{arg,...}` rule.
pub(crate) fn build_parameter(
    spec: &ParamSpec,
    ctx: &mut ParamContext,
    registry: &RegistryManager,
    out: &mut BoundSql,
) -> DynSqlResult<()> {
    let value = if spec.expr.trim().is_empty() {
        Value::Null
    } else {
        registry.evaluator().evaluate(&spec.expr, ctx)?
    };

    // Untyped nulls default to VARCHAR so drivers never see a bare null of
    // unknown type.
    let mut jdbc = spec.jdbc_type;
    if value.is_null() && jdbc.is_none() && spec.value_type.is_none() {
        jdbc = Some(JdbcType::Varchar);
    }

    let handler = registry.type_handlers().resolve(
        spec.value_type.as_deref(),
        jdbc,
        spec.type_handler.as_deref(),
    )?;

    let name = spec.name.clone().or_else(|| {
        let expr = spec.expr.trim();
        (!expr.is_empty()).then(|| expr.to_string())
    });

    out.push_arg(SqlArg {
        name,
        value,
        mode: spec.mode,
        jdbc_type: jdbc,
        value_type: spec.value_type.clone(),
        type_handler: Some(handler),
    });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_foreach(
    collection: &str,
    item: &str,
    open: &str,
    close: &str,
    separator: &str,
    body: &DynamicSql,
    ctx: &mut ParamContext,
    registry: &RegistryManager,
    out: &mut BoundSql,
) -> DynSqlResult<()> {
    let items = match registry.evaluator().evaluate(collection, ctx)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(DynSqlError::evaluation(format!(
                "foreach collection '{collection}' is not an array, got {other:?}"
            )));
        }
    };
    // An absent or empty collection renders nothing, open/close included.
    if items.is_empty() {
        return Ok(());
    }

    let shadowed = ctx.get(item).cloned();
    let mut sub = BoundSql::default();
    for (i, element) in items.into_iter().enumerate() {
        if i > 0 {
            sub.push_sql(separator);
        }
        ctx.insert(item.to_string(), element);
        build_nodes(body.nodes(), ctx, registry, &mut sub)?;
    }
    match shadowed {
        Some(previous) => {
            ctx.insert(item.to_string(), previous);
        }
        None => {
            ctx.remove(item);
        }
    }

    out.push_sql(open);
    out.extend(sub);
    out.push_sql(close);
    Ok(())
}

/// Remove the first leading `and`/`or` word (case-insensitive), preserving
/// the whitespace around it. Only the very first connector is stripped.
fn strip_leading_connector(text: &str) -> String {
    let start = text.len() - text.trim_start().len();
    let rest = &text[start..];
    for word in ["and", "or"] {
        if rest.len() >= word.len()
            && rest.is_char_boundary(word.len())
            && rest[..word.len()].eq_ignore_ascii_case(word)
        {
            let after = &rest[word.len()..];
            if after.is_empty() || after.starts_with(char::is_whitespace) {
                return format!("{}{}", &text[..start], after);
            }
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::registry::default_registry;
    use pretty_assertions::assert_eq;

    fn ctx_num(value: i64) -> ParamContext {
        let mut ctx = ParamContext::new();
        ctx.insert("ctxNumber", value);
        ctx
    }

    #[test]
    fn plain_text() {
        let sql = parse("text body").unwrap();
        let bound = sql.build_query(&ParamContext::new(), default_registry()).unwrap();
        assert!(!sql.is_have_injection());
        assert_eq!(bound.sql_string(), "text body");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn placeholder_inlines_value() {
        let sql = parse("text body ${ctxNumber}").unwrap();
        let bound = sql.build_query(&ctx_num(456), default_registry()).unwrap();
        assert!(sql.is_have_injection());
        assert_eq!(bound.sql_string(), "text body 456");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn parameter_binds_value() {
        let sql = parse("age = #{ctxNumber}").unwrap();
        let bound = sql.build_query(&ctx_num(123), default_registry()).unwrap();
        assert!(!sql.is_have_injection());
        assert_eq!(bound.sql_string(), "age = ?");
        assert_eq!(bound.args().len(), 1);
        assert_eq!(bound.args()[0].value, Value::Int(123));
        assert_eq!(bound.args()[0].name.as_deref(), Some("ctxNumber"));
    }

    #[test]
    fn if_tag_gates_children() {
        let sql = parse("if (ctxNumber == 123) {age = #{ctxNumber}}").unwrap();
        assert!(!sql.is_have_injection());

        let hit = sql.build_query(&ctx_num(123), default_registry()).unwrap();
        assert_eq!(hit.sql_string(), "age = ?");
        assert_eq!(hit.args().len(), 1);
        assert_eq!(hit.args()[0].value, Value::Int(123));

        let miss = sql.build_query(&ctx_num(456), default_registry()).unwrap();
        assert_eq!(miss.sql_string(), "");
        assert!(miss.args().is_empty());
    }

    #[test]
    fn if_tag_with_placeholder_body() {
        let sql = parse("if (ctxNumber == 123) {age = ${ctxNumber}}").unwrap();
        assert!(sql.is_have_injection());
        let bound = sql.build_query(&ctx_num(123), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "age = 123");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn choose_takes_first_matching_branch() {
        let template = "choose { \
                        when (ctxNumber < 123) {age = #{ctxNumber}} \
                        when (ctxNumber < 500) {age = ${ctxNumber}} \
                        otherwise {1 = 1} }";
        let sql = parse(template).unwrap();
        assert!(sql.is_have_injection());

        let first = sql.build_query(&ctx_num(100), default_registry()).unwrap();
        assert_eq!(first.sql_string(), "age = ?");
        assert_eq!(first.args().len(), 1);
        assert_eq!(first.args()[0].value, Value::Int(100));

        let second = sql.build_query(&ctx_num(400), default_registry()).unwrap();
        assert_eq!(second.sql_string(), "age = 400");
        assert!(second.args().is_empty());

        let fallback = sql.build_query(&ctx_num(500), default_registry()).unwrap();
        assert_eq!(fallback.sql_string(), "1 = 1");
        assert!(fallback.args().is_empty());
    }

    #[test]
    fn choose_without_match_or_otherwise_is_empty() {
        let sql = parse("choose { when (ctxNumber < 10) {age = #{ctxNumber}} }").unwrap();
        let bound = sql.build_query(&ctx_num(99), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn foreach_joins_iterations() {
        let sql = parse("foreach (array, item, '(', ')', ',') {#{item}}").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("array", vec!["a", "b", "c", "d", "e"]);
        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        assert!(!sql.is_have_injection());
        assert_eq!(bound.sql_string(), "(?,?,?,?,?)");
        let values: Vec<_> = bound.args().iter().map(|a| a.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into()),
                Value::String("d".into()),
                Value::String("e".into()),
            ]
        );
    }

    #[test]
    fn foreach_empty_collection_renders_nothing() {
        let sql = parse("foreach (array, item, '(', ')', ',') {#{item}}").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("array", Vec::<i64>::new());
        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "");
        assert!(bound.args().is_empty());

        // Absent collection behaves the same.
        let bound = sql.build_query(&ParamContext::new(), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "");
    }

    #[test]
    fn foreach_restores_shadowed_item() {
        let sql = parse("foreach (array, item, '', '', ',') {#{item}} #{item}").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("array", vec![1, 2]);
        ctx.insert("item", "outer");
        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "?,? ?");
        assert_eq!(bound.args()[2].value, Value::String("outer".into()));
    }

    #[test]
    fn where_tag_empty_body() {
        let sql = parse("where {}").unwrap();
        let bound = sql.build_query(&ParamContext::new(), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn where_tag_prepends_keyword() {
        let sql = parse("where {abc = #{ctxNumber}}").unwrap();
        let bound = sql.build_query(&ctx_num(456), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "where abc = ? ");
        assert_eq!(bound.args().len(), 1);
        assert_eq!(bound.args()[0].value, Value::Int(456));
    }

    #[test]
    fn where_tag_strips_only_first_connector() {
        let sql = parse("where { and abc = #{ctxNumber} and abc = #{ctxNumber}}").unwrap();
        let bound = sql.build_query(&ctx_num(456), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "where  abc = ? and abc = ? ");
        assert_eq!(bound.args().len(), 2);
        assert_eq!(bound.args()[0].value, Value::Int(456));
        assert_eq!(bound.args()[1].value, Value::Int(456));
    }

    #[test]
    fn where_tag_strips_leading_or() {
        let sql = parse("where { OR abc = #{ctxNumber}}").unwrap();
        let bound = sql.build_query(&ctx_num(1), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "where  abc = ? ");
    }

    #[test]
    fn set_tag_empty_body() {
        let sql = parse("set {}").unwrap();
        let bound = sql.build_query(&ParamContext::new(), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn set_tag_single_assignment() {
        let sql = parse("set {abc = #{ctxNumber}}").unwrap();
        let bound = sql.build_query(&ctx_num(456), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "set abc = ? ");
        assert_eq!(bound.args().len(), 1);
        assert_eq!(bound.args()[0].value, Value::Int(456));
    }

    #[test]
    fn set_tag_strips_one_trailing_comma() {
        let sql = parse("set {abc = #{ctxNumber},abc = #{ctxNumber},}").unwrap();
        let bound = sql.build_query(&ctx_num(456), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "set abc = ?,abc = ? ");
        assert_eq!(bound.args().len(), 2);
    }

    #[test]
    fn bind_is_call_local() {
        let sql = parse("bind (doubled, x * 2)v = #{doubled}").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("x", 21);

        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        assert!(!sql.is_have_injection());
        assert_eq!(bound.sql_string(), "v = ?");
        assert_eq!(bound.args()[0].value, Value::Int(42));

        // The caller's context is untouched.
        assert!(!ctx.contains("doubled"));
    }

    #[test]
    fn macro_tag_inlines_registry_text() {
        let mut registry = RegistryManager::new();
        registry.add_macro("abc", "aacc");

        let sql = parse("macro (abc)").unwrap();
        let bound = sql.build_query(&ctx_num(456), &registry).unwrap();
        assert!(sql.is_have_injection());
        assert_eq!(bound.sql_string(), "aacc");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn macro_tag_missing_name_fails() {
        let sql = parse("macro (missing)").unwrap();
        let err = sql
            .build_query(&ParamContext::new(), default_registry())
            .unwrap_err();
        assert!(matches!(err, DynSqlError::Resolution(_)));
    }

    #[test]
    fn include_splices_fragment_with_space_guard() {
        let mut registry = RegistryManager::new();
        registry.add_fragment("by_id", parse("id = #{id}").unwrap());

        let sql = parse("select * from users where include (by_id)").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("id", 7);
        let bound = sql.build_query(&ctx, &registry).unwrap();
        assert_eq!(bound.sql_string(), "select * from users where id = ? ");
        assert_eq!(bound.args()[0].value, Value::Int(7));
    }

    #[test]
    fn include_inserts_missing_space() {
        let mut registry = RegistryManager::new();
        registry.add_fragment("cond", parse("id = 1").unwrap());

        // No whitespace before the tag: the guard inserts one.
        let sql = parse("select * from t where-include (cond)").unwrap();
        let bound = sql.build_query(&ParamContext::new(), &registry).unwrap();
        assert_eq!(bound.sql_string(), "select * from t where- id = 1 ");
    }

    #[test]
    fn include_missing_fragment_fails() {
        let sql = parse("include (nope)").unwrap();
        let err = sql
            .build_query(&ParamContext::new(), default_registry())
            .unwrap_err();
        assert!(matches!(err, DynSqlError::Resolution(_)));
    }

    #[test]
    fn position_args_read_from_context() {
        let sql = parse("a = ? and b = ?").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("arg0", "first");
        ctx.insert("arg1", "second");
        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "a = ? and b = ?");
        assert_eq!(bound.args()[0].name.as_deref(), Some("arg0"));
        assert_eq!(bound.args()[0].value, Value::String("first".into()));
        assert_eq!(bound.args()[1].value, Value::String("second".into()));
    }

    #[test]
    fn named_parameter_token() {
        let sql = parse("a = :a -- this is comment").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("a", 1);
        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "a = ? -- this is comment");
        assert_eq!(bound.args().len(), 1);
        assert_eq!(bound.args()[0].name.as_deref(), Some("a"));
    }

    #[test]
    fn named_parameter_with_path_binds_nested_value() {
        let sql = parse("a = :id.ccc['aaa'][0]").unwrap();
        let ctx = ParamContext::from_json(serde_json::json!({
            "id": { "ccc": { "aaa": [7, 8] } }
        }));
        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "a = ?");
        assert_eq!(bound.args()[0].value, Value::Int(7));
    }

    #[test]
    fn where_tag_handles_multibyte_text() {
        let sql = parse("where {ab€ = 1}").unwrap();
        let bound = sql.build_query(&ParamContext::new(), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "where ab€ = 1 ");
        assert!(bound.args().is_empty());
    }

    #[test]
    fn attribute_only_out_parameter_builds() {
        let sql = parse("call proc(#{name=out1, mode=OUT, jdbcType=VARCHAR})").unwrap();
        let bound = sql.build_query(&ParamContext::new(), default_registry()).unwrap();
        assert_eq!(bound.sql_string(), "call proc(?)");
        let arg = &bound.args()[0];
        assert_eq!(arg.name.as_deref(), Some("out1"));
        assert_eq!(arg.mode, SqlMode::Out);
        assert_eq!(arg.value, Value::Null);
        assert_eq!(arg.jdbc_type, Some(JdbcType::Varchar));
    }

    #[test]
    fn untyped_null_defaults_to_varchar() {
        let sql = parse("a = #{missing}").unwrap();
        let bound = sql.build_query(&ParamContext::new(), default_registry()).unwrap();
        assert_eq!(bound.args()[0].value, Value::Null);
        assert_eq!(bound.args()[0].jdbc_type, Some(JdbcType::Varchar));
    }

    #[test]
    fn declared_types_reach_the_argument() {
        let sql = parse("a = #{x, mode=OUT, jdbcType=INT, valueType=i64, name=foo}").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("x", 5);
        let bound = sql.build_query(&ctx, default_registry()).unwrap();
        let arg = &bound.args()[0];
        assert_eq!(arg.name.as_deref(), Some("foo"));
        assert_eq!(arg.mode, crate::types::SqlMode::Out);
        assert_eq!(arg.jdbc_type, Some(JdbcType::Integer));
        assert_eq!(arg.value_type.as_deref(), Some("i64"));
        assert_eq!(
            arg.type_handler.as_ref().map(|h| h.name().to_string()),
            Some("long".to_string())
        );
    }

    #[test]
    fn unknown_type_handler_fails() {
        let sql = parse("a = #{x, typeHandler=nope}").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("x", 5);
        let err = sql.build_query(&ctx, default_registry()).unwrap_err();
        assert!(matches!(err, DynSqlError::TypeBinding(_)));
    }

    #[test]
    fn build_is_deterministic() {
        let sql = parse("where { and a = #{x} and b = ${x}}").unwrap();
        let mut ctx = ParamContext::new();
        ctx.insert("x", 9);
        let first = sql.build_query(&ctx, default_registry()).unwrap();
        let second = sql.build_query(&ctx, default_registry()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_rule_fails() {
        let sql = parse("@{bogus,a = 1}").unwrap();
        let err = sql
            .build_query(&ParamContext::new(), default_registry())
            .unwrap_err();
        assert!(matches!(err, DynSqlError::Resolution(_)));
    }
}
