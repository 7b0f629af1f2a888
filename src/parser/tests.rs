use super::parse;
use crate::ast::{ParamSpec, SqlNode};
use crate::error::DynSqlError;
use crate::types::{JdbcType, SqlMode};
use pretty_assertions::assert_eq;

fn text(s: &str) -> SqlNode {
    SqlNode::Text(s.to_string())
}

#[test]
fn plain_text_is_one_node() {
    let sql = parse("select * from users").unwrap();
    assert_eq!(sql.nodes(), &[text("select * from users")]);
}

#[test]
fn parameter_token_with_expression_only() {
    let sql = parse("id = #{userId}").unwrap();
    assert_eq!(
        sql.nodes(),
        &[
            text("id = "),
            SqlNode::Parameter(ParamSpec {
                expr: "userId".to_string(),
                ..ParamSpec::default()
            }),
        ]
    );
    assert!(!sql.is_have_injection());
}

#[test]
fn parameter_token_with_attributes() {
    let sql = parse("#{res, name=out1, mode=OUT, jdbcType=VARCHAR, javaType=String, typeHandler=string}")
        .unwrap();
    let SqlNode::Parameter(spec) = &sql.nodes()[0] else {
        panic!("expected parameter node");
    };
    assert_eq!(spec.expr, "res");
    assert_eq!(spec.name.as_deref(), Some("out1"));
    assert_eq!(spec.mode, SqlMode::Out);
    assert_eq!(spec.jdbc_type, Some(JdbcType::Varchar));
    assert_eq!(spec.value_type.as_deref(), Some("String"));
    assert_eq!(spec.type_handler.as_deref(), Some("string"));
}

#[test]
fn unknown_attribute_fails() {
    let err = parse("#{x, bogus=1}").unwrap_err();
    assert!(matches!(err, DynSqlError::Parse { .. }));
}

#[test]
fn unterminated_parameter_token_fails() {
    let err = parse("id = #{userId").unwrap_err();
    let DynSqlError::Parse { position, .. } = err else {
        panic!("expected parse error");
    };
    assert_eq!(position, 5);
}

#[test]
fn placeholder_token() {
    let sql = parse("order by ${column}").unwrap();
    assert_eq!(
        sql.nodes(),
        &[text("order by "), SqlNode::Placeholder("column".to_string())]
    );
    assert!(sql.is_have_injection());
}

#[test]
fn position_args_number_left_to_right() {
    let sql = parse("a = ? and b = ?").unwrap();
    assert_eq!(
        sql.nodes(),
        &[
            text("a = "),
            SqlNode::PositionArg(0),
            text(" and b = "),
            SqlNode::PositionArg(1),
        ]
    );
}

#[test]
fn named_parameter_tokens() {
    let sql = parse("a = :a and b = &b").unwrap();
    let params: Vec<_> = sql
        .nodes()
        .iter()
        .filter_map(|n| match n {
            SqlNode::Parameter(spec) => Some(spec.name.clone().unwrap()),
            _ => None,
        })
        .collect();
    assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn named_parameter_with_property_path() {
    let sql = parse("a = :id.ccc['aaa'][0]").unwrap();
    assert_eq!(
        sql.nodes(),
        &[
            text("a = "),
            SqlNode::Parameter(ParamSpec {
                expr: "id.ccc['aaa'][0]".to_string(),
                name: Some("id.ccc['aaa'][0]".to_string()),
                ..ParamSpec::default()
            }),
        ]
    );
}

#[test]
fn attribute_only_parameter_token() {
    let sql = parse("call proc(#{name=out1, mode=OUT, jdbcType=VARCHAR})").unwrap();
    let SqlNode::Parameter(spec) = &sql.nodes()[1] else {
        panic!("expected parameter node");
    };
    assert_eq!(spec.expr, "");
    assert_eq!(spec.name.as_deref(), Some("out1"));
    assert_eq!(spec.mode, SqlMode::Out);
    assert_eq!(spec.jdbc_type, Some(JdbcType::Varchar));
}

#[test]
fn named_parameter_cannot_start_a_substitution_token() {
    let err = parse("a = :#{x}").unwrap_err();
    assert!(matches!(err, DynSqlError::Parse { .. }));
}

#[test]
fn postgres_cast_is_not_a_named_parameter() {
    let sql = parse("select id::text from t").unwrap();
    assert_eq!(sql.nodes(), &[text("select id::text from t")]);
}

#[test]
fn tokens_inside_quotes_are_text() {
    let sql = parse("select '#{notAToken}' || \"${alsoText}\" || '?'").unwrap();
    assert_eq!(
        sql.nodes(),
        &[text("select '#{notAToken}' || \"${alsoText}\" || '?'")]
    );
}

#[test]
fn tokens_inside_comments_are_text() {
    let sql = parse("select 1 -- #{x} ?\n/* ${y} ? */ from dual").unwrap();
    assert_eq!(
        sql.nodes(),
        &[text("select 1 -- #{x} ?\n/* ${y} ? */ from dual")]
    );
}

#[test]
fn backslash_escapes_token_start() {
    let sql = parse(r"a = \#{x}").unwrap();
    assert_eq!(sql.nodes(), &[text("a = #{x}")]);
}

#[test]
fn if_tag_shape() {
    let sql = parse("if (ok) {a = #{a}}").unwrap();
    let SqlNode::If { test, body } = &sql.nodes()[0] else {
        panic!("expected if node");
    };
    assert_eq!(test, "ok");
    assert_eq!(body.nodes().len(), 2);
}

#[test]
fn if_without_brace_stays_text() {
    // MySQL's IF(a, b, c) function must survive.
    let sql = parse("select if(a, b, c) from t").unwrap();
    assert_eq!(sql.nodes(), &[text("select if(a, b, c) from t")]);
}

#[test]
fn control_keyword_without_punctuation_stays_text() {
    let sql = parse("select * from t where a = 1").unwrap();
    assert_eq!(sql.nodes(), &[text("select * from t where a = 1")]);
}

#[test]
fn keyword_inside_identifier_stays_text() {
    let sql = parse("select iffy, wheres from t").unwrap();
    assert_eq!(sql.nodes(), &[text("select iffy, wheres from t")]);
}

#[test]
fn choose_tag_shape() {
    let sql = parse("choose { when (a) {1} when (b) {2} otherwise {3} }").unwrap();
    let SqlNode::Choose { whens, otherwise } = &sql.nodes()[0] else {
        panic!("expected choose node");
    };
    assert_eq!(whens.len(), 2);
    assert_eq!(whens[0].0, "a");
    assert_eq!(whens[1].0, "b");
    assert!(otherwise.is_some());
}

#[test]
fn choose_with_stray_content_fails() {
    let err = parse("choose { junk }").unwrap_err();
    assert!(matches!(err, DynSqlError::Parse { .. }));
}

#[test]
fn foreach_tag_shape() {
    let sql = parse("foreach (ids, id, '(', ')', ', ') {#{id}}").unwrap();
    let SqlNode::Foreach {
        collection,
        item,
        open,
        close,
        separator,
        body,
    } = &sql.nodes()[0]
    else {
        panic!("expected foreach node");
    };
    assert_eq!(collection, "ids");
    assert_eq!(item, "id");
    assert_eq!(open, "(");
    assert_eq!(close, ")");
    assert_eq!(separator, ", ");
    assert_eq!(body.nodes().len(), 1);
}

#[test]
fn foreach_with_wrong_arity_fails() {
    let err = parse("foreach (ids, id) {#{id}}").unwrap_err();
    assert!(matches!(err, DynSqlError::Parse { .. }));
}

#[test]
fn bind_tag_shape() {
    let sql = parse("bind (pattern, '%' + name + '%')").unwrap();
    assert_eq!(
        sql.nodes(),
        &[SqlNode::Bind {
            name: "pattern".to_string(),
            expr: "'%' + name + '%'".to_string(),
        }]
    );
}

#[test]
fn include_and_macro_tags() {
    let sql = parse("include (common) macro (frag)").unwrap();
    assert_eq!(
        sql.nodes(),
        &[
            SqlNode::Include {
                ref_name: "common".to_string()
            },
            text(" "),
            SqlNode::Macro {
                ref_name: "frag".to_string()
            },
        ]
    );
    assert!(sql.is_have_injection());
}

#[test]
fn rule_token_splits_three_slots() {
    let sql = parse("@{ifand, a == 1, a = #{a}}").unwrap();
    assert_eq!(
        sql.nodes(),
        &[SqlNode::Rule {
            name: "ifand".to_string(),
            active_expr: Some(" a == 1".to_string()),
            body: Some(" a = #{a}".to_string()),
        }]
    );
    assert!(sql.is_have_injection());
}

#[test]
fn rule_token_keeps_commas_in_body() {
    let sql = parse("@{ifin, ok, id in (1, 2, 3)}").unwrap();
    let SqlNode::Rule { body, .. } = &sql.nodes()[0] else {
        panic!("expected rule node");
    };
    assert_eq!(body.as_deref(), Some(" id in (1, 2, 3)"));
}

#[test]
fn rule_token_with_empty_name_fails() {
    let err = parse("@{ , a}").unwrap_err();
    assert!(matches!(err, DynSqlError::Parse { .. }));
}

#[test]
fn nested_tags_parse() {
    let sql = parse("where { if (useName) {and name = #{name}} }").unwrap();
    let SqlNode::Where(body) = &sql.nodes()[0] else {
        panic!("expected where node");
    };
    assert!(body
        .nodes()
        .iter()
        .any(|n| matches!(n, SqlNode::If { .. })));
}

#[test]
fn nested_bodies_restart_position_numbering() {
    let sql = parse("a = ? if (x) {b = ?}").unwrap();
    assert_eq!(sql.nodes()[1], SqlNode::PositionArg(0));
    let SqlNode::If { body, .. } = &sql.nodes()[3] else {
        panic!("expected if node");
    };
    assert_eq!(body.nodes()[1], SqlNode::PositionArg(0));
}
