//! Expression grammar and interpreter for the default evaluator.
//!
//! Supports property paths (`user.futures.ext2`, `row['key'][0]`), literals,
//! arithmetic, comparisons and boolean logic. Kept deliberately small: the
//! evaluator is an injectable capability and callers with richer needs plug
//! in their own.

use crate::context::ParamContext;
use crate::error::{DynSqlError, DynSqlResult};
use crate::value::Value;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, opt, recognize},
    sequence::{delimited, pair, preceded},
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Path(String, Vec<PathSeg>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathSeg {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Parse a complete expression; trailing content is an error.
pub(crate) fn parse_expr(input: &str) -> DynSqlResult<Expr> {
    match expr(input) {
        Ok((rest, parsed)) if rest.trim().is_empty() => Ok(parsed),
        Ok((rest, _)) => Err(DynSqlError::evaluation(format!(
            "unexpected trailing content '{rest}' in expression '{input}'"
        ))),
        Err(e) => Err(DynSqlError::evaluation(format!(
            "cannot parse expression '{input}': {e:?}"
        ))),
    }
}

fn expr(input: &str) -> IResult<&str, Expr> {
    binary_level(input, and_level, &[("||", BinOp::Or)], &[("or", BinOp::Or)])
}

fn and_level(input: &str) -> IResult<&str, Expr> {
    binary_level(input, cmp_level, &[("&&", BinOp::And)], &[("and", BinOp::And)])
}

fn cmp_level(input: &str) -> IResult<&str, Expr> {
    binary_level(
        input,
        add_level,
        &[
            ("==", BinOp::Eq),
            ("!=", BinOp::Ne),
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ],
        &[],
    )
}

fn add_level(input: &str) -> IResult<&str, Expr> {
    binary_level(input, mul_level, &[("+", BinOp::Add), ("-", BinOp::Sub)], &[])
}

fn mul_level(input: &str) -> IResult<&str, Expr> {
    binary_level(
        input,
        unary,
        &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
        &[],
    )
}

/// Left-associative binary operator tier; `word_ops` require a word boundary.
fn binary_level<'a>(
    input: &'a str,
    next: fn(&'a str) -> IResult<&'a str, Expr>,
    ops: &[(&'static str, BinOp)],
    word_ops: &[(&'static str, BinOp)],
) -> IResult<&'a str, Expr> {
    let (mut rest, mut lhs) = next(input)?;
    'scan: loop {
        let (after_ws, _) = multispace0(rest)?;
        for (token, op) in ops {
            if let Ok((after_op, _)) = tag::<_, _, nom::error::Error<&str>>(*token)(after_ws) {
                let (after_rhs, rhs) = next(after_op)?;
                lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                rest = after_rhs;
                continue 'scan;
            }
        }
        for (word, op) in word_ops {
            if let Ok((after_op, _)) = keyword(word)(after_ws) {
                let (after_rhs, rhs) = next(after_op)?;
                lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                rest = after_rhs;
                continue 'scan;
            }
        }
        return Ok((rest, lhs));
    }
}

fn unary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('!')(input) {
        let (rest, inner) = unary(rest)?;
        return Ok((rest, Expr::Unary(UnaryOp::Not, Box::new(inner))));
    }
    if let Ok((rest, _)) = keyword("not")(input) {
        let (rest, inner) = unary(rest)?;
        return Ok((rest, Expr::Unary(UnaryOp::Not, Box::new(inner))));
    }
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('-')(input) {
        let (rest, inner) = unary(rest)?;
        return Ok((rest, Expr::Unary(UnaryOp::Neg, Box::new(inner))));
    }
    primary(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    alt((
        map(keyword("true"), |_| Expr::Literal(Value::Bool(true))),
        map(keyword("false"), |_| Expr::Literal(Value::Bool(false))),
        map(keyword("null"), |_| Expr::Literal(Value::Null)),
        number,
        quoted_string,
        delimited(char('('), expr, preceded(multispace0, char(')'))),
        path,
    ))(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let value = if text.contains('.') {
        Value::Float(text.parse().unwrap_or(0.0))
    } else {
        Value::Int(text.parse().unwrap_or(0))
    };
    Ok((rest, Expr::Literal(value)))
}

fn quoted_string(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            |s: &str| Expr::Literal(Value::String(s.to_string())),
        ),
        map(
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            |s: &str| Expr::Literal(Value::String(s.to_string())),
        ),
    ))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

fn path(input: &str) -> IResult<&str, Expr> {
    let (mut rest, root) = identifier(input)?;
    let mut segs = Vec::new();
    loop {
        if let Ok((after, key)) = preceded(char::<_, nom::error::Error<&str>>('.'), identifier)(rest)
        {
            segs.push(PathSeg::Key(key.to_string()));
            rest = after;
            continue;
        }
        if let Ok((after, seg)) = index_seg(rest) {
            segs.push(seg);
            rest = after;
            continue;
        }
        break;
    }
    Ok((rest, Expr::Path(root.to_string(), segs)))
}

fn index_seg(input: &str) -> IResult<&str, PathSeg> {
    delimited(
        pair(char('['), multispace0),
        alt((
            map(digit1, |d: &str| PathSeg::Index(d.parse().unwrap_or(0))),
            map(
                delimited(char('\''), take_while(|c| c != '\''), char('\'')),
                |s: &str| PathSeg::Key(s.to_string()),
            ),
            map(
                delimited(char('"'), take_while(|c| c != '"'), char('"')),
                |s: &str| PathSeg::Key(s.to_string()),
            ),
        )),
        pair(multispace0, char(']')),
    )(input)
}

/// Match a bare word not followed by an identifier character.
fn keyword(word: &'static str) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input: &str| {
        let (rest, matched) = tag(word)(input)?;
        match rest.chars().next() {
            Some(c) if c.is_alphanumeric() || c == '_' => Err(nom::Err::Error(
                nom::error::Error::new(input, nom::error::ErrorKind::Tag),
            )),
            _ => Ok((rest, matched)),
        }
    }
}

/// Boolean interpretation used by `if` / `when` tests: `Bool` as-is, `Null`
/// is false, anything else is rejected.
pub fn truthy(value: &Value) -> DynSqlResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(DynSqlError::evaluation(format!(
            "expected a boolean test result, got {other:?}"
        ))),
    }
}

pub(crate) fn eval(expr: &Expr, data: &ParamContext) -> DynSqlResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(root, segs) => {
            let mut current = data.get(root).cloned().unwrap_or(Value::Null);
            for seg in segs {
                current = match (&current, seg) {
                    (Value::Object(map), PathSeg::Key(key)) => {
                        map.get(key).cloned().unwrap_or(Value::Null)
                    }
                    (Value::Array(items), PathSeg::Index(idx)) => {
                        items.get(*idx).cloned().unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                };
            }
            Ok(current)
        }
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!truthy(&eval(inner, data)?)?)),
        Expr::Unary(UnaryOp::Neg, inner) => match eval(inner, data)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(DynSqlError::evaluation(format!(
                "cannot negate {other:?}"
            ))),
        },
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !truthy(&eval(lhs, data)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(rhs, data)?)?))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if truthy(&eval(lhs, data)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(rhs, data)?)?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = eval(lhs, data)?;
            let right = eval(rhs, data)?;
            apply_binary(*op, left, right)
        }
    }
}

fn apply_binary(op: BinOp, left: Value, right: Value) -> DynSqlResult<Value> {
    match op {
        BinOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&left, &right)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::Add => match (&left, &right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{left}{right}")))
            }
            _ => numeric_op(op, left, right),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => numeric_op(op, left, right),
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled by eval"),
    }
}

fn numeric_op(op: BinOp, left: Value, right: Value) -> DynSqlResult<Value> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            if b == 0 && matches!(op, BinOp::Div | BinOp::Rem) {
                return Err(DynSqlError::evaluation("division by zero"));
            }
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                BinOp::Rem => a.checked_rem(b),
                _ => unreachable!(),
            };
            result.map(Value::Int).ok_or_else(|| {
                DynSqlError::evaluation(format!("integer overflow evaluating {a} {op:?} {b}"))
            })
        }
        _ => {
            let a = as_f64(&left)?;
            let b = as_f64(&right)?;
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div | BinOp::Rem if b == 0.0 => {
                    Err(DynSqlError::evaluation("division by zero"))
                }
                BinOp::Div => Ok(Value::Float(a / b)),
                BinOp::Rem => Ok(Value::Float(a % b)),
                _ => unreachable!(),
            }
        }
    }
}

fn as_f64(value: &Value) -> DynSqlResult<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(DynSqlError::evaluation(format!(
            "expected a number, got {other:?}"
        ))),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> DynSqlResult<std::cmp::Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => {
            let a = as_f64(left)?;
            let b = as_f64(right)?;
            a.partial_cmp(&b).ok_or_else(|| {
                DynSqlError::evaluation(format!("cannot compare {left:?} with {right:?}"))
            })
        }
    }
}
