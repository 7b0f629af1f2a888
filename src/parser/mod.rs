//! Template scanner: turns a template string into a [`DynamicSql`] tree.
//!
//! The scanner walks the template once, copying plain SQL through verbatim
//! (quoted literals and comments included) and lifting the token forms out
//! as nodes: `?`, `:name`, `&name`, `#{...}`, `${...}`, `@{...}` and the
//! control tags (`if`, `choose`, `foreach`, `where`, `set`, `bind`,
//! `include`, `macro`). A control keyword without its required punctuation
//! is ordinary text, so SQL like MySQL's `IF(a, b, c)` passes through
//! untouched.

mod tags;

#[cfg(test)]
mod tests;

use crate::ast::{DynamicSql, ParamSpec};
use crate::error::{DynSqlError, DynSqlResult};
use crate::types::{JdbcType, SqlMode};

/// Parse a template into an immutable tree. Positions in errors are byte
/// offsets into `template`.
pub fn parse(template: &str) -> DynSqlResult<DynamicSql> {
    let mut out = DynamicSql::new();
    parse_into(template, 0, &mut out)?;
    tracing::debug!(len = template.len(), nodes = out.nodes().len(), "parsed template");
    Ok(out)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The scanner body, reused for control-tag bodies. `base` is the absolute
/// offset of `src` in the original template, for error positions. Each call
/// numbers its raw `?` placeholders from zero.
pub(crate) fn parse_into(src: &str, base: usize, out: &mut DynamicSql) -> DynSqlResult<()> {
    let mut text = String::new();
    let mut position = 0usize;
    let mut i = 0;

    macro_rules! flush {
        () => {
            if !text.is_empty() {
                out.append_string(&text);
                text.clear();
            }
        };
    }

    while i < src.len() {
        let rest = &src[i..];
        let c = rest.chars().next().unwrap_or_default();
        match c {
            // Quoted literals pass through untouched, token forms inside
            // included.
            '\'' | '"' => match rest[1..].find(c) {
                Some(end) => {
                    let stop = i + 1 + end + c.len_utf8();
                    text.push_str(&src[i..stop]);
                    i = stop;
                }
                None => {
                    text.push_str(rest);
                    i = src.len();
                }
            },
            '-' if rest.starts_with("--") => match rest.find('\n') {
                Some(nl) => {
                    text.push_str(&rest[..nl]);
                    i += nl;
                }
                None => {
                    text.push_str(rest);
                    i = src.len();
                }
            },
            '/' if rest.starts_with("/*") => match rest.find("*/") {
                Some(end) => {
                    text.push_str(&rest[..end + 2]);
                    i += end + 2;
                }
                None => {
                    text.push_str(rest);
                    i = src.len();
                }
            },
            // Backslash escapes the next character into plain text.
            '\\' => match rest[1..].chars().next() {
                Some(next) => {
                    text.push(next);
                    i += 1 + next.len_utf8();
                }
                None => {
                    text.push('\\');
                    i += 1;
                }
            },
            '?' => {
                flush!();
                out.append_position_arg(position);
                position += 1;
                i += 1;
            }
            // "::" is the Postgres cast operator, not a named parameter.
            ':' if rest.starts_with("::") => {
                text.push_str("::");
                i += 2;
            }
            ':' | '&' => {
                if rest[1..].starts_with(['#', '@', '$']) {
                    return Err(DynSqlError::parse(
                        base + i,
                        format!("named parameter after '{c}' cannot start a substitution token"),
                    ));
                }
                // Names may carry property and index paths: :id.ccc['aaa'][0]
                let mut name_len = 0;
                for ch in rest[1..].chars() {
                    let part_of_name = if name_len == 0 {
                        is_ident_char(ch)
                    } else {
                        is_ident_char(ch) || matches!(ch, '.' | '[' | ']' | '\'')
                    };
                    if !part_of_name {
                        break;
                    }
                    name_len += ch.len_utf8();
                }
                if name_len == 0 {
                    text.push(c);
                    i += 1;
                } else {
                    let name = rest[1..1 + name_len].to_string();
                    flush!();
                    i += 1 + name_len;
                    out.append_value_expr(ParamSpec {
                        expr: name.clone(),
                        name: Some(name),
                        ..ParamSpec::default()
                    });
                    position += 1;
                }
            }
            '#' if rest.starts_with("#{") => {
                let close = find_close(rest, 1, '{', '}')
                    .ok_or_else(|| DynSqlError::parse(base + i, "unterminated '#{' token"))?;
                let spec = parse_param_content(&rest[2..close], base + i)?;
                flush!();
                out.append_value_expr(spec);
                position += 1;
                i += close + 1;
            }
            '$' if rest.starts_with("${") => {
                let close = find_close(rest, 1, '{', '}')
                    .ok_or_else(|| DynSqlError::parse(base + i, "unterminated '${' token"))?;
                flush!();
                out.append_placeholder_expr(rest[2..close].trim());
                i += close + 1;
            }
            '@' if rest.starts_with("@{") => {
                let close = find_close(rest, 1, '{', '}')
                    .ok_or_else(|| DynSqlError::parse(base + i, "unterminated '@{' token"))?;
                let (name, active_expr, body) = split_rule_content(&rest[2..close]);
                if name.is_empty() {
                    return Err(DynSqlError::parse(base + i, "rule name is empty"));
                }
                flush!();
                out.append_rule_expr(name, active_expr, body);
                i += close + 1;
            }
            c if c.is_ascii_lowercase() && at_word_boundary(src, i) => {
                match tags::try_tag(rest, base + i)? {
                    Some((node, used)) => {
                        flush!();
                        out.append_child(node);
                        i += used;
                    }
                    None => {
                        text.push(c);
                        i += 1;
                    }
                }
            }
            c => {
                text.push(c);
                i += c.len_utf8();
            }
        }
    }
    flush!();
    Ok(())
}

fn at_word_boundary(src: &str, i: usize) -> bool {
    src[..i].chars().next_back().is_none_or(|prev| !is_ident_char(prev))
}

/// Index of the delimiter matching the opener at `open_at`, counting nesting
/// and skipping quoted runs.
pub(crate) fn find_close(s: &str, open_at: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, c) in s[open_at..].char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                } else if c == open {
                    depth += 1;
                } else if c == close {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open_at + idx);
                    }
                }
            }
        }
    }
    None
}

/// Split on `sep` at the top level, skipping quoted runs.
pub(crate) fn split_quoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (idx, c) in s.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                } else if c == sep {
                    parts.push(&s[start..idx]);
                    start = idx + sep.len_utf8();
                }
            }
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Strip one pair of matching surrounding quotes, if present.
pub(crate) fn unquote(s: &str) -> &str {
    let trimmed = s.trim();
    for q in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(q) && trimmed.ends_with(q) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

/// `@{name, activeExpr, body}` content: the name is trimmed, the other two
/// slots keep their whitespace. Commas inside quotes do not split.
fn split_rule_content(content: &str) -> (String, Option<String>, Option<String>) {
    let parts = split_quoted(content, ',');
    let name = parts[0].trim().to_string();
    match parts.len() {
        1 => (name, None, None),
        2 => (name, Some(parts[1].to_string()), None),
        _ => {
            let body_start = parts[0].len() + 1 + parts[1].len() + 1;
            (name, Some(parts[1].to_string()), Some(content[body_start..].to_string()))
        }
    }
}

/// `#{expr, attr=value...}` content. `at` is the token's absolute offset,
/// used in error positions.
pub(crate) fn parse_param_content(content: &str, at: usize) -> DynSqlResult<ParamSpec> {
    let parts = split_quoted(content, ',');
    if parts.len() > 10 {
        return Err(DynSqlError::parse(at, "too many attributes in parameter token"));
    }
    // Attribute-only form: #{name=res, mode=OUT} carries no value
    // expression, and every slot including the first is an attribute.
    let first_is_attr = parts[0].contains('=');
    let mut spec = ParamSpec {
        expr: if first_is_attr {
            String::new()
        } else {
            parts[0].trim().to_string()
        },
        ..ParamSpec::default()
    };
    let attrs = if first_is_attr { &parts[..] } else { &parts[1..] };
    for part in attrs {
        if part.trim().is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| {
            DynSqlError::parse(at, format!("malformed attribute '{}'", part.trim()))
        })?;
        let value = unquote(value);
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => spec.name = Some(value.to_string()),
            "mode" => {
                spec.mode = SqlMode::from_name(value)
                    .ok_or_else(|| DynSqlError::parse(at, format!("unknown mode '{value}'")))?;
            }
            "jdbctype" => {
                spec.jdbc_type = Some(JdbcType::from_name(value).ok_or_else(|| {
                    DynSqlError::parse(at, format!("unknown jdbcType '{value}'"))
                })?);
            }
            "javatype" | "valuetype" => spec.value_type = Some(value.to_string()),
            "typehandler" => spec.type_handler = Some(value.to_string()),
            other => {
                return Err(DynSqlError::parse(at, format!("unknown attribute '{other}'")));
            }
        }
    }
    Ok(spec)
}
