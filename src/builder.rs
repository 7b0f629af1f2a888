//! The build output: parameterized SQL text plus its ordered argument list.

use crate::types::{JdbcType, SqlMode, TypeHandler};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// One bound argument of a built query.
#[derive(Clone)]
pub struct SqlArg {
    pub name: Option<String>,
    pub value: Value,
    pub mode: SqlMode,
    pub jdbc_type: Option<JdbcType>,
    pub value_type: Option<String>,
    pub type_handler: Option<Arc<dyn TypeHandler>>,
}

impl SqlArg {
    /// Plain input argument with defaults everywhere else.
    pub fn input(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            value: value.into(),
            mode: SqlMode::In,
            jdbc_type: None,
            value_type: None,
            type_handler: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn handler_name(&self) -> Option<&str> {
        self.type_handler.as_deref().map(TypeHandler::name)
    }
}

impl fmt::Debug for SqlArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlArg")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("mode", &self.mode)
            .field("jdbc_type", &self.jdbc_type)
            .field("value_type", &self.value_type)
            .field("type_handler", &self.handler_name())
            .finish()
    }
}

impl PartialEq for SqlArg {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.value == other.value
            && self.mode == other.mode
            && self.jdbc_type == other.jdbc_type
            && self.value_type == other.value_type
            && self.handler_name() == other.handler_name()
    }
}

/// Accumulated SQL text and arguments for one `build_query` call.
///
/// Invariant: for templates without `Out` parameters, the count of `?`
/// placeholders in the text equals the count of arguments, in the same
/// left-to-right order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundSql {
    sql: String,
    args: Vec<SqlArg>,
}

impl BoundSql {
    pub fn sql_string(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[SqlArg] {
        &self.args
    }

    pub fn into_parts(self) -> (String, Vec<SqlArg>) {
        (self.sql, self.args)
    }

    pub(crate) fn push_sql(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Append one `?` placeholder and its argument record.
    pub(crate) fn push_arg(&mut self, arg: SqlArg) {
        self.sql.push('?');
        self.args.push(arg);
    }

    pub(crate) fn push_args(&mut self, args: impl IntoIterator<Item = SqlArg>) {
        self.args.extend(args);
    }

    pub(crate) fn extend(&mut self, other: BoundSql) {
        self.sql.push_str(&other.sql);
        self.args.extend(other.args);
    }

    /// Append a nested fragment, inserting a single space at either boundary
    /// when the adjoining text lacks whitespace. Guards against accidental
    /// token concatenation when splicing include fragments.
    pub(crate) fn extend_spaced(&mut self, other: BoundSql) {
        if other.sql.is_empty() && other.args.is_empty() {
            return;
        }
        if !self.sql.is_empty()
            && !self.sql.ends_with(char::is_whitespace)
            && !other.sql.starts_with(char::is_whitespace)
        {
            self.sql.push(' ');
        }
        let ends_bare = !other.sql.is_empty() && !other.sql.ends_with(char::is_whitespace);
        self.extend(other);
        if ends_bare {
            self.sql.push(' ');
        }
    }
}
