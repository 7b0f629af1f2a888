//! Argument direction, declared SQL types and type-handler resolution.

use crate::error::{DynSqlError, DynSqlResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Statement-binding direction of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SqlMode {
    #[default]
    In,
    Out,
    InOut,
}

impl SqlMode {
    /// Case-insensitive attribute form (`mode=INOUT`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "in" => Some(SqlMode::In),
            "out" => Some(SqlMode::Out),
            "inout" => Some(SqlMode::InOut),
            _ => None,
        }
    }
}

/// Declared column type codes, mirroring the usual JDBC set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JdbcType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    NChar,
    NVarchar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Clob,
    NClob,
    Boolean,
    Null,
    Other,
}

impl JdbcType {
    /// Case-insensitive attribute form (`jdbcType=VARCHAR`); a few common
    /// aliases are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bit" => Some(Self::Bit),
            "tinyint" => Some(Self::TinyInt),
            "smallint" => Some(Self::SmallInt),
            "integer" | "int" => Some(Self::Integer),
            "bigint" | "long" => Some(Self::BigInt),
            "float" => Some(Self::Float),
            "real" => Some(Self::Real),
            "double" => Some(Self::Double),
            "numeric" => Some(Self::Numeric),
            "decimal" => Some(Self::Decimal),
            "char" => Some(Self::Char),
            "varchar" => Some(Self::Varchar),
            "longvarchar" => Some(Self::LongVarchar),
            "nchar" => Some(Self::NChar),
            "nvarchar" => Some(Self::NVarchar),
            "date" => Some(Self::Date),
            "time" => Some(Self::Time),
            "timestamp" => Some(Self::Timestamp),
            "binary" => Some(Self::Binary),
            "varbinary" => Some(Self::VarBinary),
            "longvarbinary" => Some(Self::LongVarBinary),
            "blob" => Some(Self::Blob),
            "clob" => Some(Self::Clob),
            "nclob" => Some(Self::NClob),
            "boolean" | "bool" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// External capability converting between a program value and its column
/// representation. Consumed, not implemented, by this engine: the resolved
/// handler is carried on each argument for the execution layer.
pub trait TypeHandler: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
}

/// Plain named handler used for all registry defaults.
#[derive(Debug, Clone)]
pub struct NamedTypeHandler {
    name: String,
}

impl NamedTypeHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TypeHandler for NamedTypeHandler {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Priority-chain handler resolution: explicit handler name, then declared
/// value type (optionally paired with a column type), then column type alone,
/// then the registry default.
#[derive(Debug, Clone)]
pub struct TypeHandlerRegistry {
    by_name: HashMap<String, Arc<dyn TypeHandler>>,
    by_value_type: HashMap<String, Arc<dyn TypeHandler>>,
    by_pair: HashMap<(String, JdbcType), Arc<dyn TypeHandler>>,
    by_jdbc: HashMap<JdbcType, Arc<dyn TypeHandler>>,
    default_handler: Arc<dyn TypeHandler>,
}

impl Default for TypeHandlerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            by_name: HashMap::new(),
            by_value_type: HashMap::new(),
            by_pair: HashMap::new(),
            by_jdbc: HashMap::new(),
            default_handler: Arc::new(NamedTypeHandler::new("unknown")),
        };

        let string = registry.register_named("string");
        let long = registry.register_named("long");
        let double = registry.register_named("double");
        let boolean = registry.register_named("boolean");
        let decimal = registry.register_named("decimal");
        let bytes = registry.register_named("bytes");
        let date = registry.register_named("date");
        let time = registry.register_named("time");
        let timestamp = registry.register_named("timestamp");

        registry.register_value_type("String", string.clone());
        registry.register_value_type("i32", long.clone());
        registry.register_value_type("i64", long.clone());
        registry.register_value_type("f32", double.clone());
        registry.register_value_type("f64", double.clone());
        registry.register_value_type("bool", boolean.clone());

        for jdbc in [
            JdbcType::Char,
            JdbcType::Varchar,
            JdbcType::LongVarchar,
            JdbcType::NChar,
            JdbcType::NVarchar,
            JdbcType::Clob,
            JdbcType::NClob,
        ] {
            registry.register_jdbc(jdbc, string.clone());
        }
        for jdbc in [
            JdbcType::Bit,
            JdbcType::TinyInt,
            JdbcType::SmallInt,
            JdbcType::Integer,
            JdbcType::BigInt,
        ] {
            registry.register_jdbc(jdbc, long.clone());
        }
        for jdbc in [JdbcType::Float, JdbcType::Real, JdbcType::Double] {
            registry.register_jdbc(jdbc, double.clone());
        }
        for jdbc in [JdbcType::Numeric, JdbcType::Decimal] {
            registry.register_jdbc(jdbc, decimal.clone());
        }
        for jdbc in [
            JdbcType::Binary,
            JdbcType::VarBinary,
            JdbcType::LongVarBinary,
            JdbcType::Blob,
        ] {
            registry.register_jdbc(jdbc, bytes.clone());
        }
        registry.register_jdbc(JdbcType::Boolean, boolean);
        registry.register_jdbc(JdbcType::Date, date);
        registry.register_jdbc(JdbcType::Time, time);
        registry.register_jdbc(JdbcType::Timestamp, timestamp);

        registry
    }
}

impl TypeHandlerRegistry {
    fn register_named(&mut self, name: &str) -> Arc<dyn TypeHandler> {
        let handler: Arc<dyn TypeHandler> = Arc::new(NamedTypeHandler::new(name));
        self.by_name.insert(name.to_string(), handler.clone());
        handler
    }

    pub fn register_handler(&mut self, name: impl Into<String>, handler: Arc<dyn TypeHandler>) {
        self.by_name.insert(name.into(), handler);
    }

    pub fn register_value_type(&mut self, value_type: impl Into<String>, handler: Arc<dyn TypeHandler>) {
        self.by_value_type.insert(value_type.into(), handler);
    }

    pub fn register_pair(
        &mut self,
        value_type: impl Into<String>,
        jdbc: JdbcType,
        handler: Arc<dyn TypeHandler>,
    ) {
        self.by_pair.insert((value_type.into(), jdbc), handler);
    }

    pub fn register_jdbc(&mut self, jdbc: JdbcType, handler: Arc<dyn TypeHandler>) {
        self.by_jdbc.insert(jdbc, handler);
    }

    pub fn default_handler(&self) -> Arc<dyn TypeHandler> {
        self.default_handler.clone()
    }

    /// Resolve a handler for one argument. An explicitly named handler that
    /// does not exist is a hard error; everything else falls through to the
    /// default handler.
    pub fn resolve(
        &self,
        value_type: Option<&str>,
        jdbc_type: Option<JdbcType>,
        handler_name: Option<&str>,
    ) -> DynSqlResult<Arc<dyn TypeHandler>> {
        if let Some(name) = handler_name {
            return self.by_name.get(name).cloned().ok_or_else(|| {
                DynSqlError::type_binding(format!("type handler '{name}' is not registered"))
            });
        }

        if let Some(vt) = value_type {
            if let Some(jdbc) = jdbc_type {
                if let Some(handler) = self.by_pair.get(&(vt.to_string(), jdbc)) {
                    return Ok(handler.clone());
                }
            }
            if let Some(handler) = self.by_value_type.get(vt) {
                return Ok(handler.clone());
            }
        }

        if let Some(jdbc) = jdbc_type {
            if let Some(handler) = self.by_jdbc.get(&jdbc) {
                return Ok(handler.clone());
            }
        }

        Ok(self.default_handler.clone())
    }
}
