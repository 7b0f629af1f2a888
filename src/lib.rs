pub mod ast;
pub mod builder;
pub mod context;
pub mod error;
pub mod eval;
pub mod parser;
pub mod registry;
pub mod rules;
pub mod types;
pub mod value;

mod engine;

pub use ast::DynamicSql;
pub use parser::parse;

pub mod prelude {
    pub use crate::ast::{DynamicSql, ParamSpec, SqlNode};
    pub use crate::builder::{BoundSql, SqlArg};
    pub use crate::context::ParamContext;
    pub use crate::error::{DynSqlError, DynSqlResult};
    pub use crate::eval::{DefaultEvaluator, Evaluator};
    pub use crate::parser::parse;
    pub use crate::registry::{default_registry, RegistryManager};
    pub use crate::rules::SqlRule;
    pub use crate::types::{JdbcType, SqlMode, TypeHandler};
    pub use crate::value::Value;
}
