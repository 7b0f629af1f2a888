//! Expression evaluation capability.
//!
//! The engine consumes expressions through the [`Evaluator`] trait; the
//! bundled [`DefaultEvaluator`] covers property/index access, arithmetic,
//! comparisons and boolean logic. Anything richer (method calls, full object
//! graphs) belongs to a caller-supplied implementation registered on the
//! [`RegistryManager`](crate::registry::RegistryManager).

mod expr;


pub use expr::truthy;

use crate::context::ParamContext;
use crate::error::DynSqlResult;
use crate::value::Value;
use std::fmt;

pub trait Evaluator: Send + Sync + fmt::Debug {
    /// Evaluate `expr` against the call context.
    fn evaluate(&self, expr: &str, data: &ParamContext) -> DynSqlResult<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn evaluate(&self, expr: &str, data: &ParamContext) -> DynSqlResult<Value> {
        let parsed = expr::parse_expr(expr)?;
        expr::eval(&parsed, data)
    }
}
