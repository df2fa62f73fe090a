use serde_json::Value;
use shared::error::BinderError;

/// What an evaluated expression can see: the controller as `this` and, for
/// event handlers, the triggering event as `e`.
#[derive(Debug, Clone)]
pub struct EvalScope {
    pub this: Value,
    pub event: Option<Value>,
}

pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, source: &str, scope: &EvalScope) -> Result<Value, BinderError>;

    fn execute(&self, source: &str, scope: &EvalScope) -> Result<(), BinderError> {
        self.evaluate(source, scope).map(|_| ())
    }
}

/// Default evaluator: every expression fails.
pub struct DisabledEvaluator;

impl ExpressionEvaluator for DisabledEvaluator {
    fn evaluate(&self, source: &str, _scope: &EvalScope) -> Result<Value, BinderError> {
        Err(BinderError::Evaluation(format!(
            "no expression evaluator installed for `{source}`"
        )))
    }
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&str, &EvalScope) -> Result<Value, BinderError> + Send + Sync,
{
    fn evaluate(&self, source: &str, scope: &EvalScope) -> Result<Value, BinderError> {
        self(source, scope)
    }
}
