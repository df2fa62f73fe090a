use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::{
    config::BinderConfig,
    dom::Document,
    evaluator::{DisabledEvaluator, ExpressionEvaluator},
    registry::ElementHost,
};

/// Collaborators every controller of one document shares.
#[derive(Clone)]
pub struct Runtime {
    document: Document,
    config: Arc<BinderConfig>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    host: Arc<Mutex<Option<Weak<dyn ElementHost>>>>,
}

impl Runtime {
    pub fn new(document: Document, config: BinderConfig) -> Self {
        Self {
            document,
            config: Arc::new(config),
            evaluator: Arc::new(DisabledEvaluator),
            host: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    /// The registry upgrading elements of this document, while it is alive.
    pub fn element_host(&self) -> Option<Arc<dyn ElementHost>> {
        self.host
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn install_host(&self, host: Weak<dyn ElementHost>) {
        *self.host.lock().unwrap_or_else(PoisonError::into_inner) = Some(host);
    }
}
