//! Procedure registry (part of C6): method name -> handler, with the
//! reserved `_dir` entry auto-registered at construction time.

use crate::codec::Value;
use crate::error::ApplicationError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub const DIR_METHOD: &str = "_dir";

/// A registered procedure. Handlers may be synchronous (return
/// immediately) or deferred (await further I/O) — the trait is async
/// either way, matching design note "cooperative concurrency primitives":
/// the contract is simply "await a value-or-future", nothing more exotic.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(
        &self,
        args: Vec<Value>,
        kwargs: Vec<(Value, Value)>,
    ) -> Result<Value, ApplicationError>;
}

/// Wraps a plain synchronous closure as a [`Handler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Vec<Value>, Vec<(Value, Value)>) -> Result<Value, ApplicationError> + Send + Sync,
{
    async fn call(
        &self,
        args: Vec<Value>,
        kwargs: Vec<(Value, Value)>,
    ) -> Result<Value, ApplicationError> {
        (self.0)(args, kwargs)
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    handlers: Arc<std::sync::RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as a handler. Registering `_dir` is rejected —
    /// it is synthesized by [`Registry::dir`], never user-supplied.
    pub fn register(&self, name: impl Into<String>, handler: impl Handler + 'static) {
        let name = name.into();
        assert_ne!(name, DIR_METHOD, "{DIR_METHOD} is reserved");
        self.handlers
            .write()
            .unwrap()
            .insert(name, Arc::new(handler));
    }

    pub fn unregister(&self, name: &str) {
        self.handlers.write().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(name)
    }

    /// Current registered names, plus the reserved `_dir` entry itself.
    pub fn dir(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().unwrap().keys().cloned().collect();
        names.push(DIR_METHOD.to_string());
        names
    }
}
