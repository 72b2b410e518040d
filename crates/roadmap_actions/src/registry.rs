//! Action name → handler mapping.

use crate::context::ActionContext;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(ActionContext) -> HandlerFuture + Send + Sync>;

/// Dotted action names to handlers. Registration happens once at startup;
/// lookup is read-only afterwards.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Handler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full production registry.
    pub fn with_default_actions() -> Self {
        let mut registry = Self::new();
        crate::jobs::register_all(&mut registry);
        registry
    }

    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |ctx| Box::pin(handler(ctx)) as HandlerFuture);
        self.handlers.insert(name.to_string(), boxed);
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
