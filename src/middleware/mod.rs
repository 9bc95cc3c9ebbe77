//! Middleware subsystem.
//!
//! # Data Flow
//! ```text
//! request
//!     → async chain (app middleware, then blueprint async middleware)
//!     → route resolution
//!     → sync endpoint: worker pool → sync chain (app, then blueprint) → handler
//!     → async endpoint: handler
//! ```
//!
//! # Design Decisions
//! - Two explicit shapes: [`SyncMiddleware`] hooks and [`AsyncMiddleware`]
//!   wrappers. A list is never allowed to mix them
//! - Configuration names middleware; the builder's registry maps names to
//!   instances when the application is built
//! - Chains are compiled once per build and never touched while serving

pub mod async_chain;
pub mod sync_chain;

use std::collections::HashMap;
use std::sync::Arc;

pub use async_chain::{from_fn, wrap_all, AsyncMiddleware, Next, ResponseFuture};
pub use sync_chain::{SyncChain, SyncMiddleware};

use crate::error::RegistrationError;

/// A middleware of either shape.
#[derive(Clone)]
pub enum Middleware {
    Sync(Arc<dyn SyncMiddleware>),
    Async(Arc<dyn AsyncMiddleware>),
}

impl Middleware {
    pub fn kind(&self) -> &'static str {
        match self {
            Middleware::Sync(_) => "sync",
            Middleware::Async(_) => "async",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Middleware::Sync(m) => m.name(),
            Middleware::Async(m) => m.name(),
        }
    }
}

impl From<Arc<dyn SyncMiddleware>> for Middleware {
    fn from(m: Arc<dyn SyncMiddleware>) -> Self {
        Middleware::Sync(m)
    }
}

impl From<Arc<dyn AsyncMiddleware>> for Middleware {
    fn from(m: Arc<dyn AsyncMiddleware>) -> Self {
        Middleware::Async(m)
    }
}

/// A middleware given by registry name or by instance.
#[derive(Clone)]
pub enum MiddlewareRef {
    Named(String),
    Instance(Middleware),
}

impl From<&str> for MiddlewareRef {
    fn from(name: &str) -> Self {
        MiddlewareRef::Named(name.to_string())
    }
}

impl From<String> for MiddlewareRef {
    fn from(name: String) -> Self {
        MiddlewareRef::Named(name)
    }
}

impl From<Middleware> for MiddlewareRef {
    fn from(m: Middleware) -> Self {
        MiddlewareRef::Instance(m)
    }
}

impl From<Arc<dyn SyncMiddleware>> for MiddlewareRef {
    fn from(m: Arc<dyn SyncMiddleware>) -> Self {
        MiddlewareRef::Instance(Middleware::Sync(m))
    }
}

impl From<Arc<dyn AsyncMiddleware>> for MiddlewareRef {
    fn from(m: Arc<dyn AsyncMiddleware>) -> Self {
        MiddlewareRef::Instance(Middleware::Async(m))
    }
}

/// Name → middleware lookup used to resolve configuration references.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: HashMap<String, Middleware>,
}

impl MiddlewareRegistry {
    pub fn insert(&mut self, name: impl Into<String>, middleware: Middleware) {
        self.entries.insert(name.into(), middleware);
    }

    pub fn resolve(&self, reference: &MiddlewareRef) -> Result<Middleware, RegistrationError> {
        match reference {
            MiddlewareRef::Instance(m) => Ok(m.clone()),
            MiddlewareRef::Named(name) => self
                .entries
                .get(name)
                .cloned()
                .ok_or_else(|| RegistrationError::UnknownMiddleware { name: name.clone() }),
        }
    }

    /// Resolve names that must all be sync middleware.
    pub fn resolve_sync(&self, names: &[String]) -> Result<Vec<Arc<dyn SyncMiddleware>>, RegistrationError> {
        names
            .iter()
            .map(|name| match self.resolve(&MiddlewareRef::Named(name.clone()))? {
                Middleware::Sync(m) => Ok(m),
                other => Err(kind_mismatch(name, "sync", &other)),
            })
            .collect()
    }

    /// Resolve names that must all be async middleware.
    pub fn resolve_async(&self, names: &[String]) -> Result<Vec<Arc<dyn AsyncMiddleware>>, RegistrationError> {
        names
            .iter()
            .map(|name| match self.resolve(&MiddlewareRef::Named(name.clone()))? {
                Middleware::Async(m) => Ok(m),
                other => Err(kind_mismatch(name, "async", &other)),
            })
            .collect()
    }
}

fn kind_mismatch(name: &str, expected: &'static str, actual: &Middleware) -> RegistrationError {
    RegistrationError::MiddlewareKindMismatch {
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}

/// A blueprint's middleware after resolution: one shape only.
#[derive(Clone, Default)]
pub(crate) enum BlueprintMiddleware {
    #[default]
    None,
    Sync(Vec<Arc<dyn SyncMiddleware>>),
    Async(Vec<Arc<dyn AsyncMiddleware>>),
}

impl BlueprintMiddleware {
    pub(crate) fn resolve(
        blueprint: &str,
        registry: &MiddlewareRegistry,
        refs: &[MiddlewareRef],
    ) -> Result<Self, RegistrationError> {
        let resolved = refs
            .iter()
            .map(|r| registry.resolve(r))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sync = Vec::new();
        let mut r#async = Vec::new();
        for m in resolved {
            match m {
                Middleware::Sync(m) => sync.push(m),
                Middleware::Async(m) => r#async.push(m),
            }
        }
        match (sync.is_empty(), r#async.is_empty()) {
            (true, true) => Ok(BlueprintMiddleware::None),
            (false, true) => Ok(BlueprintMiddleware::Sync(sync)),
            (true, false) => Ok(BlueprintMiddleware::Async(r#async)),
            (false, false) => Err(RegistrationError::MixedMiddlewareKinds {
                blueprint: blueprint.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl SyncMiddleware for Noop {
        fn name(&self) -> &str {
            "noop"
        }
    }

    fn registry() -> MiddlewareRegistry {
        let mut registry = MiddlewareRegistry::default();
        registry.insert("noop", Middleware::Sync(Arc::new(Noop)));
        registry.insert("pass", Middleware::Async(from_fn("pass", |ctx, next: Next| next.run(ctx))));
        registry
    }

    #[test]
    fn test_resolve_by_kind() {
        let registry = registry();
        assert_eq!(registry.resolve_sync(&["noop".to_string()]).unwrap().len(), 1);
        assert!(matches!(
            registry.resolve_sync(&["pass".to_string()]),
            Err(RegistrationError::MiddlewareKindMismatch { .. })
        ));
        assert!(matches!(
            registry.resolve_async(&["missing".to_string()]),
            Err(RegistrationError::UnknownMiddleware { .. })
        ));
    }

    #[test]
    fn test_blueprint_rejects_mixed_kinds() {
        let registry = registry();
        let mixed = [MiddlewareRef::from("noop"), MiddlewareRef::from("pass")];
        assert!(matches!(
            BlueprintMiddleware::resolve("bp", &registry, &mixed),
            Err(RegistrationError::MixedMiddlewareKinds { .. })
        ));
        assert!(matches!(
            BlueprintMiddleware::resolve("bp", &registry, &[MiddlewareRef::from("pass")]),
            Ok(BlueprintMiddleware::Async(_))
        ));
    }
}
