//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes in registration order
//! - Resolve (method, path) to a route and converted parameters
//! - Keep "no such path" distinct from "path exists, wrong method"
//! - Enforce unique endpoint names and (path shape, method) pairs
//!
//! # Design Decisions
//! - First match in registration order wins; callers register specific
//!   patterns before general ones
//! - Immutable once the application is built (no locking while serving)
//! - Generic over the stored handler so the table can be tested on its own

use std::collections::BTreeMap;

use axum::http::Method;
use serde::Serialize;

use crate::error::RegistrationError;
use crate::routing::converter::ConverterRegistry;
use crate::routing::pattern::{canonical_path, CompiledPattern, PathParams};

/// Which dispatcher runs an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionModel {
    Sync,
    Async,
}

impl ExecutionModel {
    /// Endpoint-name namespace for this model.
    pub fn namespace(&self) -> &'static str {
        match self {
            ExecutionModel::Sync => "sync",
            ExecutionModel::Async => "async",
        }
    }
}

/// What a route answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// Plain HTTP for the listed methods.
    Http(Vec<Method>),
    WebSocket,
    /// Everything below a path prefix, any method, any protocol.
    Mount,
}

impl RouteKind {
    /// HTTP route for the given methods; an empty list means `GET`.
    pub fn http(methods: impl IntoIterator<Item = Method>) -> Self {
        let mut set: Vec<Method> = Vec::new();
        for method in methods {
            if !set.contains(&method) {
                set.push(method);
            }
        }
        if set.is_empty() {
            set.push(Method::GET);
        }
        RouteKind::Http(set)
    }

    fn accepts(&self, method: &Method) -> bool {
        match self {
            RouteKind::Http(methods) => {
                methods.contains(method) || (*method == Method::HEAD && methods.contains(&Method::GET))
            }
            RouteKind::WebSocket => false,
            RouteKind::Mount => true,
        }
    }

    fn overlaps(&self, other: &RouteKind) -> Option<String> {
        match (self, other) {
            (RouteKind::Http(a), RouteKind::Http(b)) => a.iter().find(|m| b.contains(m)).map(|m| m.to_string()),
            (RouteKind::WebSocket, RouteKind::WebSocket) => Some("WEBSOCKET".to_string()),
            (RouteKind::Mount, RouteKind::Mount) => Some("MOUNT".to_string()),
            _ => None,
        }
    }

    /// What is left of this kind once `other` claims its methods, or
    /// `None` if nothing is.
    fn without(&self, other: &RouteKind) -> Option<RouteKind> {
        match (self, other) {
            (RouteKind::Http(mine), RouteKind::Http(theirs)) => {
                let remaining: Vec<Method> = mine.iter().filter(|m| !theirs.contains(m)).cloned().collect();
                (!remaining.is_empty()).then_some(RouteKind::Http(remaining))
            }
            _ if self.overlaps(other).is_some() => None,
            _ => Some(self.clone()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RouteKind::Http(_) => "http",
            RouteKind::WebSocket => "ws",
            RouteKind::Mount => "mount",
        }
    }
}

/// Structured annotations attached to a route at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteMetadata {
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub annotations: BTreeMap<String, serde_json::Value>,
}

/// Per-registration options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Endpoint name without namespace; derived from the template if unset.
    pub name: Option<String>,
    /// Take over paths and methods already claimed by other routes. Routes
    /// left with no methods are dropped.
    pub replace: bool,
    pub metadata: RouteMetadata,
}

/// A compiled route.
#[derive(Debug)]
pub struct Route<T> {
    pattern: CompiledPattern,
    kind: RouteKind,
    model: ExecutionModel,
    endpoint: String,
    handler: T,
    metadata: RouteMetadata,
}

impl<T> Route<T> {
    pub fn template(&self) -> &str {
        self.pattern.template()
    }

    pub fn kind(&self) -> &RouteKind {
        &self.kind
    }

    pub fn model(&self) -> ExecutionModel {
        self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn handler(&self) -> &T {
        &self.handler
    }

    pub fn metadata(&self) -> &RouteMetadata {
        &self.metadata
    }

    /// Read-only description for documentation collaborators.
    pub fn info(&self) -> RouteInfo {
        RouteInfo {
            endpoint: self.endpoint.clone(),
            template: self.template().to_string(),
            canonical: canonical_path(self.template()),
            methods: match &self.kind {
                RouteKind::Http(methods) => methods.iter().map(|m| m.to_string()).collect(),
                _ => Vec::new(),
            },
            model: self.model,
            kind: self.kind.label(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Enumerable view of a route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub endpoint: String,
    pub template: String,
    pub canonical: String,
    pub methods: Vec<String>,
    pub model: ExecutionModel,
    pub kind: &'static str,
    pub metadata: RouteMetadata,
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    pub route: &'a Route<T>,
    pub params: PathParams,
    /// Path below the prefix for mounts.
    pub rest: Option<String>,
}

/// Why a lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMiss {
    NotFound,
    MethodNotAllowed { allowed: Vec<Method> },
}

/// Outcome of [`RouteTable::resolve`].
#[derive(Debug)]
pub enum Resolution<'a, T> {
    Matched(RouteMatch<'a, T>),
    Miss(RouteMiss),
}

impl<'a, T> Resolution<'a, T> {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Resolution::Miss(RouteMiss::NotFound))
    }

    pub fn is_method_not_allowed(&self) -> bool {
        matches!(self, Resolution::Miss(RouteMiss::MethodNotAllowed { .. }))
    }
}

/// Ordered collection of compiled routes.
#[derive(Debug)]
pub struct RouteTable<T> {
    routes: Vec<Route<T>>,
    converters: ConverterRegistry,
}

impl<T> RouteTable<T> {
    pub fn new(converters: ConverterRegistry) -> Self {
        Self {
            routes: Vec::new(),
            converters,
        }
    }

    /// Compile and add a route. Returns the namespaced endpoint name.
    pub fn add(
        &mut self,
        template: &str,
        kind: RouteKind,
        model: ExecutionModel,
        handler: T,
        options: RouteOptions,
    ) -> Result<String, RegistrationError> {
        self.add_scoped(None, template, kind, model, handler, options)
    }

    /// Like [`add`](Self::add) with an extra name segment (the blueprint
    /// name) between the namespace and the endpoint name.
    pub fn add_scoped(
        &mut self,
        scope: Option<&str>,
        template: &str,
        kind: RouteKind,
        model: ExecutionModel,
        handler: T,
        options: RouteOptions,
    ) -> Result<String, RegistrationError> {
        let pattern = match kind {
            RouteKind::Mount => CompiledPattern::compile_prefix(template, &self.converters)?,
            _ => CompiledPattern::compile(template, &self.converters)?,
        };

        let name = options.name.unwrap_or_else(|| default_name(template, &kind));
        let endpoint = match scope {
            Some(scope) => format!("{}.{}.{}", model.namespace(), scope, name),
            None => format!("{}.{}", model.namespace(), name),
        };

        let overlapping: Vec<usize> = self
            .routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.pattern.same_paths(&pattern) && r.kind.overlaps(&kind).is_some())
            .map(|(i, _)| i)
            .collect();

        if let Some(&first) = overlapping.first() {
            if !options.replace {
                let existing = &self.routes[first];
                return Err(RegistrationError::DuplicateRoute {
                    template: template.to_string(),
                    method: existing.kind.overlaps(&kind).unwrap_or_default(),
                });
            }
        }

        // Routes that lose every method to the new one.
        let displaced: Vec<usize> = overlapping
            .iter()
            .copied()
            .filter(|&i| self.routes[i].kind.without(&kind).is_none())
            .collect();

        let clash = self
            .routes
            .iter()
            .enumerate()
            .any(|(i, r)| !displaced.contains(&i) && r.endpoint == endpoint);
        if clash {
            return Err(RegistrationError::DuplicateEndpoint { endpoint });
        }

        let route = Route {
            pattern,
            kind,
            model,
            endpoint: endpoint.clone(),
            handler,
            metadata: options.metadata,
        };

        let Some(&position) = overlapping.first() else {
            self.routes.push(route);
            return Ok(endpoint);
        };

        for &index in overlapping.iter().rev() {
            match self.routes[index].kind.without(&route.kind) {
                Some(remaining) => self.routes[index].kind = remaining,
                None => {
                    self.routes.remove(index);
                }
            }
        }
        tracing::debug!(
            endpoint = %endpoint,
            template = %template,
            replaced = overlapping.len(),
            dropped = displaced.len(),
            "Route replaced"
        );
        self.routes.insert(position, route);
        Ok(endpoint)
    }

    /// Resolve an HTTP request. Mounts match any method.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_, T> {
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            if matches!(route.kind, RouteKind::WebSocket) {
                continue;
            }
            let Some((params, rest)) = route.pattern.match_with_rest(path) else {
                continue;
            };
            if route.kind.accepts(method) {
                return Resolution::Matched(RouteMatch {
                    route,
                    params,
                    rest: route.pattern.is_prefix().then_some(rest),
                });
            }
            if let RouteKind::Http(methods) = &route.kind {
                for m in methods {
                    if !allowed.contains(m) {
                        allowed.push(m.clone());
                    }
                }
            }
        }

        if allowed.is_empty() {
            Resolution::Miss(RouteMiss::NotFound)
        } else {
            Resolution::Miss(RouteMiss::MethodNotAllowed { allowed })
        }
    }

    /// Resolve a WebSocket handshake against socket routes and mounts.
    pub fn resolve_websocket(&self, path: &str) -> Resolution<'_, T> {
        for route in &self.routes {
            if matches!(route.kind, RouteKind::Http(_)) {
                continue;
            }
            if let Some((params, rest)) = route.pattern.match_with_rest(path) {
                return Resolution::Matched(RouteMatch {
                    route,
                    params,
                    rest: route.pattern.is_prefix().then_some(rest),
                });
            }
        }
        Resolution::Miss(RouteMiss::NotFound)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route<T>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// `GET /user/<int:id>` -> `get_user_id`, `/` -> `get_index`.
fn default_name(template: &str, kind: &RouteKind) -> String {
    let path: String = canonical_path(template)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                .collect::<String>()
                .trim_matches('_')
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let path = if path.is_empty() { "index".to_string() } else { path };

    let prefix = match kind {
        RouteKind::Http(methods) => methods
            .iter()
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join("_"),
        other => other.label().to_string(),
    };
    format!("{}_{}", prefix, path)
}
