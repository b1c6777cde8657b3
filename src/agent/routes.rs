use super::functions::Function;
use crate::models::{ApiError, ExecutionMode};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A function bound to an application path.
#[derive(Clone)]
pub struct Route {
    pub app_name: String,
    pub path: String,
    pub function: Arc<dyn Function>,
    pub mode: ExecutionMode,
    pub timeout: Duration,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("app_name", &self.app_name)
            .field("path", &self.path)
            .field("function", &self.function.name())
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish()
    }
}

type AppMap = HashMap<String, HashMap<String, Arc<Route>>>;

/// App/path routing table.
///
/// Lookups read an immutable snapshot; registration publishes a new one, so
/// routes can be added while requests are in flight.
#[derive(Default)]
pub struct RouteTable {
    apps: ArcSwap<AppMap>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a route.
    pub fn register(&self, route: Route) {
        let route = Arc::new(route);
        self.apps.rcu(|current| {
            let mut next = AppMap::clone(current);
            next.entry(route.app_name.clone())
                .or_default()
                .insert(route.path.clone(), Arc::clone(&route));
            next
        });
    }

    /// Resolve the route for `app_name` and `path`.
    pub fn resolve(&self, app_name: &str, path: &str) -> Result<Arc<Route>, ApiError> {
        let apps = self.apps.load();
        let routes = apps.get(app_name).ok_or(ApiError::AppNotFound)?;
        routes.get(path).cloned().ok_or(ApiError::RouteNotFound)
    }

    #[must_use]
    pub fn has_app(&self, app_name: &str) -> bool {
        self.apps.load().contains_key(app_name)
    }

    /// All routes, sorted by app then path.
    #[must_use]
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let apps = self.apps.load();
        let mut all: Vec<Arc<Route>> = apps.values().flat_map(|r| r.values().cloned()).collect();
        all.sort_by(|a, b| (&a.app_name, &a.path).cmp(&(&b.app_name, &b.path)));
        all
    }
}
