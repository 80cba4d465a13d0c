use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Trims and strips one trailing slash; `"/"` stays `"/"`, blank becomes `""`.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return trimmed;
    }
    trimmed.strip_suffix('/').unwrap_or(trimmed)
}

/// `path` is in `scope` when it equals the scope or lies beneath it.
/// A blank scope matches nothing.
pub fn is_in_scope(path: &str, scope: &str) -> bool {
    let scope = normalize_path(scope);
    if scope.is_empty() {
        return false;
    }
    let path = normalize_path(path);
    if path == scope {
        return true;
    }
    path.strip_prefix(scope)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Fires `reset` exactly on the inside-to-outside transition.
pub struct RouteScopedReset<F> {
    scope: String,
    was_in_scope: bool,
    reset: F,
}

impl<F> std::fmt::Debug for RouteScopedReset<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteScopedReset")
            .field("scope", &self.scope)
            .field("was_in_scope", &self.was_in_scope)
            .finish_non_exhaustive()
    }
}

impl<F: FnMut()> RouteScopedReset<F> {
    pub fn new(scope: impl Into<String>, reset: F) -> Self {
        Self {
            scope: scope.into(),
            was_in_scope: false,
            reset,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn was_in_scope(&self) -> bool {
        self.was_in_scope
    }

    /// Feeds the current path. Returns `true` if `reset` fired.
    pub fn observe(&mut self, path: &str) -> bool {
        let in_scope = is_in_scope(path, &self.scope);
        let left = self.was_in_scope && !in_scope;
        self.was_in_scope = in_scope;
        if left {
            tracing::debug!(scope = %self.scope, path, "left route scope; resetting");
            (self.reset)();
        }
        left
    }
}

/// Watch task driving a [`RouteScopedReset`]. Dropping it stops the task.
#[derive(Debug)]
pub struct RouteWatch {
    handle: JoinHandle<()>,
}

impl RouteWatch {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RouteWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Observes the current route immediately, then every change until the
/// sender closes or the returned handle is dropped.
pub fn watch_route<F>(
    mut route: watch::Receiver<String>,
    scope: impl Into<String>,
    reset: F,
) -> RouteWatch
where
    F: FnMut() + Send + 'static,
{
    let mut tracker = RouteScopedReset::new(scope, reset);
    let handle = tokio::spawn(async move {
        let current = route.borrow_and_update().clone();
        tracker.observe(&current);
        while route.changed().await.is_ok() {
            let current = route.borrow_and_update().clone();
            tracker.observe(&current);
        }
    });
    RouteWatch { handle }
}
