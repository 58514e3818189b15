use std::borrow::Cow;
use std::sync::Arc;

use tracing::warn;

use crate::rate_limit::RateLimitConfig;

/// A path matcher. `Prefix` is segment-aware: `/api/auth` matches
/// `/api/auth` and `/api/auth/login`, never `/api/authority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    pub fn exact(path: &str) -> Self {
        PathPattern::Exact(path.to_string())
    }

    pub fn prefix(path: &str) -> Self {
        PathPattern::Prefix(path.trim_end_matches('/').to_string())
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Prefix(p) => {
                path == p || path.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// No session needed.
    Public,
    /// Session required; failures are JSON 401/500.
    ProtectedApi,
    /// Session required; failures redirect to the login page.
    ProtectedPage,
    /// Not ours to guard. Forwarded untouched.
    Unguarded,
}

impl RouteClass {
    pub fn is_protected(&self) -> bool {
        matches!(self, RouteClass::ProtectedApi | RouteClass::ProtectedPage)
    }
}

/// Path tables the dispatcher consults: which rate-limit class applies and
/// whether a session is required.
#[derive(Debug, Clone)]
pub struct RouteTable {
    policies: Vec<(PathPattern, Arc<RateLimitConfig>)>,
    fallback: Arc<RateLimitConfig>,
    public: Vec<PathPattern>,
    protected_api: Vec<PathPattern>,
    protected_pages: Vec<PathPattern>,
}

impl Default for RouteTable {
    fn default() -> Self {
        let general = Arc::new(RateLimitConfig::general());

        Self {
            policies: vec![
                (PathPattern::prefix("/api/auth"), Arc::new(RateLimitConfig::auth())),
                (PathPattern::prefix("/api/upload"), Arc::new(RateLimitConfig::upload())),
                (PathPattern::prefix("/api/messages"), Arc::new(RateLimitConfig::messaging())),
                (PathPattern::prefix("/api"), general.clone()),
            ],
            fallback: general,
            public: vec![
                PathPattern::exact("/"),
                PathPattern::prefix("/auth"),
                PathPattern::exact("/api/auth/login"),
                PathPattern::exact("/api/auth/signup"),
                PathPattern::exact("/api/auth/forgot-password"),
                PathPattern::exact("/api/auth/reset-password"),
                PathPattern::exact("/api/auth/verify-email"),
                PathPattern::exact("/api/health"),
                PathPattern::prefix("/api/webhooks"),
            ],
            protected_api: vec![
                PathPattern::prefix("/api/claims"),
                PathPattern::prefix("/api/billing"),
                PathPattern::prefix("/api/admin"),
                PathPattern::prefix("/api/users"),
                PathPattern::prefix("/api/messages"),
                PathPattern::prefix("/api/upload"),
                PathPattern::prefix("/api/feedback"),
                PathPattern::exact("/api/auth/logout"),
                PathPattern::exact("/api/auth/me"),
                PathPattern::exact("/api/auth/sessions"),
            ],
            protected_pages: vec![PathPattern::prefix("/dashboard")],
        }
    }
}

impl RouteTable {
    /// Put a policy ahead of every existing entry.
    pub fn prepend_policy(mut self, pattern: PathPattern, policy: RateLimitConfig) -> Self {
        self.policies.insert(0, (pattern, Arc::new(policy)));
        self
    }

    pub fn is_api(path: &str) -> bool {
        PathPattern::prefix("/api").matches(path)
    }

    /// First matching policy for an API path; `None` outside `/api`.
    pub fn policy_for(&self, path: &str) -> Option<Arc<RateLimitConfig>> {
        let canonical = canonical_path(path);
        let path = normalize(&canonical);
        if !Self::is_api(path) {
            return None;
        }

        let policy = self
            .policies
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, policy)| policy.clone());

        Some(policy.unwrap_or_else(|| {
            warn!(path, "No rate-limit policy matched, using fallback");
            self.fallback.clone()
        }))
    }

    pub fn classify(&self, path: &str) -> RouteClass {
        let canonical = canonical_path(path);
        let path = normalize(&canonical);
        let any = |patterns: &Vec<PathPattern>| patterns.iter().any(|p| p.matches(path));

        if any(&self.public) {
            RouteClass::Public
        } else if any(&self.protected_api) {
            RouteClass::ProtectedApi
        } else if any(&self.protected_pages) {
            RouteClass::ProtectedPage
        } else {
            RouteClass::Unguarded
        }
    }
}

/// Collapses repeated slashes and resolves `.` and `..` segments, never
/// climbing above the root. Percent-encoded dots count as dots. A trailing
/// slash survives so downstream routing is unchanged.
pub fn canonical_path(path: &str) -> Cow<'_, str> {
    let mut segments: Vec<&str> = Vec::new();
    let mut trailing = false;

    for segment in path.split('/') {
        match dot_segment(segment) {
            Some(1) => trailing = true,
            Some(_) => {
                segments.pop();
                trailing = true;
            }
            None if segment.is_empty() => {}
            None => {
                segments.push(segment);
                trailing = false;
            }
        }
    }
    trailing = trailing || path.ends_with('/');

    let mut canonical = String::with_capacity(path.len());
    for segment in &segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() || trailing {
        canonical.push('/');
    }

    if canonical == path {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(canonical)
    }
}

/// `Some(1)` for `.`, `Some(2)` for `..`, either possibly written as `%2e`.
fn dot_segment(segment: &str) -> Option<usize> {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    match decoded.as_str() {
        "." => Some(1),
        ".." => Some(2),
        _ => None,
    }
}

/// `/dashboard/` and `/dashboard` are the same route.
fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}
