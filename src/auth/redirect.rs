//! Login redirect hook.
//!
//! Invoked once per failed refresh, after credentials are cleared. The
//! application decides what "navigate to login" means (open a browser, print
//! a hint, emit an event).

/// Receives the configured login route when authentication is lost.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, route: &str);
}

/// Default hook: log the route.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRedirect;

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self, route: &str) {
        tracing::warn!(route = %route, "Session expired, login required");
    }
}

impl<F> LoginRedirect for F
where
    F: Fn(&str) + Send + Sync,
{
    fn redirect_to_login(&self, route: &str) {
        self(route)
    }
}
