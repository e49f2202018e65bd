//! Request context taken from the CGI/1.1 environment.
//!
//! The web server exports the caller's address as `REMOTE_ADDR` and the raw
//! query string as `QUERY_STRING`; the application name is its `app` parameter.

use std::env;

pub const REMOTE_ADDR_VAR: &str = "REMOTE_ADDR";
pub const QUERY_STRING_VAR: &str = "QUERY_STRING";
pub const APPLICATION_PARAM: &str = "app";

/// Unvalidated identifying fields of the incoming check request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub remote_addr: Option<String>,
    pub application: Option<String>,
}

impl RequestContext {
    pub fn from_cgi_env() -> Self {
        let query = env_str(QUERY_STRING_VAR).unwrap_or_default();
        Self::from_parts(env_str(REMOTE_ADDR_VAR), &query)
    }

    pub fn from_parts(remote_addr: Option<String>, query: &str) -> Self {
        Self {
            remote_addr,
            application: query_param(query, APPLICATION_PARAM),
        }
    }

    /// Apply command-line overrides for manual runs.
    pub fn with_overrides(mut self, remote_addr: Option<String>, application: Option<String>) -> Self {
        if remote_addr.is_some() {
            self.remote_addr = remote_addr;
        }
        if application.is_some() {
            self.application = application;
        }
        self
    }
}

/// Non-UTF-8 values are kept lossily so they fail validation instead of being treated as absent.
fn env_str(name: &str) -> Option<String> {
    env::var_os(name).map(|v| v.to_string_lossy().into_owned())
}

/// First value of `name` in a URL-encoded query string.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
