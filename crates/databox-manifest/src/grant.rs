//! Capability grants pushed to the policy engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP verb a grant authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// A route on a target host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub target: String,
    pub path: String,
    pub method: HttpMethod,
}

/// Authorizes `subject` to call one route, subject to `caveats`.
///
/// Re-granting an identical tuple has no additional effect on the policy
/// engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    #[serde(rename = "name")]
    pub subject: String,
    pub route: Route,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caveats: Vec<String>,
}

impl PermissionGrant {
    pub fn new(
        subject: impl Into<String>,
        target: impl Into<String>,
        path: impl Into<String>,
        method: HttpMethod,
    ) -> Self {
        Self {
            subject: subject.into(),
            route: Route {
                target: target.into(),
                path: path.into(),
                method,
            },
            caveats: Vec::new(),
        }
    }

    pub fn with_caveat(mut self, caveat: impl Into<String>) -> Self {
        self.caveats.push(caveat.into());
        self
    }
}

impl fmt::Display for PermissionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} {}{}",
            self.subject, self.route.method, self.route.target, self.route.path
        )
    }
}
