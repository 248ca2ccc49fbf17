use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// HTTP status codes a ShortLink may answer with. `200` serves the HTML
/// countdown page instead of redirecting directly.
pub const ALLOWED_CODES: [u16; 9] = [200, 300, 301, 302, 303, 304, 305, 307, 308];

pub const DEFAULT_CODE: u16 = 307;

/// The largest `redirectAfter` delay, in seconds.
pub const MAX_REDIRECT_AFTER: i64 = 99;

/// Maps a short name onto a target URL, owned by a single user and optionally
/// shared with co-owners.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "urlshortener.cedi.dev",
    version = "v1alpha1",
    kind = "ShortLink",
    status = "ShortLinkStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target"}"#,
    printcolumn = r#"{"name":"Code","type":"integer","jsonPath":".spec.code"}"#,
    printcolumn = r#"{"name":"Invoked","type":"integer","jsonPath":".status.count"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ShortLinkSpec {
    /// The URL (or host and path) this ShortLink redirects to.
    pub target: String,

    /// An optional vanity name, mirrored into the `shortlink` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Seconds the countdown page waits before redirecting. Only used when
    /// `code` is 200.
    #[serde(default)]
    pub redirect_after: i64,

    /// The HTTP status used for the redirect.
    #[serde(default = "default_code")]
    pub code: u16,

    /// The identity that created this ShortLink.
    #[serde(default)]
    pub owner: String,

    /// Further identities allowed to read, modify and delete this ShortLink.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub co_owners: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShortLinkStatus {
    /// How often this ShortLink has been invoked.
    #[serde(default)]
    pub count: i64,

    /// The identity of the last user to modify the spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<String>,

    /// RFC 3339 timestamp of the last authorized modification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    /// Set once the `shortlink` label reflects the alias.
    #[serde(default)]
    pub ready: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSpec {
    #[error("target must not be empty")]
    EmptyTarget,

    #[error("redirectAfter must be between 0 and {MAX_REDIRECT_AFTER}, got {0}")]
    RedirectAfter(i64),

    #[error("code {0} is not an allowed redirect code")]
    Code(u16),
}

fn default_code() -> u16 {
    DEFAULT_CODE
}

// === impl ShortLink ===

impl ShortLink {
    /// Returns true if `user` is the owner or one of the co-owners.
    pub fn is_owned_by(&self, user: &str) -> bool {
        self.spec.is_owned_by(user)
    }

    pub fn count(&self) -> i64 {
        self.status.as_ref().map(|s| s.count).unwrap_or_default()
    }
}

// === impl ShortLinkSpec ===

impl ShortLinkSpec {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            alias: None,
            redirect_after: 0,
            code: DEFAULT_CODE,
            owner: String::new(),
            co_owners: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owner == user || self.co_owners.iter().any(|o| o == user)
    }

    pub fn validate(&self) -> Result<(), InvalidSpec> {
        if self.target.trim().is_empty() {
            return Err(InvalidSpec::EmptyTarget);
        }
        if !(0..=MAX_REDIRECT_AFTER).contains(&self.redirect_after) {
            return Err(InvalidSpec::RedirectAfter(self.redirect_after));
        }
        if !ALLOWED_CODES.contains(&self.code) {
            return Err(InvalidSpec::Code(self.code));
        }
        Ok(())
    }

    /// The configured code if it is allow-listed, otherwise 307.
    pub fn effective_code(&self) -> u16 {
        if ALLOWED_CODES.contains(&self.code) {
            self.code
        } else {
            DEFAULT_CODE
        }
    }

    /// The target as an absolute URL. Targets given as `host/path` are
    /// assumed to be plain HTTP.
    pub fn target_url(&self) -> Cow<'_, str> {
        if self.target.starts_with("http") {
            Cow::Borrowed(&self.target)
        } else {
            Cow::Owned(format!("http://{}", self.target))
        }
    }
}
