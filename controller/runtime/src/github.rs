use reqwest::{header, StatusCode};
use tracing::debug;
use urlshortener_core::{Error, IdentityProvider, Result, User};

/// Resolves bearer tokens by asking GitHub who they belong to.
#[derive(Clone, Debug)]
pub struct GitHub {
    client: reqwest::Client,
    user_url: String,
}

// === impl GitHub ===

impl GitHub {
    pub fn new(api_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("urlshortener/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            user_url: format!("{}/user", api_url.trim_end_matches('/')),
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GitHub {
    async fn resolve_bearer_token(&self, token: &str) -> Result<User> {
        let rsp = self
            .client
            .get(&self.user_url)
            .header(header::ACCEPT, "application/vnd.github.v3+json")
            .header(header::AUTHORIZATION, format!("token {token}"))
            .send()
            .await
            .map_err(Error::store)?;
        if rsp.status() != StatusCode::OK {
            debug!(status = %rsp.status(), "GitHub rejected token");
            return Err(Error::Unauthenticated("bad credentials".to_string()));
        }
        rsp.json::<User>().await.map_err(Error::store)
    }
}
