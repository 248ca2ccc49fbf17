use bytes::Bytes;
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use hyper::{
    header::{self, HeaderMap, HeaderValue},
    Method, Request, Response, StatusCode,
};
use serde::Serialize;
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};
use urlshortener_core::{
    bearer_token, Error as CoreError, IdentityProvider, ObjectStore, Result as CoreResult,
    ShortlinkClientAuth,
};
use urlshortener_k8s_api::{ResourceExt, ShortLink, ShortLinkSpec, ShortLinkStatus};

pub type Body = http_body_util::Full<Bytes>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const CACHE_CONTROL: &str = "public, max-age=900, stale-if-error=3600";

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Not Found</title></head>\
<body><h1>404</h1><p>This ShortLink does not exist.</p></body></html>\n";

const ERROR_PAGE: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Error</title></head>\
<body><h1>500</h1><p>Something went wrong resolving this ShortLink.</p></body></html>\n";

/// Serves ShortLink redirects and the authenticated ShortLink API.
#[derive(Clone)]
pub struct Frontend<S> {
    auth: ShortlinkClientAuth<S>,
    identity: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[source] BoxError),
}

#[derive(Debug)]
enum ApiRoute {
    List,
    Get(String),
    Create(String),
    Update(String),
    Delete(String),
    Share { name: String, grantee: String },
    Revoke { name: String, grantee: String },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Text,
}

#[derive(Serialize)]
struct LinkView<'l> {
    name: String,
    spec: &'l ShortLinkSpec,
    status: ShortLinkStatus,
}

#[derive(Serialize)]
struct ErrorView<'e> {
    code: u16,
    error: &'e str,
}

// === impl Frontend ===

impl<S: ObjectStore> Frontend<S> {
    pub fn new(
        auth: ShortlinkClientAuth<S>,
        identity: Arc<dyn IdentityProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            auth,
            identity,
            timeout,
        }
    }

    pub async fn handle(&self, req: Request<Bytes>) -> Response<Body> {
        let span = info_span!("request", method = %req.method(), path = %req.uri().path());
        self.route(req).instrument(span).await
    }

    async fn route(&self, req: Request<Bytes>) -> Response<Body> {
        let path = req.uri().path().to_string();
        let segments = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let route = match (req.method(), segments.as_slice()) {
            (&Method::GET, ["api", "v1", "shortlink"]) => ApiRoute::List,
            (&Method::GET, ["api", "v1", "shortlink", name]) => ApiRoute::Get(name.to_string()),
            (&Method::POST, ["api", "v1", "shortlink", name]) => ApiRoute::Create(name.to_string()),
            (&Method::PUT, ["api", "v1", "shortlink", name]) => ApiRoute::Update(name.to_string()),
            (&Method::DELETE, ["api", "v1", "shortlink", name]) => {
                ApiRoute::Delete(name.to_string())
            }
            (&Method::PUT, ["api", "v1", "shortlink", name, "co-owners", grantee]) => {
                ApiRoute::Share {
                    name: name.to_string(),
                    grantee: grantee.to_string(),
                }
            }
            (&Method::DELETE, ["api", "v1", "shortlink", name, "co-owners", grantee]) => {
                ApiRoute::Revoke {
                    name: name.to_string(),
                    grantee: grantee.to_string(),
                }
            }
            (_, ["api", ..]) => {
                let format = Format::from_headers(req.headers());
                return format.error(StatusCode::NOT_FOUND, "no such route");
            }
            (&Method::GET, [name]) => return self.redirect(name).await,
            _ => return page(StatusCode::NOT_FOUND, NOT_FOUND_PAGE),
        };

        let format = Format::from_headers(req.headers());
        match self.with_timeout(self.api(route, format, &req)).await {
            Ok(rsp) => rsp,
            Err(error) => {
                let status = error_status(&error);
                if status.is_server_error() {
                    warn!(%error, "API request failed");
                } else {
                    debug!(%error, "API request rejected");
                }
                format.error(status, &error.to_string())
            }
        }
    }

    /// Resolves a ShortLink in the default namespace and redirects to it.
    async fn redirect(&self, name: &str) -> Response<Body> {
        let client = self.auth.client();
        let link = match self.with_timeout(client.get(name)).await {
            Ok(link) => link,
            Err(error) if error.is_not_found() => {
                debug!(%name, "ShortLink not found");
                return page(StatusCode::NOT_FOUND, NOT_FOUND_PAGE);
            }
            Err(error) => {
                warn!(%name, %error, "Failed to get ShortLink");
                return page(StatusCode::INTERNAL_SERVER_ERROR, ERROR_PAGE);
            }
        };

        let target = link.spec.target_url().into_owned();
        let code = link.spec.effective_code();
        let rsp = if code == 200 {
            page(
                StatusCode::OK,
                &countdown_page(&target, link.spec.redirect_after),
            )
        } else {
            redirect_response(code, &target)
        };

        if let Err(error) = self
            .with_timeout(client.increment_invocation_count(&link))
            .await
        {
            warn!(%name, %error, "Failed to count ShortLink invocation");
        }
        rsp
    }

    async fn api(
        &self,
        route: ApiRoute,
        format: Format,
        req: &Request<Bytes>,
    ) -> CoreResult<Response<Body>> {
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_token(authorization)?;
        let user = self.identity.resolve_bearer_token(token).await?;
        let user = user.login.as_str();

        match route {
            ApiRoute::List => {
                let links = self.auth.list(user).await?;
                Ok(format.links(&links))
            }

            ApiRoute::Get(name) => {
                let link = self.auth.get(user, &name).await?;
                Ok(format.link(&link))
            }

            ApiRoute::Create(name) => {
                let spec = parse_spec(req.body())?;
                let created = self.auth.create(user, &ShortLink::new(&name, spec)).await?;
                Ok(format.link(&created))
            }

            ApiRoute::Update(name) => {
                let spec = parse_spec(req.body())?;
                let mut link = self.auth.get(user, &name).await?;
                link.spec = spec;
                let updated = self.auth.update(user, &link).await?;
                Ok(format.link(&updated))
            }

            ApiRoute::Delete(name) => {
                let link = self.auth.get(user, &name).await?;
                self.auth.delete(user, &link).await?;
                Ok(format.empty())
            }

            ApiRoute::Share { name, grantee } => {
                let link = self.auth.share(user, &name, &grantee).await?;
                Ok(format.link(&link))
            }

            ApiRoute::Revoke { name, grantee } => {
                let link = self.auth.revoke(user, &name, &grantee).await?;
                Ok(format.link(&link))
            }
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = CoreResult<T>>) -> CoreResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(CoreError::Cancelled))
    }
}

impl<S, B> tower::Service<Request<B>> for Frontend<S>
where
    S: ObjectStore,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let frontend = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| Error::Request(e.into()))?
                .to_bytes();
            Ok(frontend.handle(Request::from_parts(parts, body)).await)
        })
    }
}

/// Serves `frontend` over plain HTTP/1 until `drain` is signaled, then lets
/// open connections finish their in-flight requests.
pub async fn serve<S: ObjectStore>(
    addr: SocketAddr,
    frontend: Frontend<S>,
    drain: drain::Watch,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let shutdown = drain.clone().signaled();
    tokio::pin!(shutdown);
    loop {
        let (io, client) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
            release = &mut shutdown => {
                drop(release);
                info!("HTTP server shutting down");
                return Ok(());
            }
        };

        let svc = hyper_util::service::TowerToHyperService::new(frontend.clone());
        let drain = drain.clone();
        tokio::spawn(
            async move {
                let conn = hyper::server::conn::http1::Builder::new()
                    .serve_connection(hyper_util::rt::TokioIo::new(io), svc);
                tokio::pin!(conn);
                tokio::select! {
                    res = conn.as_mut() => {
                        if let Err(error) = res {
                            debug!(%error, "Connection failed");
                        }
                    }
                    release = drain.signaled() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(error) = release.release_after(conn).await {
                            debug!(%error, "Connection failed during shutdown");
                        }
                    }
                }
            }
            .instrument(info_span!("conn", %client)),
        );
    }
}

fn parse_spec(body: &Bytes) -> CoreResult<ShortLinkSpec> {
    let spec = serde_json::from_slice::<ShortLinkSpec>(body)
        .map_err(|e| CoreError::Validation(format!("ShortLink spec: {e}")))?;
    spec.validate()?;
    Ok(spec)
}

fn error_status(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        CoreError::NotAllowed { .. } => StatusCode::FORBIDDEN,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Conflict { .. } => StatusCode::CONFLICT,
        CoreError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn page(status: StatusCode, html: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CACHE_CONTROL, CACHE_CONTROL)
        .body(Body::from(html.to_string()))
        .expect("page response must be valid")
}

fn redirect_response(code: u16, target: &str) -> Response<Body> {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::TEMPORARY_REDIRECT);
    match HeaderValue::from_str(target) {
        Ok(location) => Response::builder()
            .status(status)
            .header(header::LOCATION, location)
            .header(header::CACHE_CONTROL, CACHE_CONTROL)
            .body(Body::default())
            .expect("redirect response must be valid"),
        Err(error) => {
            warn!(%target, %error, "Target is not a valid Location");
            page(StatusCode::INTERNAL_SERVER_ERROR, ERROR_PAGE)
        }
    }
}

fn countdown_page(target: &str, after: i64) -> String {
    let target = escape_html(target);
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
<meta http-equiv=\"refresh\" content=\"{after}; url={target}\">\
<title>Redirecting</title></head>\
<body><p>You are being redirected to <a href=\"{target}\">{target}</a> in {after} seconds.</p></body></html>\n"
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// === impl Format ===

impl Format {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.contains("text/plain"));
        if text {
            Self::Text
        } else {
            Self::Json
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain; charset=utf-8",
        }
    }

    fn respond(self, status: StatusCode, body: Vec<u8>) -> Response<Body> {
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, self.content_type())
            .body(Body::from(body))
            .expect("API response must be valid")
    }

    fn json<T: Serialize>(self, status: StatusCode, value: &T) -> Response<Body> {
        match serde_json::to_vec(value) {
            Ok(body) => self.respond(status, body),
            Err(error) => {
                warn!(%error, "Failed to encode response");
                self.respond(StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
            }
        }
    }

    fn link(self, link: &ShortLink) -> Response<Body> {
        match self {
            Self::Text => self.respond(StatusCode::OK, link.spec.target.clone().into_bytes()),
            Self::Json => self.json(StatusCode::OK, &LinkView::from(link)),
        }
    }

    fn links(self, links: &[ShortLink]) -> Response<Body> {
        match self {
            Self::Text => {
                let body = links
                    .iter()
                    .map(|l| format!("{}: {}\n", l.name_any(), l.spec.target))
                    .collect::<String>();
                self.respond(StatusCode::OK, body.into_bytes())
            }
            Self::Json => {
                let views = links.iter().map(LinkView::from).collect::<Vec<_>>();
                self.json(StatusCode::OK, &views)
            }
        }
    }

    fn empty(self) -> Response<Body> {
        self.respond(StatusCode::OK, Vec::new())
    }

    fn error(self, status: StatusCode, message: &str) -> Response<Body> {
        match self {
            Self::Text => self.respond(status, message.as_bytes().to_vec()),
            Self::Json => self.json(
                status,
                &ErrorView {
                    code: status.as_u16(),
                    error: message,
                },
            ),
        }
    }
}

impl<'l> From<&'l ShortLink> for LinkView<'l> {
    fn from(link: &'l ShortLink) -> Self {
        Self {
            name: link.name_any(),
            spec: &link.spec,
            status: link.status.clone().unwrap_or_default(),
        }
    }
}
