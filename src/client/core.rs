// File: ./src/client/core.rs
use crate::client::cert::NoVerifier;
use crate::config::Config;
use crate::error::ProviderError;

use http::{Method, Request, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tower_http::auth::AddAuthorization;

type HttpsClient = AddAuthorization<
    Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        String,
    >,
>;

/// Reduces an absolute href (`https://host/a/b`) to its path (`/a/b`).
pub fn strip_host(href: &str) -> String {
    if let Ok(uri) = href.parse::<Uri>()
        && (uri.scheme().is_some() || uri.authority().is_some())
    {
        return uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());
    }
    href.to_string()
}

// --- REQUEST / RESPONSE CONTRACT ---

/// One remote exchange. `path` is server-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl DavRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: strip_host(path),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn xml(self, body: String) -> Self {
        let mut req = self.header("Content-Type", "application/xml; charset=utf-8");
        req.body = body;
        req
    }

    pub fn calendar(self, body: String) -> Self {
        let mut req = self.header("Content-Type", "text/calendar; charset=utf-8");
        req.body = body;
        req
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResponse {
    pub status: StatusCode,
    pub etag: Option<String>,
    pub body: String,
}

/// The request/response boundary the CalDAV provider is written against.
///
/// Implementations return `Ok` for any HTTP answer, whatever its status; `Err`
/// is reserved for exchanges that produced no answer (connect failure,
/// timeout), always as [`ProviderError::Unavailable`].
pub trait DavTransport: Send + Sync {
    fn send(
        &self,
        request: DavRequest,
    ) -> impl Future<Output = Result<DavResponse, ProviderError>> + Send;
}

// --- HTTP TRANSPORT ---

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: HttpsClient,
    origin: String,
    root: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        url: &str,
        user: &str,
        pass: &str,
        insecure: bool,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let uri: Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProviderError::Validation(e.to_string()))?;
        let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) else {
            return Err(ProviderError::Validation(format!(
                "URL '{}' must be absolute",
                url
            )));
        };
        let origin = format!("{}://{}", scheme, authority);
        let mut root = uri.path().to_string();
        if !root.ends_with('/') {
            root.push('/');
        }

        let tls_config_builder = rustls::ClientConfig::builder();
        let tls_config = if insecure {
            tls_config_builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            let mut root_store = rustls::RootCertStore::empty();
            let result = rustls_native_certs::load_native_certs();
            root_store.add_parsable_certificates(result.certs);
            if root_store.is_empty() {
                return Err(ProviderError::Unavailable(
                    "No valid system certificates found.".to_string(),
                ));
            }
            tls_config_builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();

        let http_client = Client::builder(TokioExecutor::new()).build(https_connector);
        let client = AddAuthorization::basic(http_client, user, pass);
        Ok(Self {
            client,
            origin,
            root,
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        Self::new(
            &config.url,
            &config.username,
            &config.password,
            config.allow_insecure_certs,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Path of the configured collection, always ending in `/`.
    pub fn root(&self) -> &str {
        &self.root
    }

    async fn exchange(&self, request: DavRequest) -> Result<DavResponse, ProviderError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProviderError::Validation(e.to_string()))?;
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.origin, request.path));
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        let http_request = builder
            .body(request.body)
            .map_err(|e| ProviderError::Validation(e.to_string()))?;

        let response = self
            .client
            .clone()
            .oneshot(http_request)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        let etag = response
            .headers()
            .get(http::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("reading response body: {}", e)))?
            .to_bytes();

        Ok(DavResponse {
            status,
            etag,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

impl DavTransport for HttpTransport {
    async fn send(&self, request: DavRequest) -> Result<DavResponse, ProviderError> {
        let label = format!("{} {}", request.method, request.path);
        log::debug!("{}", label);
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => {
                if let Ok(resp) = &result {
                    log::debug!("{} -> {}", label, resp.status);
                }
                result
            }
            Err(_) => Err(ProviderError::Unavailable(format!(
                "{} timed out after {:?}",
                label, self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_and_authority() {
        assert_eq!(strip_host("https://dav.example.com/cal/a.ics"), "/cal/a.ics");
        assert_eq!(strip_host("/cal/a.ics"), "/cal/a.ics");
    }

    #[test]
    fn rejects_relative_urls() {
        let err = HttpTransport::new("/just/a/path", "u", "p", true, Duration::from_secs(1));
        assert!(matches!(err, Err(ProviderError::Validation(_))));
    }

    #[test]
    fn root_gets_trailing_slash() {
        let t = HttpTransport::new(
            "http://127.0.0.1:1/dav/calendars/me",
            "u",
            "p",
            true,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(t.root(), "/dav/calendars/me/");
    }
}
