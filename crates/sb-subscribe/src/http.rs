//! HTTP client port.
//!
//! The pipeline only needs "GET this URL with these headers"; the concrete
//! client is injected so tests can run against in-memory fakes. The reqwest
//! implementation lives behind the `subs_http` feature.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use crate::model::SubsError;

/// A GET request descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Timeout in seconds (0 = no timeout)
    pub timeout_secs: u64,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout_secs,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_basic_auth(self, username: &str, password: &str) -> Self {
        let token = STANDARD.encode(format!("{username}:{password}"));
        self.with_header("Authorization", format!("Basic {token}"))
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Check if the status code indicates success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text with a leading BOM removed. Invalid sequences are replaced.
    pub fn text(&self) -> String {
        let body = self
            .body
            .strip_prefix(b"\xEF\xBB\xBF".as_slice())
            .unwrap_or(self.body.as_slice());
        String::from_utf8_lossy(body).into_owned()
    }
}

/// Port trait for blocking HTTP GETs.
pub trait HttpClient: Send + Sync {
    fn execute(&self, req: HttpRequest) -> Result<HttpResponse, SubsError>;
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

/// Execute `req` until a 2xx response or the attempts run out.
///
/// Transport errors and non-2xx statuses are both retried.
pub fn fetch_with_retry(
    client: &dyn HttpClient,
    req: &HttpRequest,
    policy: RetryPolicy,
) -> Result<HttpResponse, SubsError> {
    let attempts = policy.attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match client.execute(req.clone()) {
            Ok(resp) if resp.is_success() => return Ok(resp),
            Ok(resp) => last = format!("status {}", resp.status),
            Err(e) => last = e.to_string(),
        }
        debug!(url = %req.url, attempt, error = %last, "fetch attempt failed");
        if attempt < attempts && !policy.delay.is_zero() {
            std::thread::sleep(policy.delay);
        }
    }
    warn!(url = %req.url, attempts, "giving up on fetch");
    Err(SubsError::Fetch(format!("{}: {last}", req.url)))
}

#[cfg(feature = "subs_http")]
pub use reqwest_client::ReqwestHttpClient;

#[cfg(feature = "subs_http")]
mod reqwest_client {
    use super::{HttpClient, HttpRequest, HttpResponse};
    use crate::model::SubsError;
    use std::time::Duration;

    /// Blocking reqwest client. Per-request timeouts override the default.
    #[derive(Debug, Clone)]
    pub struct ReqwestHttpClient {
        inner: reqwest::blocking::Client,
    }

    impl ReqwestHttpClient {
        pub fn new() -> Result<Self, SubsError> {
            let inner = reqwest::blocking::Client::builder()
                .user_agent(concat!("sb-subscribe/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| SubsError::Fetch(e.to_string()))?;
            Ok(Self { inner })
        }
    }

    impl HttpClient for ReqwestHttpClient {
        fn execute(&self, req: HttpRequest) -> Result<HttpResponse, SubsError> {
            let mut builder = self.inner.get(&req.url);
            if req.timeout_secs > 0 {
                builder = builder.timeout(Duration::from_secs(req.timeout_secs));
            }
            for (k, v) in &req.headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            let resp = builder
                .send()
                .map_err(|e| SubsError::Fetch(e.to_string()))?;
            let status = resp.status().as_u16();
            let body = resp
                .bytes()
                .map_err(|e| SubsError::Fetch(e.to_string()))?
                .to_vec();
            Ok(HttpResponse { status, body })
        }
    }
}

/// Scripted client for tests: maps URL to a queue of responses.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeClient {
        pub routes: Mutex<HashMap<String, Vec<Result<HttpResponse, SubsError>>>>,
        pub seen: Mutex<Vec<HttpRequest>>,
    }

    impl FakeClient {
        pub(crate) fn with(url: &str, replies: Vec<Result<HttpResponse, SubsError>>) -> Self {
            let c = Self::default();
            c.routes.lock().unwrap().insert(url.to_string(), replies);
            c
        }
    }

    impl HttpClient for FakeClient {
        fn execute(&self, req: HttpRequest) -> Result<HttpResponse, SubsError> {
            self.seen.lock().unwrap().push(req.clone());
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&req.url) {
                Some(q) if !q.is_empty() => q.remove(0),
                _ => Err(SubsError::Fetch("no route".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeClient;
    use super::*;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn retries_until_success() {
        let c = FakeClient::with(
            "http://s/",
            vec![
                Err(SubsError::Fetch("reset".into())),
                Ok(HttpResponse { status: 502, body: vec![] }),
                Ok(HttpResponse::ok("body")),
            ],
        );
        let resp = fetch_with_retry(&c, &HttpRequest::get("http://s/", 5), fast(3)).unwrap();
        assert_eq!(resp.text(), "body");
        assert_eq!(c.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn gives_up_after_bound() {
        let c = FakeClient::default();
        let err = fetch_with_retry(&c, &HttpRequest::get("http://s/", 5), fast(4)).unwrap_err();
        assert!(matches!(err, SubsError::Fetch(_)));
        assert_eq!(c.seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn bom_is_stripped() {
        let resp = HttpResponse::ok(b"\xEF\xBB\xBFvless://x".to_vec());
        assert_eq!(resp.text(), "vless://x");
    }

    #[test]
    fn basic_auth_header() {
        let req = HttpRequest::get("http://s/", 1).with_basic_auth("u", "p");
        assert_eq!(req.header("authorization"), Some("Basic dTpw"));
    }
}
