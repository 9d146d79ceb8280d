use std::collections::HashMap;
use std::sync::Mutex;

use sb_subscribe::{HttpClient, HttpRequest, HttpResponse, SubsError};

/// Serves fixed bodies by URL; unknown URLs fail like a dead host.
#[derive(Default)]
pub struct StaticClient {
    bodies: HashMap<String, String>,
    pub hits: Mutex<Vec<String>>,
}

impl StaticClient {
    #[allow(dead_code)]
    pub fn with(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_string(), body.to_string());
        self
    }
}

impl HttpClient for StaticClient {
    fn execute(&self, req: HttpRequest) -> Result<HttpResponse, SubsError> {
        self.hits.lock().unwrap().push(req.url.clone());
        self.bodies
            .get(&req.url)
            .map(|b| HttpResponse::ok(b.as_str()))
            .ok_or_else(|| SubsError::Fetch(format!("unreachable: {}", req.url)))
    }
}
