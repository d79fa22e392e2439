//! Ordered request/response interceptors.
//!
//! # Design
//! A `Pipeline` is an explicit value the host owns, not global registration.
//! `prepare` runs every interceptor's `on_request` in insertion order before
//! the request goes out; `complete` runs `on_response` in reverse order once
//! the response is back, so the first interceptor sees the request first and
//! the response last.

use tracing::{debug, info};

use crate::http::{HttpRequest, HttpResponse};
use crate::client::FailureBody;

/// One stage of a `Pipeline`. Both hooks default to passing values through.
pub trait Interceptor: Send + Sync {
    fn on_request(&self, request: HttpRequest) -> HttpRequest {
        request
    }

    fn on_response(&self, _request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        response
    }
}

#[derive(Default)]
pub struct Pipeline {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor.
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn prepare(&self, request: HttpRequest) -> HttpRequest {
        self.interceptors
            .iter()
            .fold(request, |request, interceptor| interceptor.on_request(request))
    }

    /// `request` is the prepared request that produced `response`.
    pub fn complete(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        self.interceptors
            .iter()
            .rev()
            .fold(response, |response, interceptor| interceptor.on_response(request, response))
    }
}

/// Adds headers the request does not already carry.
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaders {
    headers: Vec<(String, String)>,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

impl Interceptor for DefaultHeaders {
    fn on_request(&self, mut request: HttpRequest) -> HttpRequest {
        for (name, value) in &self.headers {
            if request.header(name).is_none() {
                request.headers.push((name.clone(), value.clone()));
            }
        }
        request
    }
}

/// Calls `on_expired` when the backend reports an expired session.
///
/// Responses to the profile endpoint are ignored, since a failed profile
/// lookup is how a signed-out host discovers it has no session.
pub struct SessionGuard<F> {
    on_expired: F,
}

impl<F: Fn() + Send + Sync> SessionGuard<F> {
    pub fn new(on_expired: F) -> Self {
        Self { on_expired }
    }
}

impl<F: Fn() + Send + Sync> Interceptor for SessionGuard<F> {
    fn on_response(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        if response.is_success() || request.path.contains("/profile") {
            return response;
        }
        let expired = serde_json::from_str::<FailureBody>(&response.body)
            .ok()
            .and_then(|body| body.error)
            .is_some_and(|error| error.is_session_expired());
        if expired {
            info!(path = %request.path, "session expired");
            (self.on_expired)();
        }
        response
    }
}

/// Emits a `tracing` event per request and response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLog;

impl Interceptor for RequestLog {
    fn on_request(&self, request: HttpRequest) -> HttpRequest {
        debug!(method = request.method.as_str(), path = %request.path, "sending request");
        request
    }

    fn on_response(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status = response.status,
            "received response"
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::http::HttpMethod;

    fn request(path: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    const EXPIRED: &str =
        r#"{"status":"failed","error":{"type":"jwtauth","code":13,"message":"Not authenticated"}}"#;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Interceptor for Record {
        fn on_request(&self, request: HttpRequest) -> HttpRequest {
            self.log.lock().unwrap().push(format!("req:{}", self.name));
            request
        }

        fn on_response(&self, _request: &HttpRequest, response: HttpResponse) -> HttpResponse {
            self.log.lock().unwrap().push(format!("resp:{}", self.name));
            response
        }
    }

    #[test]
    fn requests_run_forward_and_responses_run_backward() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(Record { name: "a", log: log.clone() })
            .with(Record { name: "b", log: log.clone() });
        let req = pipeline.prepare(request("/x"));
        pipeline.complete(&req, response(200, ""));
        assert_eq!(*log.lock().unwrap(), vec!["req:a", "req:b", "resp:b", "resp:a"]);
    }

    #[test]
    fn default_headers_do_not_override() {
        let pipeline = Pipeline::new().with(
            DefaultHeaders::new()
                .header("content-type", "application/json")
                .header("accept", "application/json"),
        );
        let mut req = request("/x");
        req.headers.push(("Content-Type".to_string(), "text/csv".to_string()));
        let req = pipeline.prepare(req);
        assert_eq!(req.header("content-type"), Some("text/csv"));
        assert_eq!(req.header("accept"), Some("application/json"));
        assert_eq!(req.headers.len(), 2);
    }

    #[test]
    fn session_guard_fires_on_expired_session() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let pipeline = Pipeline::new().with(SessionGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let req = request("http://h/managed/query");
        pipeline.complete(&req, response(401, EXPIRED));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        pipeline.complete(&req, response(401, r#"{"status":"failed","error":{"type":"auth","code":10,"message":""}}"#));
        pipeline.complete(&req, response(502, "bad gateway"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn session_guard_accepts_error_without_status() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let pipeline = Pipeline::new().with(SessionGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let req = request("http://h/managed/request");
        pipeline.complete(&req, response(401, r#"{"error":{"type":"jwtauth","code":13}}"#));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn session_guard_ignores_profile() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let pipeline = Pipeline::new().with(SessionGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        pipeline.complete(&request("http://h/user/profile"), response(401, EXPIRED));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn request_log_passes_through() {
        let pipeline = Pipeline::new().with(RequestLog);
        assert_eq!(pipeline.len(), 1);
        let req = pipeline.prepare(request("/x"));
        let resp = pipeline.complete(&req, response(204, ""));
        assert_eq!(resp.status, 204);
    }
}
