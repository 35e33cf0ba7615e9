//! Mock Google API server for tests.
//!
//! Serves canned `(status, body)` responses per request path and records every request it
//! receives so tests can assert on what was sent. Each path has a queue of responses; the last
//! one keeps being served once the queue is down to a single entry.

use bytes::Bytes;
use eyre::Context;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockGoogleApi {
    routes: Arc<Mutex<HashMap<String, VecDeque<(u16, String)>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockGoogleApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for `path`.
    pub fn respond(&self, path: &str, status: u16, body: serde_json::Value) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    /// Queues a raw, possibly malformed, body for `path`.
    pub fn respond_raw(&self, path: &str, status: u16, body: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    fn next_response(&self, path: &str) -> (u16, String) {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => (
                404,
                serde_json::json!({
                    "error": { "code": 404, "message": format!("no mock for {path}"), "errors": [] }
                })
                .to_string(),
            ),
        }
    }

    fn handle(&self, req: &Request<body::Incoming>) -> Response<Full<Bytes>> {
        let path = req.uri().path().to_string();
        let query = form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let authorization = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        tracing::trace!(%path, "mock Google API request");
        self.requests.lock().unwrap().push(RecordedRequest {
            path: path.clone(),
            query,
            authorization,
        });

        let (status, body) = self.next_response(&path);
        let mut response = Response::new(Full::<Bytes>::from(body));
        *response.status_mut() = StatusCode::from_u16(status).unwrap();
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        response
    }

    /// Starts serving on a random local port and returns the base URL.
    pub async fn start(&self) -> eyre::Result<String> {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind to localhost")?;
        let addr = socket.local_addr().context("get local address")?;
        let api = self.clone();
        tokio::spawn(async move {
            while let Ok((conn, _)) = socket.accept().await {
                let api = api.clone();
                tokio::spawn(async move {
                    let conn = hyper_util::rt::TokioIo::new(conn);
                    let service = service_fn(move |req: Request<body::Incoming>| {
                        let response = api.handle(&req);
                        async move { Ok::<_, std::convert::Infallible>(response) }
                    });
                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(conn, service)
                        .await
                    {
                        tracing::debug!(error = %e, "mock connection ended");
                    }
                });
            }
        });
        Ok(format!("http://{addr}"))
    }
}
