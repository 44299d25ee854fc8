// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking Kubernetes API responses.

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

type Route = (String, String);

/// A request observed by the mock
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// A mock HTTP service that returns predefined responses based on request
/// method and exact path. Watches are matched under the `WATCH` method.
/// Several responses registered for the same route
/// are served in order; the last one keeps being served.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<Route, VecDeque<(u16, String)>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a response for requests matching method and path
    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.push(method, path, status, body);
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Replace every response for a route, usable after the client was built
    pub fn set(&self, method: &str, path: &str, status: u16, body: &str) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(
            (method.to_string(), path.to_string()),
            VecDeque::from([(status, body.to_string())]),
        );
    }

    fn push(&self, method: &str, path: &str, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back((status, body.to_string()));
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests with the given method, any path
    pub fn requests_with(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    /// Number of mutating requests (POST, PUT, PATCH, DELETE)
    pub fn write_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE"))
            .count()
    }

    fn next_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(&(method.to_string(), path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Watch requests are GETs with `watch=true`, routed separately
        let watching = req.uri().query().is_some_and(|q| q.contains("watch=true"));
        let method = if watching {
            "WATCH".to_string()
        } else {
            req.method().to_string()
        };
        let path = req.uri().path().to_string();
        let response = self.next_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body = req
                .into_body()
                .collect()
                .await
                .map(|c| c.to_bytes())
                .unwrap_or_default();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path: path.clone(),
                body,
            });

            let (status, body) =
                response.unwrap_or_else(|| (404, not_found_json("resource", &path)));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a Kubernetes Status error body
pub fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(404, "NotFound", &format!("{} \"{}\" not found", resource, name))
}

pub fn forbidden_json(resource: &str, name: &str) -> String {
    status_json(
        403,
        "Forbidden",
        &format!("{} \"{}\" is forbidden: cannot get resource", resource, name),
    )
}

pub fn conflict_json(name: &str) -> String {
    status_json(
        409,
        "Conflict",
        &format!("Operation cannot be fulfilled on secrets \"{}\"", name),
    )
}

/// Create a successful deletion Status body
pub fn deleted_json() -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Success",
        "code": 200
    })
    .to_string()
}

/// Create a ServiceAccountImport JSON body
pub fn import_json(namespace: &str, name: &str, cluster: &str, generation: i64) -> String {
    serde_json::json!({
        "apiVersion": "multicluster.admiralty.io/v1alpha1",
        "kind": "ServiceAccountImport",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": "import-uid",
            "generation": generation,
            "resourceVersion": "10"
        },
        "spec": {
            "clusterName": cluster,
            "namespace": "infra",
            "name": "db-reader"
        }
    })
    .to_string()
}

/// Create a remote ServiceAccount JSON body referencing token secrets
pub fn service_account_json(namespace: &str, name: &str, secrets: &[&str]) -> String {
    let secrets: Vec<_> = secrets
        .iter()
        .map(|s| serde_json::json!({ "name": s }))
        .collect();
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": "sa-uid"
        },
        "secrets": secrets
    })
    .to_string()
}

/// Create a service-account token secret value; `token` is base64 encoded
pub fn token_secret_value(
    namespace: &str,
    name: &str,
    service_account: &str,
    token: Option<&str>,
) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    data.insert("ca.crt".to_string(), "Y2EtYnVuZGxl".into());
    data.insert("namespace".to_string(), "aW5mcmE=".into());
    if let Some(token) = token {
        data.insert("token".to_string(), token.into());
    }
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "annotations": {
                "kubernetes.io/service-account.name": service_account,
                "kubernetes.io/service-account.uid": "sa-uid"
            }
        },
        "type": "kubernetes.io/service-account-token",
        "data": data
    })
}

pub fn token_secret_json(
    namespace: &str,
    name: &str,
    service_account: &str,
    token: Option<&str>,
) -> String {
    token_secret_value(namespace, name, service_account, token).to_string()
}

/// Wrap items into a list body
pub fn list_json(kind: &str, items: Vec<serde_json::Value>) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": { "resourceVersion": "1" },
        "items": items
    })
    .to_string()
}
