//! Scripted in-process transport for store tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::{ApiError, Method, Transport};

/// Canned reply for one request
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(u16, String),
    Network(String),
}

impl Reply {
    pub fn ok(value: Value) -> Self {
        Reply::Json(value)
    }

    pub fn rejected(status: u16, message: &str) -> Self {
        Reply::Status(status, message.to_string())
    }

    fn into_result(self) -> Result<Value, ApiError> {
        match self {
            Reply::Json(value) => Ok(value),
            Reply::Status(status, message) => Err(ApiError::Status { status, message }),
            Reply::Network(cause) => Err(ApiError::Network(cause)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Replies are queued per route. The last queued reply for a route is
/// sticky and keeps being returned; unscripted routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<(Reply, Duration)>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, path: &str, reply: Reply) -> &Self {
        self.on_delayed(method, path, reply, Duration::ZERO)
    }

    pub fn on_delayed(&self, method: Method, path: &str, reply: Reply, delay: Duration) -> &Self {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back((reply, delay));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    fn next_reply(&self, method: Method, path: &str) -> (Reply, Duration) {
        let mut routes = self.routes.lock();
        match routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("queue is non-empty"),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => (
                Reply::Status(404, format!("no route for {} {}", method.as_str(), path)),
                Duration::ZERO,
            ),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        self.calls.lock().push(Call {
            method,
            path: path.to_string(),
            body,
        });

        let (reply, delay) = self.next_reply(method, path);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply.into_result()
    }
}
