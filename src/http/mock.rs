//! Scripted in-memory transport for unit tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::http::response::HttpResponse;
use crate::http::transport::{Transport, WireRequest};

type Handler = Box<dyn Fn(&WireRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// Answers every request with a closure and records what it saw.
pub(crate) struct ScriptedTransport {
    handler: Handler,
    delay: Duration,
    seen: Mutex<Vec<(Instant, WireRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&WireRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self::with_delay(handler, Duration::ZERO)
    }

    /// Like `new`, but each response is held back by `delay`.
    pub(crate) fn with_delay<F>(handler: F, delay: Duration) -> Arc<Self>
    where
        F: Fn(&WireRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Requests whose URL path equals `path`.
    pub(crate) fn count_path(&self, path: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.url.path() == path)
            .count()
    }

    pub(crate) fn requests(&self) -> Vec<WireRequest> {
        self.seen.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    /// When each request arrived, in order.
    pub(crate) fn arrivals(&self) -> Vec<Instant> {
        self.seen.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: WireRequest) -> Result<HttpResponse, TransportError> {
        self.seen
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(&request)
    }
}
