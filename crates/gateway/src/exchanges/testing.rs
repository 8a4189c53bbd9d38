//! Test doubles shared by the adapter unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::AdapterOptions;
use crate::application::RequestLimits;
use crate::domain::RestFetcher;
use crate::error::FetchError;

pub(crate) use crate::application::channel_registry::tests::RecordingTransport;

/// Fetcher answering from a fixed path → body table. Prefix entries
/// cover paths that embed the current time.
#[derive(Default)]
pub(crate) struct TableFetcher {
    responses: Mutex<HashMap<String, Value>>,
    prefixes: Mutex<Vec<(String, Value)>>,
    pub requests: Mutex<Vec<String>>,
}

impl TableFetcher {
    pub fn with(self, path: &str, body: Value) -> Self {
        self.responses.lock().insert(path.to_string(), body);
        self
    }

    pub fn with_prefix(self, prefix: &str, body: Value) -> Self {
        self.prefixes.lock().push((prefix.to_string(), body));
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RestFetcher for TableFetcher {
    async fn get(&self, path: &str) -> Result<Value, FetchError> {
        self.requests.lock().push(path.to_string());
        let exact = self.responses.lock().get(path).cloned();
        exact
            .or_else(|| {
                self.prefixes
                    .lock()
                    .iter()
                    .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                    .map(|(_, body)| body.clone())
            })
            .ok_or_else(|| FetchError::Api {
                status: 404,
                message: format!("no fixture for {path}"),
            })
    }
}

pub(crate) fn transport() -> Arc<RecordingTransport> {
    Arc::new(RecordingTransport::default())
}

pub(crate) fn options() -> AdapterOptions {
    AdapterOptions::default().with_limits(RequestLimits::new(100))
}

/// Frames sent so far, parsed
pub(crate) fn sent_json(transport: &RecordingTransport) -> Vec<Value> {
    transport
        .take()
        .iter()
        .filter_map(|text| serde_json::from_str(text).ok())
        .collect()
}
