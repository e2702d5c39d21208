//! Concurrent batches of independent requests.

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::ResilientClient;
use crate::error::ApiError;
use crate::http::ApiRequest;

impl ResilientClient {
    /// Dispatch every request concurrently.
    ///
    /// Results line up with the input; one failure never cancels the rest.
    pub async fn batch(&self, requests: Vec<ApiRequest>) -> Vec<Result<Value, ApiError>> {
        let count = requests.len();
        let results = join_all(requests.into_iter().map(|r| self.execute(r))).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::debug!(count, failed, "Batch completed with failures");
        }
        results
    }

    /// `batch`, decoding each successful payload.
    pub async fn batch_as<T: DeserializeOwned>(
        &self,
        requests: Vec<ApiRequest>,
    ) -> Vec<Result<T, ApiError>> {
        self.batch(requests)
            .await
            .into_iter()
            .map(|r| r.and_then(|v| serde_json::from_value(v).map_err(ApiError::decode)))
            .collect()
    }
}
