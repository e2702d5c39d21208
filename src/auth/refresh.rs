//! Access token refresh.
//!
//! # Responsibilities
//! - Exchange the refresh token for a new credential pair
//! - Single-flight: concurrent 401s share one refresh call
//! - On any failure: clear credentials and invoke the login redirect
//!
//! # Design Decisions
//! - The refresh call goes straight to the transport: no cache, no retry,
//!   and a 401 from it is terminal rather than another refresh

use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::credentials::{Credential, CredentialStore};
use crate::auth::redirect::LoginRedirect;
use crate::error::ApiError;
use crate::http::{new_request_id, Transport, WireRequest, REQUEST_ID_HEADER};
use crate::observability::metrics;
use crate::resilience::coalescer::RequestCoalescer;
use crate::resilience::timeouts::with_timeout;

const REFRESH_KEY: &str = "auth:refresh";

#[derive(Clone)]
struct RefreshCall {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    redirect: Arc<dyn LoginRedirect>,
    url: Url,
    timeout: Duration,
    login_route: String,
}

impl RefreshCall {
    async fn run(self) -> Result<Credential, ApiError> {
        match self.exchange().await {
            Ok(credential) => {
                self.credentials.set(credential.clone());
                tracing::info!("Access token refreshed");
                metrics::record_token_refresh("success");
                Ok(credential)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, clearing credentials");
                metrics::record_token_refresh("failure");
                self.credentials.clear();
                self.redirect.redirect_to_login(&self.login_route);
                Err(ApiError::unauthenticated(format!(
                    "Session expired: {}",
                    e.message
                )))
            }
        }
    }

    async fn exchange(&self) -> Result<Credential, ApiError> {
        let refresh_token = self
            .credentials
            .refresh_token()
            .ok_or_else(|| ApiError::unauthenticated("No refresh token available"))?;

        let request = WireRequest {
            method: Method::POST,
            url: self.url.clone(),
            headers: vec![
                (REQUEST_ID_HEADER.to_string(), new_request_id()),
                ("authorization".to_string(), format!("Bearer {}", refresh_token)),
            ],
            body: None,
        };

        let response = with_timeout(self.timeout, self.transport.send(request)).await?;
        let body = response.into_result()?;
        serde_json::from_value(body).map_err(ApiError::decode)
    }
}

/// Refreshes the credential held by a `CredentialStore`.
pub struct TokenRefresher {
    call: RefreshCall,
    single_flight: RequestCoalescer<&'static str, Credential>,
}

impl TokenRefresher {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        redirect: Arc<dyn LoginRedirect>,
        url: Url,
        timeout: Duration,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            call: RefreshCall {
                transport,
                credentials,
                redirect,
                url,
                timeout,
                login_route: login_route.into(),
            },
            single_flight: RequestCoalescer::new(),
        }
    }

    /// Refresh the credential, joining a refresh already in flight.
    ///
    /// Every failure surfaces as `Unauthenticated`.
    pub async fn refresh(&self) -> Result<Credential, ApiError> {
        let call = self.call.clone();
        self.single_flight.run(REFRESH_KEY, || call.run()).await
    }

    pub fn url(&self) -> &Url {
        &self.call.url
    }
}
