// ── Request gateway ──
//
// Every authenticated REST call goes through here: a valid bearer is
// attached, and a `401` gets exactly one refresh-and-retry.

use reqwest::Method;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use techtrax_api::ApiResponse;
use tracing::debug;

use crate::error::CoreError;
use crate::token::TokenLifecycleManager;

#[derive(Clone)]
pub struct RequestGateway {
    tokens: TokenLifecycleManager,
}

impl RequestGateway {
    pub fn new(tokens: TokenLifecycleManager) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &TokenLifecycleManager {
        &self.tokens
    }

    /// Perform one call, retrying once after a refresh if the server
    /// answers `401`. A second `401` is [`CoreError::Unauthorized`].
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, CoreError> {
        let client = self.tokens.client();
        let token = self.tokens.get_valid_access_token().await?;

        match client
            .send(method.clone(), path, Some(token.expose_secret()), body)
            .await
        {
            Err(e) if e.is_unauthorized() => {
                debug!(%path, "unauthorized, refreshing and retrying once");
                let token = self.tokens.refresh().await?;
                Ok(client
                    .send(method, path, Some(token.expose_secret()), body)
                    .await?)
            }
            other => Ok(other?),
        }
    }

    /// GET and decode the envelope's `data`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CoreError> {
        let resp = self.call(Method::GET, path, None).await?;
        decode(&resp)
    }

    /// POST a JSON body and decode the envelope's `data`.
    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, CoreError> {
        let resp = self.call(Method::POST, path, Some(body)).await?;
        decode(&resp)
    }
}

/// `status == "success"` yields `data`; anything else is a rejection
/// carrying the server's message.
fn decode<T: DeserializeOwned>(resp: &ApiResponse) -> Result<T, CoreError> {
    if !resp.envelope.is_success() {
        return Err(CoreError::Rejected {
            message: resp.envelope.message_or_status(),
        });
    }
    Ok(resp.data()?)
}
