use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::envelope::{looks_like_envelope, ApiResponse};
use super::error::ApiError;
use super::refresh::{RefreshCoordinator, RefreshTicket};
use super::tokens::{TokenPair, TokenStore};
use crate::capabilities::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ValidatedUrl};
use crate::config::TransportConfig;

/// API client that attaches stored credentials and repairs them once on 401.
///
/// Concurrent 401s share one refresh: the first becomes the leader, the rest
/// wait for its outcome and replay with the new access token.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    refresh: Arc<RefreshCoordinator>,
    config: TransportConfig,
    base_url: ValidatedUrl,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("refreshing", &self.refresh.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        config: TransportConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenStore>,
        refresh: Arc<RefreshCoordinator>,
    ) -> Result<Self, ApiError> {
        let base_url = ValidatedUrl::new(config.base_url.clone())?;
        Ok(Self {
            transport,
            tokens,
            refresh,
            config,
            base_url,
        })
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn refresh_coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    /// Builds a request for `path` under the base URL with the configured
    /// timeout. Credentials are attached at send time.
    pub fn request(&self, method: HttpMethod, path: &str) -> Result<HttpRequest, ApiError> {
        let url = self.base_url.join_path(path)?;
        Ok(HttpRequest::new(method, url).with_timeout(self.config.timeout())?)
    }

    /// Sends `request`. Any status except 401 is returned as-is; a 401 goes
    /// through one refresh-and-replay.
    #[instrument(skip(self, request), fields(
        request_id = %request.request_id(),
        method = request.method().as_str(),
    ))]
    pub async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let sent = self.attach(&mut request)?;
        let response = self.transport.execute(&request).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if let Some(token) = self.rotated_token(sent.as_ref())? {
            tracing::debug!("credentials changed while in flight; replaying");
            return self.replay(request, &token).await;
        }

        let token = match self.refresh.begin() {
            RefreshTicket::Waiter(waiter) => match waiter.wait().await {
                Some(token) => token,
                None => return Err(ApiError::Unauthorized),
            },
            RefreshTicket::Leader(leader) => match self.refresh_tokens().await {
                Ok(token) => {
                    leader.succeed(&token);
                    token
                }
                Err(e) => {
                    if let Err(clear) = self.tokens.clear() {
                        tracing::error!(error = %clear, "failed to clear credentials");
                    }
                    leader.fail();
                    tracing::warn!(error = %e, "token refresh failed");
                    return Err(e);
                }
            },
        };

        self.replay(request, &token).await
    }

    async fn replay(
        &self,
        mut request: HttpRequest,
        token: &SecretString,
    ) -> Result<HttpResponse, ApiError> {
        self.attach(&mut request)?;
        request.set_header(
            self.config.authorization_header.as_str(),
            format!("Bearer {}", token.expose_secret()),
        )?;

        let retried = self.transport.execute(&request).await?;
        if retried.is_unauthorized() {
            tracing::warn!("request rejected again after refresh");
            return Err(ApiError::Unauthorized);
        }
        Ok(retried)
    }

    /// The stored access token, if a refresh settled after `sent` went out.
    fn rotated_token(
        &self,
        sent: Option<&SecretString>,
    ) -> Result<Option<SecretString>, ApiError> {
        if self.refresh.is_refreshing() {
            return Ok(None);
        }
        let current = self.tokens.access_token()?;
        Ok(match (current, sent) {
            (Some(current), Some(sent)) if current.expose_secret() == sent.expose_secret() => None,
            (current, _) => current,
        })
    }

    /// Sends and decodes, unwrapping the response envelope when configured.
    pub async fn send<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        decode(&response, self.config.unwrap_envelope)
    }

    pub async fn get<T, K, V>(&self, path: &str, params: &[(K, V)]) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let url = self.base_url.join_path(path)?.with_query(params)?;
        let request = HttpRequest::new(HttpMethod::Get, url).with_timeout(self.config.timeout())?;
        self.send(request).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(HttpMethod::Post, path)?.with_json(body)?;
        self.send(request).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(HttpMethod::Put, path)?.with_json(body)?;
        self.send(request).await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(HttpMethod::Patch, path)?.with_json(body)?;
        self.send(request).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.request(HttpMethod::Delete, path)?;
        self.send(request).await
    }

    /// Sets the credential headers from the store; returns the access token
    /// that was attached.
    fn attach(&self, request: &mut HttpRequest) -> Result<Option<SecretString>, ApiError> {
        let access = self.tokens.access_token()?;
        match &access {
            Some(access) => request.set_header(
                self.config.authorization_header.as_str(),
                format!("Bearer {}", access.expose_secret()),
            )?,
            None => {
                request.remove_header(&self.config.authorization_header);
            }
        }
        match self.tokens.refresh_token()? {
            Some(refresh) => request.set_header(
                self.config.refresh_token_header.as_str(),
                refresh.expose_secret().as_str(),
            )?,
            None => {
                request.remove_header(&self.config.refresh_token_header);
            }
        }
        Ok(access)
    }

    /// Calls the refresh endpoint and stores the result. Bypasses the 401
    /// handling so a rejected refresh cannot recurse.
    #[instrument(skip(self))]
    async fn refresh_tokens(&self) -> Result<SecretString, ApiError> {
        let Some(refresh) = self.tokens.refresh_token()? else {
            return Err(ApiError::NoRefreshToken);
        };

        let request = self
            .request(HttpMethod::Post, &self.config.refresh_path)?
            .with_header(
                self.config.refresh_token_header.as_str(),
                refresh.expose_secret().as_str(),
            )?;

        let response = self
            .transport
            .execute(&request)
            .await
            .map_err(|e| ApiError::RefreshFailed(Box::new(e.into())))?;
        let pair: TokenPair = decode(&response, self.config.unwrap_envelope)
            .map_err(|e| ApiError::RefreshFailed(Box::new(e)))?;

        self.tokens.store_pair(&pair)?;
        tracing::info!(rotated = pair.refresh_token.is_some(), "access token refreshed");
        Ok(pair.access_token)
    }
}

/// Maps a response to its payload or a typed error.
///
/// Failure envelopes always become [`ApiError::Envelope`]. On success, an
/// envelope is unwrapped to `data` when `unwrap_envelope` is set.
pub fn decode<T: DeserializeOwned>(
    response: &HttpResponse,
    unwrap_envelope: bool,
) -> Result<T, ApiError> {
    let body: Value = if response.body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&response.body) {
            Ok(value) => value,
            Err(e) if response.is_success() => {
                return Err(ApiError::Decode {
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ApiError::Status {
                    status: response.status,
                    body: String::from_utf8_lossy(&response.body).into_owned(),
                })
            }
        }
    };

    let payload = if looks_like_envelope(&body) {
        let envelope: ApiResponse = serde_json::from_value(body.clone()).map_err(|e| {
            ApiError::Decode {
                message: e.to_string(),
            }
        })?;
        if !envelope.is_success() {
            return Err(ApiError::Envelope {
                status: response.status,
                message: envelope.failure_message(),
                code: envelope.code,
                detail: envelope.error,
            });
        }
        if unwrap_envelope {
            envelope.data.unwrap_or(Value::Null)
        } else {
            body
        }
    } else {
        body
    };

    if !response.is_success() {
        return Err(ApiError::Status {
            status: response.status,
            body: payload.to_string(),
        });
    }

    serde_json::from_value(payload).map_err(|e| ApiError::Decode {
        message: e.to_string(),
    })
}
