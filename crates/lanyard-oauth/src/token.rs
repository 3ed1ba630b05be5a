//! Proof-signed calls against the auth server's token endpoint.
//!
//! Every call here is a form-encoded POST carrying a fresh `DPoP` header.
//! Responses are classified into the crate's error taxonomy so the pipeline
//! can decide between retrying, correcting the clock, or logging out.

use http::{Method, Request, StatusCode};
use lanyard_common::{HttpClient, SecureStore};
use serde::Serialize;
use smol_str::SmolStr;
use std::sync::Arc;

use crate::{
    dpop::ProofGenerator,
    error::{AuthError, Result},
    types::{
        DeviceAuthorizationResponse, DeviceTokenParameters, OAuthTokenResponse,
        RefreshRequestParameters, TokenErrorResponse, TokenGrantType, TokenRequestParameters,
    },
};

/// Endpoints and client identity for the auth server.
#[derive(Debug, Clone)]
pub struct TokenEndpoints {
    pub token: SmolStr,
    /// RFC 8628 device flow; absent when the server does not offer it.
    pub device_authorization: Option<SmolStr>,
    pub client_id: SmolStr,
}

/// Outcome of one device-flow token poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePoll {
    Granted(OAuthTokenResponse),
    /// User has not approved yet; poll again after the interval.
    Pending,
    /// Server asked us to back off before the next poll.
    SlowDown,
}

#[derive(Serialize)]
struct RequestPayload<'a, T: Serialize> {
    client_id: &'a str,
    #[serde(flatten)]
    parameters: T,
}

pub struct TokenClient<C, S> {
    http: C,
    proofs: Arc<ProofGenerator<S>>,
    endpoints: TokenEndpoints,
}

impl<C, S> TokenClient<C, S>
where
    C: HttpClient + Send + Sync,
    S: SecureStore,
{
    pub fn new(http: C, proofs: Arc<ProofGenerator<S>>, endpoints: TokenEndpoints) -> Self {
        Self {
            http,
            proofs,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &TokenEndpoints {
        &self.endpoints
    }

    /// Exchange a refresh token for a new token pair.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokenResponse> {
        self.token_call(
            self.endpoints.token.clone(),
            RefreshRequestParameters {
                grant_type: TokenGrantType::RefreshToken,
                refresh_token,
                scope: None,
            },
        )
        .await
    }

    /// Redeem an authorization code (with optional PKCE verifier).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthTokenResponse> {
        self.token_call(
            self.endpoints.token.clone(),
            TokenRequestParameters {
                grant_type: TokenGrantType::AuthorizationCode,
                code,
                redirect_uri,
                code_verifier,
            },
        )
        .await
    }

    /// Start a device-flow login and get the code the user must enter.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn device_authorization(&self) -> Result<DeviceAuthorizationResponse> {
        let endpoint = self
            .endpoints
            .device_authorization
            .clone()
            .ok_or_else(|| AuthError::TokenEndpoint {
                status: StatusCode::NOT_FOUND,
                error: SmolStr::new_static("unsupported_grant_type"),
                description: Some(SmolStr::new_static("no device authorization endpoint")),
            })?;
        self.token_call(endpoint, serde_json::Map::new()).await
    }

    /// Poll the token endpoint for a device-flow grant.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn device_token(&self, device_code: &str) -> Result<DevicePoll> {
        let result = self
            .token_call(
                self.endpoints.token.clone(),
                DeviceTokenParameters {
                    grant_type: TokenGrantType::DeviceCode,
                    device_code,
                },
            )
            .await;
        match result {
            Ok(response) => Ok(DevicePoll::Granted(response)),
            Err(AuthError::TokenEndpoint { error, .. }) if error == "authorization_pending" => {
                Ok(DevicePoll::Pending)
            }
            Err(AuthError::TokenEndpoint { error, .. }) if error == "slow_down" => {
                Ok(DevicePoll::SlowDown)
            }
            Err(e) => Err(e),
        }
    }

    async fn token_call<O, P>(&self, endpoint: SmolStr, parameters: P) -> Result<O>
    where
        O: serde::de::DeserializeOwned,
        P: Serialize,
    {
        let body = serde_html_form::to_string(RequestPayload {
            client_id: &self.endpoints.client_id,
            parameters,
        })?;
        // Token endpoint proofs carry no `ath`; there is no bound token yet.
        let proof = self.proofs.generate("POST", &endpoint, None).await?;
        let request = Request::builder()
            .uri(endpoint.as_str())
            .method(Method::POST)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("DPoP", proof)
            .body(body.into_bytes())?;

        let response = self.http.send_http(request).await.map_err(|e| {
            if C::is_tls_failure(&e) {
                AuthError::TlsFailure(Box::new(e))
            } else {
                AuthError::NetworkTransient(Box::new(e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(serde_json::from_slice(response.body())?);
        }

        match serde_json::from_slice::<TokenErrorResponse>(response.body()) {
            Ok(body) if status == StatusCode::BAD_REQUEST && is_proof_time_error(&body) => {
                let server_date = response
                    .headers()
                    .get(http::header::DATE)
                    .and_then(|v| v.to_str().ok())
                    .map(SmolStr::new);
                Err(AuthError::ProofTimeInvalid { server_date })
            }
            Ok(body) if status.is_client_error() => Err(AuthError::TokenEndpoint {
                status,
                error: body.error,
                description: body.error_description,
            }),
            _ => Err(AuthError::AuthRejected(status)),
        }
    }
}

/// A 400 whose error code mentions the proof mechanism means the proof
/// itself was rejected, most often for an `iat` outside the acceptance
/// window.
fn is_proof_time_error(body: &TokenErrorResponse) -> bool {
    let mentions_dpop = |s: &str| s.to_ascii_lowercase().contains("dpop");
    mentions_dpop(&body.error)
        || body
            .error_description
            .as_deref()
            .is_some_and(mentions_dpop)
}
