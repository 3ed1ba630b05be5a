//! The authenticated request path.
//!
//! Callers hand over a plain `http::Request`; the pipeline attaches the
//! `Authorization` header, a fresh proof, and the legacy session cookie,
//! then transparently refreshes the token pair when the server turns the
//! request away. Refreshes are single-flight: any number of requests
//! failing at once produce one token-endpoint call, and each original
//! request is retried at most once.

use http::{HeaderValue, Request, Response, StatusCode, header};
use lanyard_common::{HttpClient, SecureStore};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::{
    credentials::{Credential, CredentialStore},
    dpop::ProofGenerator,
    error::{AuthError, LogoutReason, Result},
    keys::KeyManager,
    skew::ClockSkew,
    token::{DevicePoll, TokenClient, TokenEndpoints},
    types::{DeviceAuthorizationResponse, OAuthTokenResponse},
};

/// Tokens within this many seconds of expiry are refreshed up front
/// instead of burning a round trip on a guaranteed 401.
const EXPIRY_LEEWAY_SECONDS: i64 = 30;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub token_endpoint: SmolStr,
    pub device_authorization_endpoint: Option<SmolStr>,
    pub client_id: SmolStr,
    pub redirect_uri: SmolStr,
    /// Name of the legacy session cookie to capture and replay, if any.
    pub session_cookie_name: Option<SmolStr>,
    /// When proof signing fails, fall back to a plain `Bearer` header
    /// instead of failing the request. Off by default: a silent downgrade
    /// would hide a broken device key.
    pub allow_bearer_fallback: bool,
}

impl PipelineConfig {
    pub fn new(
        token_endpoint: impl Into<SmolStr>,
        client_id: impl Into<SmolStr>,
        redirect_uri: impl Into<SmolStr>,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            device_authorization_endpoint: None,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            session_cookie_name: None,
            allow_bearer_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    /// A token refresh is in flight.
    Refreshing,
    /// Session was forcibly terminated; the app must re-run login.
    LoggedOut(LogoutReason),
}

pub struct AuthPipeline<C, S> {
    http: C,
    proofs: Arc<ProofGenerator<S>>,
    credentials: CredentialStore<S>,
    tokens: TokenClient<C, S>,
    config: PipelineConfig,
    state: RwLock<AuthState>,
    /// Single-flight gate for token refreshes.
    refresh_gate: Mutex<()>,
}

impl<C, S> AuthPipeline<C, S>
where
    C: HttpClient + Clone + Send + Sync,
    S: SecureStore + Clone,
{
    /// Load persisted state and assemble the pipeline.
    pub async fn new(http: C, store: S, config: PipelineConfig) -> Result<Self> {
        let proofs = Arc::new(ProofGenerator::new(
            KeyManager::new(store.clone()),
            ClockSkew::load(store.clone()).await?,
        ));
        let credentials = CredentialStore::load(store).await?;
        let state = if credentials.get().await.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        let tokens = TokenClient::new(
            http.clone(),
            proofs.clone(),
            TokenEndpoints {
                token: config.token_endpoint.clone(),
                device_authorization: config.device_authorization_endpoint.clone(),
                client_id: config.client_id.clone(),
            },
        );
        Ok(Self {
            http,
            proofs,
            credentials,
            tokens,
            config,
            state: RwLock::new(state),
            refresh_gate: Mutex::new(()),
        })
    }

    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    pub fn credentials(&self) -> &CredentialStore<S> {
        &self.credentials
    }

    pub fn proofs(&self) -> &ProofGenerator<S> {
        &self.proofs
    }

    /// Send a request with credentials attached, refreshing them once if
    /// the server rejects them.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(uri = %request.uri())))]
    pub async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let (parts, body) = request.into_parts();
        let mut credential = self.require_credential().await?;

        if self.is_stale(&credential) {
            credential = self.refresh_credential(&credential.access_token).await?;
        }

        let attempt = self
            .build_attempt(parts.clone(), body.clone(), &credential)
            .await?;
        let response = match self.http.send_http(attempt).await {
            Ok(response) => response,
            Err(e) if C::is_tls_failure(&e) => {
                // A poisoned pooled connection shows up as a handshake
                // failure. A forced refresh rebuilds the session; if that
                // fails too the session is unrecoverable.
                return self.recover_from_tls(parts, body, &credential).await;
            }
            Err(e) => return Err(AuthError::NetworkTransient(Box::new(e))),
        };

        if !is_auth_rejection(response.status()) {
            self.capture_session_cookie(&response).await?;
            return Ok(response);
        }

        let credential = self.refresh_credential(&credential.access_token).await?;
        let retry = self.build_attempt(parts, body, &credential).await?;
        let response = self
            .http
            .send_http(retry)
            .await
            .map_err(|e| AuthError::NetworkTransient(Box::new(e)))?;
        if is_auth_rejection(response.status()) {
            // One retry only.
            return Err(AuthError::AuthRejected(response.status()));
        }
        self.capture_session_cookie(&response).await?;
        Ok(response)
    }

    /// Redeem an authorization code and install the resulting tokens.
    pub async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<()> {
        let response = self
            .tokens
            .exchange_code(code, &self.config.redirect_uri, code_verifier)
            .await?;
        self.install_tokens(response).await
    }

    /// Start a device-flow login.
    pub async fn device_authorization(&self) -> Result<DeviceAuthorizationResponse> {
        self.tokens.device_authorization().await
    }

    /// Poll for a device-flow grant, installing the tokens on success.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll> {
        let outcome = self.tokens.device_token(device_code).await?;
        if let DevicePoll::Granted(response) = &outcome {
            self.install_tokens(response.clone()).await?;
        }
        Ok(outcome)
    }

    /// User-initiated logout: drop the credentials but keep the device key
    /// and clock correction for the next session.
    pub async fn logout(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.credentials.clear_all().await?;
        *state = AuthState::Unauthenticated;
        Ok(())
    }

    async fn install_tokens(&self, response: OAuthTokenResponse) -> Result<()> {
        let expires_at = response
            .expires_in
            .map(|seconds| self.proofs.skew().now_unix() + seconds);
        self.credentials
            .update_tokens(
                response.access_token.to_string(),
                response.refresh_token.map(|t| t.to_string()),
                expires_at,
            )
            .await?;
        *self.state.write().await = AuthState::Authenticated;
        Ok(())
    }

    async fn require_credential(&self) -> Result<Credential> {
        match self.credentials.get().await {
            Some(credential) => Ok(credential),
            None => match *self.state.read().await {
                AuthState::LoggedOut(reason) => Err(AuthError::AuthenticationRequired(reason)),
                _ => Err(AuthError::NotAuthenticated),
            },
        }
    }

    async fn build_attempt(
        &self,
        parts: http::request::Parts,
        body: Vec<u8>,
        credential: &Credential,
    ) -> Result<Request<Vec<u8>>> {
        let mut request = Request::from_parts(parts, body);
        let proof = self
            .proofs
            .generate(
                request.method().as_str(),
                &request.uri().to_string(),
                Some(&credential.access_token),
            )
            .await;

        let headers = request.headers_mut();
        match proof {
            Ok(proof) => {
                headers.insert(
                    header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("DPoP {}", credential.access_token))?,
                );
                headers.insert("DPoP", HeaderValue::from_str(&proof)?);
            }
            Err(_) if self.config.allow_bearer_fallback => {
                #[cfg(feature = "tracing")]
                tracing::warn!("proof signing failed, downgrading to bearer");
                headers.insert(
                    header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", credential.access_token))?,
                );
            }
            Err(e) => return Err(e),
        }
        if let (Some(name), Some(value)) = (
            self.config.session_cookie_name.as_ref(),
            credential.session_cookie.as_ref(),
        ) {
            headers.insert(
                header::COOKIE,
                HeaderValue::from_str(&format!("{name}={value}"))?,
            );
        }
        Ok(request)
    }

    /// Pull the legacy session cookie out of `Set-Cookie`, when configured.
    async fn capture_session_cookie(&self, response: &Response<Vec<u8>>) -> Result<()> {
        let Some(name) = self.config.session_cookie_name.as_ref() else {
            return Ok(());
        };
        for value in response.headers().get_all(header::SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            let Some(pair) = value.split(';').next() else { continue };
            if let Some((cookie_name, cookie_value)) = pair.split_once('=')
                && cookie_name.trim() == name.as_str()
            {
                self.credentials
                    .set_session_cookie(cookie_value.trim().to_string())
                    .await?;
            }
        }
        Ok(())
    }

    async fn recover_from_tls(
        &self,
        parts: http::request::Parts,
        body: Vec<u8>,
        credential: &Credential,
    ) -> Result<Response<Vec<u8>>> {
        match self.refresh_credential(&credential.access_token).await {
            Ok(fresh) => {
                let retry = self.build_attempt(parts, body, &fresh).await?;
                self.http
                    .send_http(retry)
                    .await
                    .map_err(|e| AuthError::NetworkTransient(Box::new(e)))
            }
            Err(_) => Err(self.force_logout(LogoutReason::SslRecoveryFailed).await),
        }
    }

    /// Refresh the token pair, deduplicating concurrent callers.
    ///
    /// `stale_token` is the access token the caller saw fail. If another
    /// task already replaced it by the time we hold the gate, that result
    /// is reused instead of hitting the endpoint again.
    async fn refresh_credential(&self, stale_token: &str) -> Result<Credential> {
        let _gate = self.refresh_gate.lock().await;
        let current = self.require_credential().await?;
        if current.access_token != stale_token {
            return Ok(current);
        }
        let Some(refresh_token) = current.refresh_token else {
            return Err(self.force_logout(LogoutReason::RefreshFailed).await);
        };
        *self.state.write().await = AuthState::Refreshing;

        match self.run_refresh(&refresh_token).await {
            Ok(response) => {
                self.install_tokens(response).await?;
                self.require_credential().await
            }
            Err(e) => Err(self.handle_refresh_failure(e).await),
        }
    }

    /// One refresh call, with a single skew-corrected retry when the
    /// server rejects the proof timestamp.
    async fn run_refresh(&self, refresh_token: &str) -> Result<OAuthTokenResponse> {
        match self.tokens.refresh(refresh_token).await {
            Ok(response) => Ok(response),
            Err(AuthError::ProofTimeInvalid { server_date }) => {
                if let Some(date) = server_date {
                    self.proofs.skew().record_server_date(&date).await?;
                }
                self.tokens.refresh(refresh_token).await
            }
            Err(e) => Err(e),
        }
    }

    /// Transport-level failures keep the session: the caller can retry
    /// later with the same refresh token. A definitive rejection from the
    /// token endpoint means the refresh token is dead, so the stored
    /// credentials are useless and the session ends.
    async fn handle_refresh_failure(&self, error: AuthError) -> AuthError {
        let fatal = matches!(&error, AuthError::TokenEndpoint { .. })
            || matches!(&error, AuthError::AuthRejected(status) if status.is_client_error());
        if fatal {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %error, "refresh rejected, terminating session");
            self.force_logout(LogoutReason::RefreshFailed).await
        } else {
            // Network failures, 5xx, a clock still out of range, storage
            // hiccups: none of these prove the refresh token is dead.
            *self.state.write().await = AuthState::Authenticated;
            error
        }
    }

    /// Clear every credential and latch the logged-out state. Storage
    /// failures during the wipe are swallowed: the session is over either
    /// way and the caller needs the logout error, not an IO error.
    async fn force_logout(&self, reason: LogoutReason) -> AuthError {
        let mut state = self.state.write().await;
        if let Err(_e) = self.credentials.clear_all().await {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_e, "failed to clear credentials during forced logout");
        }
        *state = AuthState::LoggedOut(reason);
        AuthError::AuthenticationRequired(reason)
    }

    fn is_stale(&self, credential: &Credential) -> bool {
        // Tokens without a reported lifetime are used until a 401 proves
        // otherwise. expires_at is on the corrected clock, so compare
        // against it too.
        credential
            .expires_at
            .is_some_and(|at| at <= self.proofs.skew().now_unix() + EXPIRY_LEEWAY_SECONDS)
    }
}

/// 401 means the token was rejected; some endpoints use 403 for the same
/// condition.
fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
