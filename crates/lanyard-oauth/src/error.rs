use http::StatusCode;
use lanyard_common::StoreError;
use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a session was forcibly terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// A token refresh failed with a non-recoverable error.
    RefreshFailed,
    /// The TLS-recovery refresh path also failed.
    SslRecoveryFailed,
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogoutReason::RefreshFailed => f.write_str("refresh-failed"),
            LogoutReason::SslRecoveryFailed => f.write_str("ssl-recovery-failed"),
        }
    }
}

/// Errors emitted by the auth core.
#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    /// Secure storage failed
    #[error("storage error")]
    #[diagnostic(code(lanyard_oauth::storage))]
    Storage(#[from] StoreError),

    /// Proof could not be signed
    #[error("proof signing failed: {0}")]
    #[diagnostic(
        code(lanyard_oauth::proof_signing),
        help("check ES256 key material; the device key may need to be wiped")
    )]
    ProofSigning(String),

    /// Connection-level failure (TLS handshake, peer verification, timeouts)
    #[error("transient network failure")]
    #[diagnostic(code(lanyard_oauth::network))]
    NetworkTransient(#[source] BoxError),

    /// TLS-level failure (handshake, certificate validation)
    #[error("tls failure")]
    #[diagnostic(
        code(lanyard_oauth::tls),
        help("a poisoned pooled connection can cause this; recovery rebuilds the session")
    )]
    TlsFailure(#[source] BoxError),

    /// Resource server rejected the credentials (401/403)
    #[error("request rejected: {0}")]
    #[diagnostic(code(lanyard_oauth::auth_rejected))]
    AuthRejected(StatusCode),

    /// Auth server rejected the proof timestamp
    #[error("proof timestamp rejected by auth server")]
    #[diagnostic(
        code(lanyard_oauth::proof_time),
        help("device clock is outside the server acceptance window")
    )]
    ProofTimeInvalid {
        /// `Date` header from the rejecting response, used for skew correction.
        server_date: Option<SmolStr>,
    },

    /// Server `Date` header could not be parsed
    #[error("unparseable server Date header: {0}")]
    #[diagnostic(
        code(lanyard_oauth::server_date),
        help("expected an RFC 7231 IMF-fixdate, e.g. `Tue, 25 Aug 2026 12:00:00 GMT`")
    )]
    ServerDate(SmolStr),

    /// Token endpoint returned an error body
    #[error("token endpoint rejected the request: {error}")]
    #[diagnostic(
        code(lanyard_oauth::token_endpoint),
        help("see the `error` field for the OAuth error code")
    )]
    TokenEndpoint {
        status: StatusCode,
        error: SmolStr,
        description: Option<SmolStr>,
    },

    /// No credentials available; the caller must log in first
    #[error("not authenticated")]
    #[diagnostic(code(lanyard_oauth::not_authenticated))]
    NotAuthenticated,

    /// Session was cleared; the surrounding app must redirect to login
    #[error("authentication required: {0}")]
    #[diagnostic(
        code(lanyard_oauth::authentication_required),
        help("credentials were cleared; re-run the login flow")
    )]
    AuthenticationRequired(LogoutReason),

    /// HTTP build error
    #[error("http build error")]
    #[diagnostic(code(lanyard_oauth::http_build))]
    HttpBuild(#[from] http::Error),

    /// Header value error
    #[error(transparent)]
    #[diagnostic(code(lanyard_oauth::header))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// JSON error
    #[error(transparent)]
    #[diagnostic(code(lanyard_oauth::serde))]
    Serde(#[from] serde_json::Error),

    /// Form serialization error
    #[error("form serialization error")]
    #[diagnostic(code(lanyard_oauth::serde_form))]
    Form(#[from] serde_html_form::ser::Error),

    /// URL error
    #[error(transparent)]
    #[diagnostic(code(lanyard_oauth::url))]
    Url(#[from] url::ParseError),
}

pub type Result<T> = core::result::Result<T, AuthError>;
