//! DPoP-bound OAuth core for Lanyard: the device key, proof signing,
//! clock-skew correction, credential storage, and the authenticated
//! request pipeline. Transport lives behind `lanyard_common::HttpClient`.

pub mod credentials;
pub mod dpop;
pub mod error;
pub mod jose;
pub mod keys;
pub mod pipeline;
pub mod skew;
pub mod token;
pub mod types;

pub use credentials::{Credential, CredentialStore};
pub use dpop::ProofGenerator;
pub use error::{AuthError, LogoutReason, Result};
pub use keys::KeyManager;
pub use pipeline::{AuthPipeline, AuthState, PipelineConfig};
pub use skew::ClockSkew;
pub use token::{DevicePoll, TokenClient, TokenEndpoints};
