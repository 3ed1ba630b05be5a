//! Wire types for the token endpoint.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenGrantType {
    AuthorizationCode,
    RefreshToken,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenRequestParameters<'a> {
    // https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.3
    pub grant_type: TokenGrantType,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    // https://datatracker.ietf.org/doc/html/rfc7636#section-4.5
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<&'a str>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshRequestParameters<'a> {
    // https://datatracker.ietf.org/doc/html/rfc6749#section-6
    pub grant_type: TokenGrantType,
    pub refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<&'a str>,
}

// https://datatracker.ietf.org/doc/html/rfc8628#section-3.4
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeviceTokenParameters<'a> {
    pub grant_type: TokenGrantType,
    pub device_code: &'a str,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthTokenType {
    #[serde(alias = "dpop")]
    DPoP,
    #[serde(alias = "bearer")]
    Bearer,
}

impl OAuthTokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthTokenType::DPoP => "DPoP",
            OAuthTokenType::Bearer => "Bearer",
        }
    }
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.1
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: SmolStr,
    pub token_type: OAuthTokenType,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<SmolStr>,
    pub scope: Option<SmolStr>,
}

// https://datatracker.ietf.org/doc/html/rfc8628#section-3.2
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorizationResponse {
    pub device_code: SmolStr,
    pub user_code: SmolStr,
    pub verification_uri: SmolStr,
    pub verification_uri_complete: Option<SmolStr>,
    pub expires_in: i64,
    pub interval: Option<u64>,
}

// https://datatracker.ietf.org/doc/html/rfc6749#section-5.2
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenErrorResponse {
    pub error: SmolStr,
    pub error_description: Option<SmolStr>,
}
