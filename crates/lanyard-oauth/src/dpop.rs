//! DPoP proof generation (RFC 9449-style).
//!
//! Every outbound request gets a fresh single-use proof bound to its method
//! and URL, and to the access token when one is attached. Proofs are never
//! stored or reused.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use lanyard_common::SecureStore;
use p256::ecdsa::SigningKey;
use sha2::Digest;
use smol_str::{SmolStr, ToSmolStr};

use crate::{
    error::{AuthError, Result},
    jose::{
        create_signed_jwt,
        jws::{EcJwk, Header},
        jwt::{Claims, ProofClaims, RegisteredClaims},
    },
    keys::KeyManager,
    skew::ClockSkew,
};

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";

/// Bundles the device key and clock correction behind the one operation the
/// rest of the crate needs: make a proof for this request.
pub struct ProofGenerator<S> {
    keys: KeyManager<S>,
    skew: ClockSkew<S>,
}

impl<S: SecureStore> ProofGenerator<S> {
    pub fn new(keys: KeyManager<S>, skew: ClockSkew<S>) -> Self {
        Self { keys, skew }
    }

    pub fn skew(&self) -> &ClockSkew<S> {
        &self.skew
    }

    pub fn keys(&self) -> &KeyManager<S> {
        &self.keys
    }

    /// Generate a proof bound to `method` + `url` (+ the access token's
    /// hash, when supplied), with a skew-corrected `iat`.
    pub async fn generate(
        &self,
        method: &str,
        url: &str,
        access_token: Option<&str>,
    ) -> Result<String> {
        let key = self.keys.get_or_create().await?;
        build_proof(&key, method, url, self.skew.now_unix(), access_token)
    }
}

/// Build and sign a single proof. Pure apart from `jti` randomness.
pub fn build_proof(
    key: &SigningKey,
    method: &str,
    url: &str,
    iat: i64,
    access_token: Option<&str>,
) -> Result<String> {
    let header = Header {
        alg: SmolStr::new_static("ES256"),
        typ: Some(SmolStr::new_static(JWT_HEADER_TYP_DPOP)),
        jwk: Some(public_jwk(key)),
    };
    let claims = Claims {
        registered: RegisteredClaims {
            iat: Some(iat),
            jti: Some(generate_jti()),
        },
        proof: ProofClaims {
            htm: Some(method.to_smolstr()),
            htu: Some(strip_query(url)?),
            ath: access_token.map(access_token_hash),
        },
    };
    create_signed_jwt(key, &header, &claims)
}

/// Embedded public JWK with exactly 32 bytes per coordinate.
///
/// The uncompressed SEC1 point gives fixed-width big-endian coordinates, so
/// the x/y fields cannot pick up a sign byte or lose leading zeros the way
/// bigint round-trips do.
fn public_jwk(key: &SigningKey) -> EcJwk {
    let point = key.verifying_key().to_encoded_point(false);
    let x = point.x().expect("uncompressed point has x");
    let y = point.y().expect("uncompressed point has y");
    EcJwk {
        kty: SmolStr::new_static("EC"),
        crv: SmolStr::new_static("P-256"),
        x: URL_SAFE_NO_PAD.encode(x).into(),
        y: URL_SAFE_NO_PAD.encode(y).into(),
    }
}

/// `htu` is the URL without query string or fragment.
fn strip_query(url: &str) -> Result<SmolStr> {
    let mut url = url::Url::parse(url)?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_smolstr())
}

/// `ath = b64url(sha256(access_token))`.
fn access_token_hash(token: &str) -> SmolStr {
    URL_SAFE_NO_PAD
        .encode(sha2::Sha256::digest(token.as_bytes()))
        .into()
}

/// Fresh random `jti` per proof; server-side replay detection keys on it.
#[inline]
pub(crate) fn generate_jti() -> SmolStr {
    uuid::Uuid::new_v4().to_smolstr()
}

/// Extract a claim set back out of a compact proof. Test/diagnostic helper;
/// does not verify the signature.
pub fn decode_claims(proof: &str) -> Result<(Header, Claims)> {
    let mut parts = proof.split('.');
    let (Some(header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::ProofSigning("not a compact JWS".into()));
    };
    let header = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::ProofSigning(format!("bad header encoding: {e}")))?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::ProofSigning(format!("bad payload encoding: {e}")))?;
    Ok((
        serde_json::from_slice(&header)?,
        serde_json::from_slice(&payload)?,
    ))
}
