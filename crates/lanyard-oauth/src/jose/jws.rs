use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Embedded EC public key, the only JWK form a DPoP proof carries.
///
/// `x` and `y` are base64url encodings of the 32-byte big-endian curve
/// coordinates, no padding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub kty: SmolStr,
    pub crv: SmolStr,
    pub x: SmolStr,
    pub y: SmolStr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: SmolStr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<EcJwk>,
}

impl Header {
    pub fn es256() -> Self {
        Self {
            alg: SmolStr::new_static("ES256"),
            typ: None,
            jwk: None,
        }
    }
}
