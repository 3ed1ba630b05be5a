use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::ecdsa::{Signature, SigningKey, signature::Signer};

use super::{jws::Header, jwt::Claims};
use crate::error::{AuthError, Result};

/// Build a compact JWS (ES256): `b64url(header).b64url(claims).b64url(sig)`.
///
/// The signature is emitted in the raw 64-byte R‖S form JOSE requires,
/// converted from the DER encoding the signing primitive produces.
pub fn create_signed_jwt(key: &SigningKey, header: &Header, claims: &Claims) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_string(header)?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(claims)?);
    let signature: Signature = key.sign(format!("{header}.{payload}").as_bytes());
    let raw = der_to_jose(signature.to_der().as_bytes())?;
    Ok(format!("{header}.{payload}.{}", URL_SAFE_NO_PAD.encode(raw)))
}

/// Convert a DER-encoded ECDSA P-256 signature to the 64-byte R‖S form.
///
/// DER wraps R and S as signed ASN.1 INTEGERs: a component whose high bit is
/// set gains a leading zero byte, and small components shrink below 32
/// bytes. JOSE wants each component as exactly 32 unsigned big-endian bytes.
pub fn der_to_jose(der: &[u8]) -> Result<[u8; 64]> {
    fn malformed() -> AuthError {
        AuthError::ProofSigning("malformed DER signature".into())
    }

    let mut pos = 0usize;
    let byte = |i: usize| der.get(i).copied().ok_or_else(malformed);

    if byte(pos)? != 0x30 {
        return Err(malformed());
    }
    pos += 1;
    // Sequence length: P-256 signatures fit in one byte, but a long-form
    // 0x81 prefix is still valid DER.
    let mut seq_len = byte(pos)? as usize;
    pos += 1;
    if seq_len == 0x81 {
        seq_len = byte(pos)? as usize;
        pos += 1;
    } else if seq_len > 0x7f {
        return Err(malformed());
    }
    if pos + seq_len != der.len() {
        return Err(malformed());
    }

    let mut out = [0u8; 64];
    for half in 0..2 {
        if byte(pos)? != 0x02 {
            return Err(malformed());
        }
        pos += 1;
        let len = byte(pos)? as usize;
        pos += 1;
        let end = pos.checked_add(len).filter(|e| *e <= der.len()).ok_or_else(malformed)?;
        let mut int = &der[pos..end];
        pos = end;
        // Strip the sign-extension zero, if any.
        while int.len() > 32 {
            if int[0] != 0 {
                return Err(malformed());
            }
            int = &int[1..];
        }
        // Left-pad short components back to 32 bytes.
        let dest = &mut out[half * 32..(half + 1) * 32];
        dest[32 - int.len()..].copy_from_slice(int);
    }
    if pos != der.len() {
        return Err(malformed());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;

    // Minimal signed-integer DER encoding, as a real encoder would emit.
    fn der_int(bytes: &[u8]) -> Vec<u8> {
        let mut v: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
        if v.is_empty() {
            v.push(0);
        }
        if v[0] & 0x80 != 0 {
            v.insert(0, 0);
        }
        let mut out = vec![0x02, v.len() as u8];
        out.extend_from_slice(&v);
        out
    }

    fn der_sig(r: &[u8; 32], s: &[u8; 32]) -> Vec<u8> {
        let body = [der_int(r), der_int(s)].concat();
        let mut out = vec![0x30, body.len() as u8];
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn plain_components_roundtrip() {
        let r = [0x7fu8; 32];
        let s = {
            let mut s = [0u8; 32];
            s[31] = 0x01;
            s[0] = 0x10;
            s
        };
        let raw = der_to_jose(&der_sig(&r, &s)).unwrap();
        assert_eq!(&raw[..32], &r);
        assert_eq!(&raw[32..], &s);
    }

    #[test]
    fn high_bit_component_keeps_32_bytes() {
        // R starts with 0x80: DER stores 33 bytes with a leading zero.
        let mut r = [0x11u8; 32];
        r[0] = 0x80;
        let s = [0x42u8; 32];
        let der = der_sig(&r, &s);
        // sanity: the encoded R really is 33 bytes long
        assert_eq!(der[3], 33);
        let raw = der_to_jose(&der).unwrap();
        assert_eq!(&raw[..32], &r);
        assert_eq!(&raw[32..], &s);
    }

    #[test]
    fn short_component_left_pads() {
        // S with 30 leading zero bytes encodes as a 2-byte DER integer.
        let r = [0x33u8; 32];
        let mut s = [0u8; 32];
        s[30] = 0x01;
        s[31] = 0xff;
        let raw = der_to_jose(&der_sig(&r, &s)).unwrap();
        assert_eq!(&raw[..32], &r);
        assert_eq!(&raw[32..], &s);
    }

    #[test]
    fn rejects_truncated_and_garbage_input() {
        assert!(der_to_jose(&[]).is_err());
        assert!(der_to_jose(&[0x30, 0x06, 0x02, 0x01, 0x01]).is_err());
        assert!(der_to_jose(&[0x31, 0x00]).is_err());
    }

    #[test]
    fn matches_p256_raw_encoding() {
        let key = SigningKey::random(&mut rand::thread_rng());
        for msg in [&b"lanyard"[..], b"", b"a slightly longer message body"] {
            let sig: Signature = key.sign(msg);
            let raw = der_to_jose(sig.to_der().as_bytes()).unwrap();
            assert_eq!(raw.as_slice(), sig.to_bytes().as_slice());
        }
    }

    #[test]
    fn signed_jwt_verifies() {
        use crate::jose::jwt::RegisteredClaims;

        let key = SigningKey::random(&mut rand::thread_rng());
        let mut header = Header::es256();
        header.typ = Some("dpop+jwt".into());
        let claims = Claims {
            registered: RegisteredClaims {
                iat: Some(1_700_000_000),
                jti: Some("test".into()),
            },
            proof: Default::default(),
        };
        let jwt = create_signed_jwt(&key, &header, &claims).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);

        let sig_bytes = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        assert_eq!(sig_bytes.len(), 64);
        let sig = Signature::from_slice(&sig_bytes).unwrap();
        let msg = format!("{}.{}", parts[0], parts[1]);
        key.verifying_key().verify(msg.as_bytes(), &sig).unwrap();
    }
}
