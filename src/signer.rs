use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::traits::PublicKeyParts;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Public half of the signing key in RFC 7517 form.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Holds the process signing key, loaded once at startup from a PEM file.
/// RSA keys sign RS256, P-256 keys sign ES256. No rotation, no hot reload.
pub struct Signer {
    kid: String,
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: Jwk,
}

impl Signer {
    pub fn from_pem_file(path: &str, kid: &str) -> AppResult<Self> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| AppError::Message(format!("cannot read signing key {path}: {e}")))?;
        Self::from_pem(&pem, kid)
    }

    pub fn from_pem(pem: &str, kid: &str) -> AppResult<Self> {
        if let Some(signer) = Self::try_rsa(pem, kid)? {
            return Ok(signer);
        }
        if let Some(signer) = Self::try_ec(pem, kid)? {
            return Ok(signer);
        }
        Err(AppError::Message(
            "signing key is neither an RSA nor a P-256 private key".into(),
        ))
    }

    fn try_rsa(pem: &str, kid: &str) -> AppResult<Option<Self>> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;

        let private = rsa::RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| rsa::RsaPrivateKey::from_pkcs8_pem(pem));
        let Ok(private) = private else {
            return Ok(None);
        };
        let public = private.to_public_key();
        let n = URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AppError::Message(format!("invalid RSA signing key: {e}")))?;
        let decoding = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| AppError::Message(format!("invalid RSA public components: {e}")))?;
        Ok(Some(Self {
            kid: kid.to_string(),
            algorithm: Algorithm::RS256,
            encoding,
            decoding,
            jwk: Jwk {
                kty: "RSA".into(),
                kid: kid.to_string(),
                use_: "sig".into(),
                alg: "RS256".into(),
                n: Some(n),
                e: Some(e),
                crv: None,
                x: None,
                y: None,
            },
        }))
    }

    fn try_ec(pem: &str, kid: &str) -> AppResult<Option<Self>> {
        use p256::pkcs8::DecodePrivateKey;

        let secret = p256::SecretKey::from_sec1_pem(pem)
            .or_else(|_| p256::SecretKey::from_pkcs8_pem(pem));
        let Ok(secret) = secret else {
            return Ok(None);
        };
        let point = secret.public_key().to_encoded_point(false);
        let x = URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point"));
        let y = URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point"));
        let encoding = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| AppError::Message(format!("invalid EC signing key: {e}")))?;
        let decoding = DecodingKey::from_ec_components(&x, &y)
            .map_err(|e| AppError::Message(format!("invalid EC public components: {e}")))?;
        Ok(Some(Self {
            kid: kid.to_string(),
            algorithm: Algorithm::ES256,
            encoding,
            decoding,
            jwk: Jwk {
                kty: "EC".into(),
                kid: kid.to_string(),
                use_: "sig".into(),
                alg: "ES256".into(),
                n: None,
                e: None,
                crv: Some("P-256".into()),
                x: Some(x),
                y: Some(y),
            },
        }))
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Signs a claim set into a compact JWS carrying this key's `kid`.
    pub fn sign<C: Serialize>(&self, claims: &C) -> AppResult<String> {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding)
            .map_err(|e| AppError::Message(format!("token signing failed: {e}")))
    }

    pub fn jwks(&self) -> JwksDocument {
        JwksDocument {
            keys: vec![self.jwk.clone()],
        }
    }

    /// Verification key for a given `kid`; unknown ids are `NotFound`.
    pub fn decoding_key_for(&self, kid: &str) -> AppResult<&DecodingKey> {
        if kid == self.kid {
            Ok(&self.decoding)
        } else {
            Err(AppError::NotFound)
        }
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, Validation};
    use rsa::pkcs8::EncodePrivateKey;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct TestClaims {
        sub: String,
        exp: u64,
    }

    fn rsa_pem() -> String {
        let mut rng = rand::thread_rng();
        let key = rsa::RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
        key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .expect("encode pem")
            .to_string()
    }

    #[test]
    fn rsa_sign_and_verify_roundtrip() {
        let signer = Signer::from_pem(&rsa_pem(), "key-1").unwrap();
        assert_eq!(signer.algorithm(), Algorithm::RS256);
        let token = signer
            .sign(&TestClaims {
                sub: "user:abc".into(),
                exp: 4_102_444_800,
            })
            .unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.required_spec_claims.clear();
        let decoded =
            decode::<TestClaims>(&token, signer.decoding_key_for("key-1").unwrap(), &validation)
                .unwrap();
        assert_eq!(decoded.claims.sub, "user:abc");
        assert_eq!(decoded.header.kid.as_deref(), Some("key-1"));
    }

    #[test]
    fn jwks_is_deterministic_and_rsa_shaped() {
        let pem = rsa_pem();
        let signer = Signer::from_pem(&pem, "key-1").unwrap();
        let a = signer.jwks();
        let b = signer.jwks();
        assert_eq!(a.keys, b.keys);
        let jwk = &a.keys[0];
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.use_, "sig");
        assert_eq!(jwk.alg, "RS256");
        assert!(jwk.n.is_some() && jwk.e.is_some());
        assert!(jwk.crv.is_none());
    }

    #[test]
    fn unknown_kid_rejected() {
        let signer = Signer::from_pem(&rsa_pem(), "key-1").unwrap();
        assert!(signer.decoding_key_for("key-2").is_err());
    }

    #[test]
    fn garbage_pem_rejected() {
        assert!(Signer::from_pem("not a key", "key-1").is_err());
    }

    #[test]
    fn ec_keys_sign_es256() {
        use p256::pkcs8::EncodePrivateKey;
        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        let pem = secret
            .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();
        let signer = Signer::from_pem(&pem, "ec-1").unwrap();
        assert_eq!(signer.algorithm(), Algorithm::ES256);
        let jwk = &signer.jwks().keys[0];
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        assert!(jwk.x.is_some() && jwk.y.is_some());
    }
}
