//! Asymmetric primitives for `KeyVault`.
//!
//! One section per algorithm: generation, sign, verify. Every function is
//! stateless and takes raw key material — unwrapping and zeroization are the
//! engine's job.
//!
//! Verification is deliberately two-valued: a malformed *public key* is an
//! error (the caller passed garbage), while a well-formed signature that does
//! not match returns `Ok(false)`.

use ed25519_dalek::{Signer as _, Verifier as _};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use num_bigint::{BigInt, Sign};
use rand::rngs::OsRng;
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use sha3::Keccak256;
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::CryptoError;

/// Length of a pre-hashed secp256k1 signing digest.
pub const SECP256K1_DIGEST_LEN: usize = 32;

// ── Ed25519 ──────────────────────────────────────────────────────────

/// Generate an Ed25519 keypair. Returns `(seed, public)`.
#[must_use]
pub fn ed25519_generate() -> (Zeroizing<[u8; 32]>, [u8; 32]) {
    let mut seed = Zeroizing::new([0u8; 32]);
    crypto::random_bytes(&mut *seed);
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
    let public = signing.verifying_key().to_bytes();
    (seed, public)
}

/// Sign an arbitrary-length message with an Ed25519 seed.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the seed is not 32 bytes.
pub fn ed25519_sign(seed: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let seed: [u8; 32] = seed.try_into().map_err(|_| CryptoError::InvalidKeyMaterial {
        reason: format!("ed25519 seed must be 32 bytes, got {}", seed.len()),
    })?;
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
    Ok(signing.sign(message).to_bytes().to_vec())
}

/// Verify an Ed25519 signature against a 32-byte public key.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the public key is malformed.
pub fn ed25519_verify(public: &[u8], message: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
    let public: [u8; 32] = public
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyMaterial {
            reason: format!("ed25519 public key must be 32 bytes, got {}", public.len()),
        })?;
    let verifying = ed25519_dalek::VerifyingKey::from_bytes(&public).map_err(|e| {
        CryptoError::InvalidKeyMaterial {
            reason: format!("ed25519 public key: {e}"),
        }
    })?;
    let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
        return Ok(false);
    };
    Ok(verifying.verify(message, &signature).is_ok())
}

// ── Ed25519-NKey ─────────────────────────────────────────────────────

/// Generate an NKey user keypair. Returns `(raw seed, public key string)`.
///
/// The public key uses the NATS NKey text encoding (`U...`).
///
/// # Errors
///
/// Returns [`CryptoError::KeyGeneration`] if the keypair cannot be built.
pub fn nkey_generate() -> Result<(Zeroizing<[u8; 32]>, String), CryptoError> {
    let mut seed = Zeroizing::new([0u8; 32]);
    crypto::random_bytes(&mut *seed);
    let pair = nkey_pair(&seed)?;
    let public = pair.public_key();
    Ok((seed, public))
}

/// Sign a message with an NKey seed.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] or [`CryptoError::Signing`].
pub fn nkey_sign(seed: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let seed: [u8; 32] = seed.try_into().map_err(|_| CryptoError::InvalidKeyMaterial {
        reason: format!("nkey seed must be 32 bytes, got {}", seed.len()),
    })?;
    let pair = nkey_pair(&seed)?;
    pair.sign(message).map_err(|e| CryptoError::Signing {
        reason: e.to_string(),
    })
}

/// Verify an NKey signature against a text-encoded public key (`U...`).
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the public key does not
/// decode.
pub fn nkey_verify(public: &str, message: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
    let pair =
        nkeys::KeyPair::from_public_key(public).map_err(|e| CryptoError::InvalidKeyMaterial {
            reason: format!("nkey public key: {e}"),
        })?;
    Ok(pair.verify(message, signature).is_ok())
}

/// The NKey text encoding of a raw seed (`SU...`), for one-shot ephemeral output.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the seed is not 32 bytes.
pub fn nkey_seed_string(seed: &[u8]) -> Result<String, CryptoError> {
    let seed: [u8; 32] = seed.try_into().map_err(|_| CryptoError::InvalidKeyMaterial {
        reason: format!("nkey seed must be 32 bytes, got {}", seed.len()),
    })?;
    let pair = nkey_pair(&seed)?;
    pair.seed().map_err(|e| CryptoError::InvalidKeyMaterial {
        reason: e.to_string(),
    })
}

fn nkey_pair(seed: &[u8; 32]) -> Result<nkeys::KeyPair, CryptoError> {
    nkeys::KeyPair::new_from_raw(nkeys::KeyPairType::User, *seed).map_err(|e| {
        CryptoError::KeyGeneration {
            reason: format!("nkey: {e}"),
        }
    })
}

// ── C25519 ───────────────────────────────────────────────────────────

/// Generate a Curve25519 keypair. Returns `(private scalar, Montgomery public)`.
///
/// The public key is the X25519 form usable for key agreement. Signing reuses
/// the private scalar as an Ed25519 seed.
#[must_use]
pub fn c25519_generate() -> (Zeroizing<[u8; 32]>, [u8; 32]) {
    let mut private = Zeroizing::new([0u8; 32]);
    crypto::random_bytes(&mut *private);
    let secret = x25519_dalek::StaticSecret::from(*private);
    let public = x25519_dalek::PublicKey::from(&secret);
    (private, public.to_bytes())
}

/// Sign with a C25519 private scalar (via the Ed25519 construction).
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the scalar is not 32 bytes.
pub fn c25519_sign(private: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    ed25519_sign(private, message)
}

/// Verify a C25519 signature using the private scalar.
///
/// The stored public key is the Montgomery form, which cannot verify an
/// Ed25519 signature directly; verification re-derives the Edwards keypair
/// from the scalar.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the scalar is not 32 bytes.
pub fn c25519_verify_with_private(
    private: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let seed: [u8; 32] = private
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyMaterial {
            reason: format!("c25519 private key must be 32 bytes, got {}", private.len()),
        })?;
    let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
    let public = signing.verifying_key().to_bytes();
    ed25519_verify(&public, message, signature)
}

// ── secp256k1 ────────────────────────────────────────────────────────

/// Generate a secp256k1 keypair. Returns `(private scalar, uncompressed SEC1 public)`.
#[must_use]
pub fn secp256k1_generate() -> (Zeroizing<[u8; 32]>, Vec<u8>) {
    let signing = k256::ecdsa::SigningKey::random(&mut OsRng);
    let mut private = Zeroizing::new([0u8; 32]);
    private.copy_from_slice(&signing.to_bytes());
    let public = signing
        .verifying_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    (private, public)
}

/// Sign a pre-hashed 32-byte digest with a secp256k1 private scalar.
///
/// Returns a fixed-size 64-byte `r || s` signature.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] for a malformed scalar or
/// [`CryptoError::Signing`] if the digest is rejected.
pub fn secp256k1_sign(private: &[u8], digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let signing = k256::ecdsa::SigningKey::from_slice(private).map_err(|e| {
        CryptoError::InvalidKeyMaterial {
            reason: format!("secp256k1 private key: {e}"),
        }
    })?;
    let signature: k256::ecdsa::Signature =
        signing
            .sign_prehash(digest)
            .map_err(|e| CryptoError::Signing {
                reason: e.to_string(),
            })?;
    Ok(signature.to_bytes().to_vec())
}

/// Verify a secp256k1 signature against a SEC1 public key (compressed or
/// uncompressed) and a pre-hashed 32-byte digest.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the public key is malformed.
pub fn secp256k1_verify(
    public: &[u8],
    digest: &[u8; 32],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let verifying = k256::ecdsa::VerifyingKey::from_sec1_bytes(public).map_err(|e| {
        CryptoError::InvalidKeyMaterial {
            reason: format!("secp256k1 public key: {e}"),
        }
    })?;
    let Ok(signature) = k256::ecdsa::Signature::from_slice(signature) else {
        return Ok(false);
    };
    Ok(verifying.verify_prehash(digest, &signature).is_ok())
}

/// EVM address for an uncompressed SEC1 public key:
/// `keccak256(public[1..])[12..]`, `0x`-prefixed lowercase hex.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the key is not a 65-byte
/// uncompressed point.
pub fn evm_address(uncompressed_public: &[u8]) -> Result<String, CryptoError> {
    if uncompressed_public.len() != 65 || uncompressed_public[0] != 0x04 {
        return Err(CryptoError::InvalidKeyMaterial {
            reason: "EVM address requires a 65-byte uncompressed public key".to_owned(),
        });
    }
    let digest = Keccak256::digest(&uncompressed_public[1..]);
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}

// ── BabyJubJub ───────────────────────────────────────────────────────

/// Generate a BabyJubJub keypair. Returns `(private scalar, compressed public)`.
///
/// # Errors
///
/// Returns [`CryptoError::KeyGeneration`] if the scalar is rejected.
pub fn babyjubjub_generate() -> Result<(Zeroizing<[u8; 32]>, [u8; 32]), CryptoError> {
    let mut private = Zeroizing::new([0u8; 32]);
    crypto::random_bytes(&mut *private);
    let secret = babyjubjub_rs::PrivateKey::import(private.to_vec()).map_err(|e| {
        CryptoError::KeyGeneration {
            reason: format!("babyjubjub: {e}"),
        }
    })?;
    let public = secret.public().compress();
    Ok((private, public))
}

/// Sign an arbitrary-length message with a BabyJubJub private scalar.
///
/// Returns the compressed 64-byte EdDSA signature.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] or [`CryptoError::Signing`].
pub fn babyjubjub_sign(private: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let secret = babyjubjub_rs::PrivateKey::import(private.to_vec()).map_err(|e| {
        CryptoError::InvalidKeyMaterial {
            reason: format!("babyjubjub private key: {e}"),
        }
    })?;
    let signature = secret
        .sign(field_embed(message))
        .map_err(|e| CryptoError::Signing { reason: e })?;
    Ok(signature.compress().to_vec())
}

/// Verify a BabyJubJub signature against a compressed 32-byte public key.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the public key does not
/// decompress.
pub fn babyjubjub_verify(
    public: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let public: [u8; 32] = public
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyMaterial {
            reason: format!(
                "babyjubjub public key must be 32 bytes, got {}",
                public.len()
            ),
        })?;
    let point =
        babyjubjub_rs::decompress_point(public).map_err(|e| CryptoError::InvalidKeyMaterial {
            reason: format!("babyjubjub public key: {e}"),
        })?;
    let signature: [u8; 64] = match signature.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return Ok(false),
    };
    let Ok(signature) = babyjubjub_rs::decompress_signature(&signature) else {
        return Ok(false);
    };
    Ok(babyjubjub_rs::verify(point, signature, field_embed(message)))
}

/// Embed an arbitrary message into the BabyJubJub scalar field: SHA-256,
/// truncated to 248 bits so the value is always below the field modulus.
fn field_embed(message: &[u8]) -> BigInt {
    let digest = Sha256::digest(message);
    BigInt::from_bytes_be(Sign::Plus, &digest[..31])
}

// ── RSA ──────────────────────────────────────────────────────────────

/// RSA signature algorithms: PKCS#1 v1.5 (`RS*`) and PSS (`PS*`) with the
/// matching SHA-2 hash. PSS salt length equals the hash length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaAlgorithm {
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
}

impl RsaAlgorithm {
    /// Parse an algorithm tag (`RS256` ... `PS512`), case-insensitively.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_uppercase().as_str() {
            "RS256" => Some(Self::Rs256),
            "RS384" => Some(Self::Rs384),
            "RS512" => Some(Self::Rs512),
            "PS256" => Some(Self::Ps256),
            "PS384" => Some(Self::Ps384),
            "PS512" => Some(Self::Ps512),
            _ => None,
        }
    }

    fn digest(self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Rs256 | Self::Ps256 => Sha256::digest(message).to_vec(),
            Self::Rs384 | Self::Ps384 => Sha384::digest(message).to_vec(),
            Self::Rs512 | Self::Ps512 => Sha512::digest(message).to_vec(),
        }
    }
}

/// Generate an RSA keypair of the given modulus size.
///
/// Returns `(PKCS#8 DER private key, SPKI PEM public key)`.
///
/// # Errors
///
/// Returns [`CryptoError::KeyGeneration`] on prime generation or encoding
/// failure.
pub fn rsa_generate(bits: usize) -> Result<(Zeroizing<Vec<u8>>, String), CryptoError> {
    let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| CryptoError::KeyGeneration {
        reason: format!("rsa: {e}"),
    })?;
    let der = private
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyGeneration {
            reason: format!("rsa pkcs8 encoding: {e}"),
        })?;
    let pem = private
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration {
            reason: format!("rsa public key encoding: {e}"),
        })?;
    Ok((Zeroizing::new(der.as_bytes().to_vec()), pem))
}

/// Sign a message with an RSA private key (PKCS#8 DER). The hash named by
/// the algorithm is applied here.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] or [`CryptoError::Signing`].
pub fn rsa_sign(
    private_der: &[u8],
    algorithm: RsaAlgorithm,
    message: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let private =
        RsaPrivateKey::from_pkcs8_der(private_der).map_err(|e| CryptoError::InvalidKeyMaterial {
            reason: format!("rsa private key: {e}"),
        })?;
    let digest = algorithm.digest(message);

    let result = match algorithm {
        RsaAlgorithm::Rs256 => private.sign(Pkcs1v15Sign::new::<Sha256>(), &digest),
        RsaAlgorithm::Rs384 => private.sign(Pkcs1v15Sign::new::<Sha384>(), &digest),
        RsaAlgorithm::Rs512 => private.sign(Pkcs1v15Sign::new::<Sha512>(), &digest),
        RsaAlgorithm::Ps256 => {
            private.sign_with_rng(&mut OsRng, rsa::pss::Pss::new_with_salt::<Sha256>(32), &digest)
        }
        RsaAlgorithm::Ps384 => {
            private.sign_with_rng(&mut OsRng, rsa::pss::Pss::new_with_salt::<Sha384>(48), &digest)
        }
        RsaAlgorithm::Ps512 => {
            private.sign_with_rng(&mut OsRng, rsa::pss::Pss::new_with_salt::<Sha512>(64), &digest)
        }
    };

    result.map_err(|e| CryptoError::Signing {
        reason: e.to_string(),
    })
}

/// Verify an RSA signature against an SPKI PEM public key.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the public key does not
/// parse.
pub fn rsa_verify(
    public_pem: &str,
    algorithm: RsaAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let public =
        RsaPublicKey::from_public_key_pem(public_pem).map_err(|e| {
            CryptoError::InvalidKeyMaterial {
                reason: format!("rsa public key: {e}"),
            }
        })?;
    let digest = algorithm.digest(message);

    let result = match algorithm {
        RsaAlgorithm::Rs256 => public.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature),
        RsaAlgorithm::Rs384 => public.verify(Pkcs1v15Sign::new::<Sha384>(), &digest, signature),
        RsaAlgorithm::Rs512 => public.verify(Pkcs1v15Sign::new::<Sha512>(), &digest, signature),
        RsaAlgorithm::Ps256 => {
            public.verify(rsa::pss::Pss::new_with_salt::<Sha256>(32), &digest, signature)
        }
        RsaAlgorithm::Ps384 => {
            public.verify(rsa::pss::Pss::new_with_salt::<Sha384>(48), &digest, signature)
        }
        RsaAlgorithm::Ps512 => {
            public.verify(rsa::pss::Pss::new_with_salt::<Sha512>(64), &digest, signature)
        }
    };

    Ok(result.is_ok())
}
