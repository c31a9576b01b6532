//! End-to-end lifecycle scenarios against the in-memory store: seal cycles,
//! deterministic HD wallets, autosign, detached verification, and the
//! symmetric round-trips.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use keyvault_core::{
    CreateKeyRequest, CreateVaultRequest, HdWalletOptions, KeyEngine, KeyFilter, SealManager,
    SignatureOptions, EngineError, SealError,
};
use keyvault_store::{MemoryStore, VaultStore};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

const SCOPE: &str = "org-e2e";

/// Deterministic wallet phrase shared with the original integration suite.
const SEED_PHRASE: &str = "traffic charge swing glimpse will citizen push mutual embrace volcano siege identify gossip battle casual exit enrich unlock muscle vast female initial please day";

/// Low iteration count keeps the suite fast; production uses the default.
const TEST_ITERATIONS: u32 = 64;

struct Harness {
    engine: KeyEngine,
    phrase: Zeroizing<String>,
}

async fn unsealed_harness() -> Harness {
    let store: Arc<dyn VaultStore> = Arc::new(MemoryStore::new());
    let seal = Arc::new(SealManager::with_iterations(Arc::clone(&store), TEST_ITERATIONS));
    let generated = seal.generate_seal().await.unwrap();
    let phrase = generated.phrase;
    seal.unseal(&phrase).await.unwrap();
    Harness {
        engine: KeyEngine::new(store, seal),
        phrase,
    }
}

async fn make_vault(engine: &KeyEngine, name: &str) -> uuid::Uuid {
    engine
        .create_vault(
            SCOPE,
            CreateVaultRequest {
                name: name.to_owned(),
                description: "lifecycle test vault".to_owned(),
            },
        )
        .await
        .unwrap()
        .id
}

fn key_request(kind: &str, usage: &str, spec: &str, name: &str) -> CreateKeyRequest {
    CreateKeyRequest {
        kind: kind.to_owned(),
        usage: usage.to_owned(),
        spec: spec.to_owned(),
        name: name.to_owned(),
        description: "lifecycle test key".to_owned(),
        mnemonic: None,
        ephemeral: false,
    }
}

fn seeded_bip39_request(name: &str) -> CreateKeyRequest {
    CreateKeyRequest {
        mnemonic: Some(SEED_PHRASE.to_owned()),
        ..key_request("asymmetric", "sign/verify", "bip39", name)
    }
}

fn random_digest_hex() -> String {
    let mut digest = [0u8; 32];
    keyvault_core::crypto::random_bytes(&mut digest);
    hex::encode(digest)
}

fn hd_index_opts(index: u32) -> SignatureOptions {
    SignatureOptions {
        algorithm: None,
        hdwallet: Some(HdWalletOptions {
            hd_derivation_path: None,
            coin: None,
            coin_abbr: Some("ETH".to_owned()),
            index: Some(index),
        }),
    }
}

// ── Scenario 1: seal generation ──────────────────────────────────────

#[tokio::test]
async fn generate_seal_returns_phrase_and_double_sha512_hash() {
    let store: Arc<dyn VaultStore> = Arc::new(MemoryStore::new());
    let seal = SealManager::with_iterations(store, TEST_ITERATIONS);

    let generated = seal.generate_seal().await.unwrap();
    assert_eq!(generated.phrase.split_whitespace().count(), 24);

    let expected = hex::encode(Sha512::digest(Sha512::digest(generated.phrase.as_bytes())));
    assert_eq!(generated.validation_hash, expected);

    let err = seal.generate_seal().await.unwrap_err();
    assert!(matches!(err, SealError::AlreadyInitialized));
}

// ── Scenario 2: seal / unseal cycle ──────────────────────────────────

#[tokio::test]
async fn seal_cycle_gates_operations() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let seal = engine.seal_manager();

    // Unseal is idempotent.
    seal.unseal(&harness.phrase).await.unwrap();

    // Operations work while unsealed.
    make_vault(engine, "vaulty vault").await;

    // Sealing with a bad phrase fails and the vault keeps working.
    let err = seal.seal("wrong phrase").await.unwrap_err();
    assert!(matches!(err, SealError::Unauthorized));
    make_vault(engine, "vaulty vault").await;

    // Sealing with the right phrase blocks everything.
    seal.seal(&harness.phrase).await.unwrap();
    let err = engine
        .create_vault(
            SCOPE,
            CreateVaultRequest {
                name: "sealed vault".to_owned(),
                description: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Sealed));

    // Unsealing with a bad phrase keeps it sealed.
    let err = seal.unseal("wrong phrase").await.unwrap_err();
    assert!(matches!(err, SealError::Unauthorized));
    assert!(seal.is_sealed().await);

    // A correct unseal restores service.
    seal.unseal(&harness.phrase).await.unwrap();
    make_vault(engine, "vaulty vault").await;
}

// ── Scenario 3: deterministic BIP39 across vaults ────────────────────

#[tokio::test]
async fn seeded_wallets_are_deterministic_across_vaults() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;

    let vault_a = make_vault(engine, "vault a").await;
    let vault_b = make_vault(engine, "vault b").await;

    let key_a = engine
        .create_key(SCOPE, vault_a, seeded_bip39_request("hdwallet"))
        .await
        .unwrap();
    let key_b = engine
        .create_key(SCOPE, vault_b, seeded_bip39_request("hdwallet"))
        .await
        .unwrap();

    // Same seed, same xpub — regardless of which vault wraps the secret.
    assert_eq!(key_a.key.public_key, key_b.key.public_key);

    // Ledger-style account path: identical signature and address.
    let opts = SignatureOptions {
        algorithm: None,
        hdwallet: Some(HdWalletOptions {
            hd_derivation_path: Some("m/44'/60'/2'/0/0".to_owned()),
            coin: None,
            coin_abbr: None,
            index: None,
        }),
    };
    let message = random_digest_hex();

    let sig_a = engine
        .sign_message(SCOPE, vault_a, key_a.key.id, &message, opts.clone())
        .await
        .unwrap();
    let sig_b = engine
        .sign_message(SCOPE, vault_b, key_b.key.id, &message, opts.clone())
        .await
        .unwrap();

    assert_eq!(sig_a.signature, sig_b.signature);
    assert_eq!(sig_a.address, sig_b.address);
    assert_eq!(sig_a.derivation_path.as_deref(), Some("m/44'/60'/2'/0/0"));
    assert_eq!(sig_b.derivation_path.as_deref(), Some("m/44'/60'/2'/0/0"));

    let verified = engine
        .verify_signature(SCOPE, vault_a, key_a.key.id, &message, &sig_a.signature, opts)
        .await
        .unwrap();
    assert!(verified);
}

// ── Scenario 4: secp256k1 digest length ──────────────────────────────

#[tokio::test]
async fn secp256k1_rejects_33_byte_payload() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key = engine
        .create_key(
            SCOPE,
            vault,
            key_request("asymmetric", "sign/verify", "SECP256K1", "eth key"),
        )
        .await
        .unwrap();

    // Non-HD keys return no address or path on sign.
    let message = random_digest_hex();
    let response = engine
        .sign_message(SCOPE, vault, key.key.id, &message, SignatureOptions::default())
        .await
        .unwrap();
    assert!(response.address.is_none());
    assert!(response.derivation_path.is_none());

    let verified = engine
        .verify_signature(
            SCOPE,
            vault,
            key.key.id,
            &message,
            &response.signature,
            SignatureOptions::default(),
        )
        .await
        .unwrap();
    assert!(verified);

    let mut payload = [0u8; 33];
    keyvault_core::crypto::random_bytes(&mut payload);
    let err = engine
        .sign_message(
            SCOPE,
            vault,
            key.key.id,
            &hex::encode(payload),
            SignatureOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidMessageLength { actual: 33 }));
}

// ── Scenario 5: RSA PS256 + detached verification ────────────────────

#[tokio::test]
async fn rsa_ps256_roundtrip_and_detached_validation() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key = engine
        .create_key(
            SCOPE,
            vault,
            key_request("asymmetric", "sign/verify", "rsa-2048", "rsa key"),
        )
        .await
        .unwrap();
    let public_pem = key.key.public_key.clone().unwrap();

    let opts = SignatureOptions {
        algorithm: Some("PS256".to_owned()),
        hdwallet: None,
    };
    let message = random_digest_hex();

    let response = engine
        .sign_message(SCOPE, vault, key.key.id, &message, opts.clone())
        .await
        .unwrap();

    let verified = engine
        .verify_signature(SCOPE, vault, key.key.id, &message, &response.signature, opts.clone())
        .await
        .unwrap();
    assert!(verified);

    // An altered message is a clean `false`, not an error.
    let altered = random_digest_hex();
    let verified = engine
        .verify_signature(SCOPE, vault, key.key.id, &altered, &response.signature, opts.clone())
        .await
        .unwrap();
    assert!(!verified);

    // Detached verification against the exported public key.
    let verified = engine
        .verify_detached_signature(
            "rsa-2048",
            &message,
            &response.signature,
            &public_pem,
            opts.clone(),
        )
        .await
        .unwrap();
    assert!(verified);

    // Missing spec / message / signature / public key are parameter errors.
    for (spec, message_hex, signature_hex, public) in [
        ("", message.as_str(), response.signature.as_str(), public_pem.as_str()),
        ("rsa-2048", "", response.signature.as_str(), public_pem.as_str()),
        ("rsa-2048", message.as_str(), "", public_pem.as_str()),
        ("rsa-2048", message.as_str(), response.signature.as_str(), ""),
    ] {
        let err = engine
            .verify_detached_signature(spec, message_hex, signature_hex, public, opts.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }

    // RSA without an algorithm is a parameter error.
    let err = engine
        .verify_detached_signature(
            "rsa-2048",
            &message,
            &response.signature,
            &public_pem,
            SignatureOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidParameter { .. }));

    // Unknown spec is a parameter error.
    let err = engine
        .verify_detached_signature(
            "invalid_spec",
            &message,
            &response.signature,
            &public_pem,
            opts.clone(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidParameter { .. }));

    // A mismatched message with well-formed inputs is `false` with no error.
    let verified = engine
        .verify_detached_signature("rsa-2048", &altered, &response.signature, &public_pem, opts)
        .await
        .unwrap();
    assert!(!verified);
}

#[tokio::test]
async fn detached_verification_covers_every_signing_curve() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    for (spec, algorithm) in [
        ("ed25519", None),
        ("ed25519-nkey", None),
        ("babyjubjub", None),
        ("secp256k1", None),
        ("rsa-2048", Some("PS512")),
    ] {
        let key = engine
            .create_key(
                SCOPE,
                vault,
                key_request("asymmetric", "sign/verify", spec, "detached key"),
            )
            .await
            .unwrap();
        let public = key.key.public_key.clone().unwrap();

        let opts = SignatureOptions {
            algorithm: algorithm.map(str::to_owned),
            hdwallet: None,
        };
        let message = random_digest_hex();
        let response = engine
            .sign_message(SCOPE, vault, key.key.id, &message, opts.clone())
            .await
            .unwrap();

        let verified = engine
            .verify_detached_signature(spec, &message, &response.signature, &public, opts)
            .await
            .unwrap();
        assert!(verified, "detached verification failed for {spec}");
    }
}

// ── Scenario 6: symmetric round-trips ────────────────────────────────

#[tokio::test]
async fn aes_roundtrip_with_one_byte_nonce() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key = engine
        .create_key(
            SCOPE,
            vault,
            key_request("symmetric", "encrypt/decrypt", "aes-256-GCM", "aes key"),
        )
        .await
        .unwrap();

    let ciphertext = engine
        .encrypt(SCOPE, vault, key.key.id, "hello", Some("1"))
        .await
        .unwrap();
    let plaintext = engine.decrypt(SCOPE, vault, key.key.id, &ciphertext).await.unwrap();
    assert_eq!(plaintext, "hello");
}

#[tokio::test]
async fn chacha_roundtrip_without_nonce() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key = engine
        .create_key(
            SCOPE,
            vault,
            key_request("symmetric", "encrypt/decrypt", "chaCha20", "chacha key"),
        )
        .await
        .unwrap();

    let data = "a".repeat(128);
    let ciphertext = engine
        .encrypt(SCOPE, vault, key.key.id, &data, None)
        .await
        .unwrap();
    let plaintext = engine.decrypt(SCOPE, vault, key.key.id, &ciphertext).await.unwrap();
    assert_eq!(plaintext, data);
}

// ── Scenario 7: autosign ─────────────────────────────────────────────

#[tokio::test]
async fn autosign_advances_the_derivation_path() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key = engine
        .create_key(
            SCOPE,
            vault,
            key_request("asymmetric", "sign/verify", "bip39", "hdwallet"),
        )
        .await
        .unwrap();
    assert!(key.key.public_key.is_some());

    for index in 0..10u32 {
        let message = random_digest_hex();
        let response = engine
            .sign_message(SCOPE, vault, key.key.id, &message, SignatureOptions::default())
            .await
            .unwrap();

        assert_eq!(
            response.derivation_path.as_deref(),
            Some(format!("m/44'/60'/0'/0/{index}").as_str())
        );
        assert!(response.address.is_some());

        // The explicit-index child verifies what autosign produced.
        let verified = engine
            .verify_signature(
                SCOPE,
                vault,
                key.key.id,
                &message,
                &response.signature,
                hd_index_opts(index),
            )
            .await
            .unwrap();
        assert!(verified, "autosign index {index} did not verify");
    }
}

#[tokio::test]
async fn concurrent_autosigns_get_distinct_indices() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key = engine
        .create_key(
            SCOPE,
            vault,
            key_request("asymmetric", "sign/verify", "bip39", "hdwallet"),
        )
        .await
        .unwrap();

    let message_a = random_digest_hex();
    let message_b = random_digest_hex();
    let (a, b) = tokio::join!(
        engine.sign_message(SCOPE, vault, key.key.id, &message_a, SignatureOptions::default()),
        engine.sign_message(SCOPE, vault, key.key.id, &message_b, SignatureOptions::default()),
    );

    let mut paths = vec![
        a.unwrap().derivation_path.unwrap(),
        b.unwrap().derivation_path.unwrap(),
    ];
    paths.sort();
    assert_eq!(paths, ["m/44'/60'/0'/0/0", "m/44'/60'/0'/0/1"]);
}

#[tokio::test]
async fn seeded_autosign_matches_across_keys() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key_a = engine
        .create_key(SCOPE, vault, seeded_bip39_request("hdwallet"))
        .await
        .unwrap();
    let key_b = engine
        .create_key(SCOPE, vault, seeded_bip39_request("hdwallet"))
        .await
        .unwrap();

    for index in 0..10u32 {
        let message = random_digest_hex();
        let sig_a = engine
            .sign_message(SCOPE, vault, key_a.key.id, &message, SignatureOptions::default())
            .await
            .unwrap();
        let sig_b = engine
            .sign_message(SCOPE, vault, key_b.key.id, &message, SignatureOptions::default())
            .await
            .unwrap();

        // Both keys track their own counter from the same seed, so the
        // signatures stay in lockstep.
        assert_eq!(sig_a.signature, sig_b.signature);

        let verified = engine
            .verify_signature(
                SCOPE,
                vault,
                key_a.key.id,
                &message,
                &sig_a.signature,
                hd_index_opts(index),
            )
            .await
            .unwrap();
        assert!(verified);
    }
}

// ── HD child selection forms ─────────────────────────────────────────

#[tokio::test]
async fn hd_child_selection_by_coin_number_and_abbreviation() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let key = engine
        .create_key(
            SCOPE,
            vault,
            key_request("asymmetric", "sign/verify", "bip39", "hdwallet"),
        )
        .await
        .unwrap();

    let message = random_digest_hex();

    for hdwallet in [
        HdWalletOptions {
            hd_derivation_path: None,
            coin: Some(60),
            coin_abbr: None,
            index: Some(0),
        },
        // Unknown coin numbers derive anyway along the Ethereum-shaped path.
        HdWalletOptions {
            hd_derivation_path: None,
            coin: Some(61),
            coin_abbr: None,
            index: Some(0),
        },
        HdWalletOptions {
            hd_derivation_path: None,
            coin: None,
            coin_abbr: Some("ETH".to_owned()),
            index: Some(0),
        },
    ] {
        let opts = SignatureOptions {
            algorithm: None,
            hdwallet: Some(hdwallet),
        };
        let response = engine
            .sign_message(SCOPE, vault, key.key.id, &message, opts.clone())
            .await
            .unwrap();
        let verified = engine
            .verify_signature(SCOPE, vault, key.key.id, &message, &response.signature, opts)
            .await
            .unwrap();
        assert!(verified);
    }
}

// ── Listing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn listing_counts_and_filters() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    engine
        .create_key(
            SCOPE,
            vault,
            key_request("asymmetric", "sign/verify", "babyjubjub", "bjj baseline"),
        )
        .await
        .unwrap();
    for n in 0..2 {
        engine
            .create_key(
                SCOPE,
                vault,
                key_request(
                    "asymmetric",
                    "sign/verify",
                    "SECP256k1",
                    &format!("eth key {n}"),
                ),
            )
            .await
            .unwrap();
    }

    // Unfiltered: children + master.
    let all = engine.list_keys(SCOPE, vault, KeyFilter::default()).await.unwrap();
    assert_eq!(all.len(), 4);

    let secp = engine
        .list_keys(
            SCOPE,
            vault,
            KeyFilter {
                kind: None,
                spec: Some("secp256k1".to_owned()),
            },
        )
        .await
        .unwrap();
    assert_eq!(secp.len(), 2);
    for key in &secp {
        assert_eq!(key.address.as_ref().unwrap().len(), 42);
        assert_eq!(key.spec.canonical(), "secp256k1");
    }

    let bjj = engine
        .list_keys(
            SCOPE,
            vault,
            KeyFilter {
                kind: None,
                spec: Some("babyJubJub".to_owned()),
            },
        )
        .await
        .unwrap();
    assert_eq!(bjj.len(), 1);
    assert!(bjj[0].address.is_none());

    // type=symmetric is just the master key; asymmetric is everything else.
    let symmetric = engine
        .list_keys(
            SCOPE,
            vault,
            KeyFilter {
                kind: Some("symmetric".to_owned()),
                spec: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(symmetric.len(), 1);

    let asymmetric = engine
        .list_keys(
            SCOPE,
            vault,
            KeyFilter {
                kind: Some("asymmetric".to_owned()),
                spec: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(asymmetric.len(), 3);
}

// ── Ephemeral vs persisted material ──────────────────────────────────

#[tokio::test]
async fn ephemeral_keys_return_material_inline() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    for (kind, usage, spec, wants_private, wants_seed) in [
        ("asymmetric", "sign/verify", "c25519", true, false),
        ("asymmetric", "sign/verify", "ed25519", false, true),
        ("asymmetric", "sign/verify", "Secp256k1", true, false),
        ("asymmetric", "sign/verify", "BabyJubJub", true, false),
        ("asymmetric", "sign/verify", "Bip39", false, true),
        ("asymmetric", "sign/verify", "Rsa-2048", true, false),
        ("symmetric", "encrypt/decrypt", "Aes-256-Gcm", true, false),
        ("symmetric", "encrypt/decrypt", "chacha20", false, true),
    ] {
        let request = CreateKeyRequest {
            ephemeral: true,
            ..key_request(kind, usage, spec, "ephemeral key")
        };
        let created = engine.create_key(SCOPE, vault, request).await.unwrap();
        let material = created
            .material
            .unwrap_or_else(|| panic!("no material for ephemeral {spec}"));

        assert_eq!(material.private_key.is_some(), wants_private, "{spec}");
        assert_eq!(material.seed.is_some(), wants_seed, "{spec}");
        if spec == "Bip39" {
            assert!(material.mnemonic.is_some());
        }
    }

    // Nothing but the master key was persisted.
    let keys = engine.list_keys(SCOPE, vault, KeyFilter::default()).await.unwrap();
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn persisted_keys_never_return_material() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    for (kind, usage, spec) in [
        ("asymmetric", "sign/verify", "ed25519"),
        ("asymmetric", "sign/verify", "secp256k1"),
        ("symmetric", "encrypt/decrypt", "aes-256-gcm"),
    ] {
        let created = engine
            .create_key(SCOPE, vault, key_request(kind, usage, spec, "regular key"))
            .await
            .unwrap();
        assert!(created.material.is_none(), "{spec} leaked material");
    }
}

// ── Derivation ───────────────────────────────────────────────────────

#[tokio::test]
async fn derived_chacha_key_encrypts_independently() {
    let harness = unsealed_harness().await;
    let engine = &harness.engine;
    let vault = make_vault(engine, "vaulty vault").await;

    let parent = engine
        .create_key(
            SCOPE,
            vault,
            key_request("symmetric", "encrypt/decrypt", "chacha20", "parent"),
        )
        .await
        .unwrap();

    let derived = engine
        .derive_key(
            SCOPE,
            vault,
            parent.key.id,
            keyvault_core::DeriveKeyRequest {
                name: Some("derived key 01".to_owned()),
                description: Some("derived key 01 description".to_owned()),
                context: Some("x".repeat(32)),
                nonce: None,
                hdwallet: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(derived.key.name, "derived key 01");
    assert_eq!(derived.key.description, "derived key 01 description");

    let data = "b".repeat(128);
    let ciphertext = engine
        .encrypt(SCOPE, vault, derived.key.id, &data, None)
        .await
        .unwrap();

    // The parent cannot read the child's ciphertext and vice versa.
    assert_eq!(
        engine.decrypt(SCOPE, vault, derived.key.id, &ciphertext).await.unwrap(),
        data
    );
    assert_ne!(
        engine
            .decrypt(SCOPE, vault, parent.key.id, &ciphertext)
            .await
            .unwrap_or_default(),
        data
    );
}
