mod util;

use hardware_signer::core::config::TypedDataConfig;
use hardware_signer::core::errors::HardwareError;
use hardware_signer::core::types::DerivationPath;
use hardware_signer::signing::{envelope_from_sign_doc, verify_signature, LedgerSigner};
use hardware_signer::signing::SIGN_MODE_LEGACY_AMINO_JSON;
use secp256k1::PublicKey;
use std::time::Duration;
use test_case::test_case;
use util::{harness, SIGN_DOC};

async fn signer(devices: usize) -> (util::Harness, LedgerSigner) {
    let h = harness(devices);
    let signer = LedgerSigner::discover(&h.hub, TypedDataConfig::default())
        .await
        .unwrap();
    (h, signer)
}

#[tokio::test(start_paused = true)]
async fn discover_without_devices() {
    let h = harness(0);
    let result = LedgerSigner::discover(&h.hub, TypedDataConfig::default()).await;
    assert!(matches!(result, Err(HardwareError::NoDeviceFound)));
}

#[tokio::test(start_paused = true)]
async fn discover_refuses_to_choose() {
    let h = harness(2);
    let result = LedgerSigner::discover(&h.hub, TypedDataConfig::default()).await;
    assert!(matches!(result, Err(HardwareError::MultipleDevicesFound(2))));
    assert!(h.drivers().iter().all(|d| d.open_calls() == 0));
}

#[tokio::test(start_paused = true)]
async fn discover_opens_the_device() {
    let (h, signer) = signer(1).await;
    assert!(signer.wallet().is_open());
    assert_eq!(h.last_driver().open_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn sign_returns_verified_signature() {
    let (_h, signer) = signer(1).await;
    let path = DerivationPath::ethereum_default();

    let signature = signer
        .sign(&path, SIGN_DOC.as_bytes(), SIGN_MODE_LEGACY_AMINO_JSON)
        .await
        .unwrap();
    assert_eq!(signature.len(), 65);

    let public_key = PublicKey::from_slice(&signer.public_key(&path).await.unwrap()).unwrap();
    let envelope = envelope_from_sign_doc(SIGN_DOC.as_bytes(), &TypedDataConfig::default()).unwrap();
    verify_signature(&public_key, &envelope, &signature).unwrap();
}

#[test_case(1 ; "direct")]
#[test_case(127 ; "textual")]
#[tokio::test(start_paused = true)]
async fn unsupported_sign_mode_never_reaches_device(mode: u8) {
    let (h, signer) = signer(1).await;

    let result = signer
        .sign(&DerivationPath::ethereum_default(), SIGN_DOC.as_bytes(), mode)
        .await;
    assert!(matches!(result, Err(HardwareError::UnsupportedSignMode(m)) if m == mode));
    assert_eq!(h.last_driver().sign_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_sign_doc_never_reaches_device() {
    let (h, signer) = signer(1).await;

    let result = signer
        .sign(&DerivationPath::ethereum_default(), b"{\"chain_id\": 5", SIGN_MODE_LEGACY_AMINO_JSON)
        .await;
    assert!(matches!(result, Err(HardwareError::InvalidSignDoc(_))));
    assert_eq!(h.last_driver().sign_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn corrupted_signature_is_rejected() {
    let (h, signer) = signer(1).await;
    h.last_driver().corrupt_signatures(true);

    let result = signer
        .sign(&DerivationPath::ethereum_default(), SIGN_DOC.as_bytes(), SIGN_MODE_LEGACY_AMINO_JSON)
        .await;
    assert!(matches!(result, Err(HardwareError::SignatureVerificationFailed(_))));
    assert_eq!(h.last_driver().sign_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn signer_reopens_after_heartbeat_failure() {
    let (h, signer) = signer(1).await;
    let driver = h.last_driver();

    driver.fail_heartbeat(true);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!signer.wallet().is_open());
    driver.fail_heartbeat(false);

    let signature = signer
        .sign(&DerivationPath::ethereum_default(), SIGN_DOC.as_bytes(), SIGN_MODE_LEGACY_AMINO_JSON)
        .await
        .unwrap();
    assert_eq!(signature.len(), 65);
    assert_eq!(driver.open_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn address_uses_requested_prefix() {
    let (_h, signer) = signer(1).await;
    let path = DerivationPath::ethereum_default();

    let (public_key, address) = signer.address(&path, "inj").await.unwrap();
    assert!(address.starts_with("inj1"), "{}", address);
    assert_eq!(public_key, signer.public_key(&path).await.unwrap());

    let (_, cosmos) = signer.address(&path, "cosmos").await.unwrap();
    assert!(cosmos.starts_with("cosmos1"));
}

#[tokio::test(start_paused = true)]
async fn public_key_is_uncompressed() {
    let (_h, signer) = signer(1).await;

    let key = signer.public_key(&DerivationPath::ethereum_default()).await.unwrap();
    assert_eq!(key[0], 0x04);
    assert!(PublicKey::from_slice(&key).is_ok());
}

#[tokio::test(start_paused = true)]
async fn different_paths_yield_different_keys() {
    let (_h, signer) = signer(1).await;
    let first: DerivationPath = "m/44'/60'/0'/0/0".parse().unwrap();
    let second: DerivationPath = "m/44'/60'/0'/0/1".parse().unwrap();

    assert_ne!(
        signer.public_key(&first).await.unwrap(),
        signer.public_key(&second).await.unwrap()
    );
}
