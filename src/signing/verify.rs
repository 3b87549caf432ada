//! 设备签名validate
//!
//! 设备只被信任"产生字节"：返回的签名必须能通过 secp256k1 公钥恢复得到账户
//! 公钥，否则直接丢弃。

use crate::core::errors::{HardwareError, Result};
use crate::signing::eip712::TypedDataEnvelope;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1};

/// r ‖ s ‖ v
pub const SIGNATURE_LENGTH: usize = 65;

/// v 在签名中的偏移
pub const RECOVERY_ID_OFFSET: usize = 64;

/// Ethereum 风格 v 的偏移 (27/28)
const ETHEREUM_V_OFFSET: u8 = 27;

/// 从哈希与签名恢复公钥
pub fn recover_public_key(hash: &[u8; 32], signature: &[u8]) -> Result<PublicKey> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(HardwareError::SignatureVerificationFailed(format!(
            "invalid signature length: {}",
            signature.len()
        )));
    }

    let v = signature[RECOVERY_ID_OFFSET];
    let recovery_id = v
        .checked_sub(ETHEREUM_V_OFFSET)
        .ok_or_else(|| {
            HardwareError::SignatureVerificationFailed(format!("invalid recovery byte: {}", v))
        })
        .and_then(|id| Ok(RecoveryId::from_i32(i32::from(id))?))?;

    let signature = RecoverableSignature::from_compact(&signature[..RECOVERY_ID_OFFSET], recovery_id)?;
    let message = Message::from_slice(hash)?;

    Ok(Secp256k1::verification_only().recover_ecdsa(&message, &signature)?)
}

/// validate签名确实由 `public_key` 对应的私钥对该信封产生
pub fn verify_signature(
    public_key: &PublicKey,
    envelope: &TypedDataEnvelope,
    signature: &[u8],
) -> Result<()> {
    let recovered = recover_public_key(&envelope.signing_hash(), signature)?;

    if recovered.serialize_uncompressed() != public_key.serialize_uncompressed() {
        return Err(HardwareError::SignatureVerificationFailed(
            "recovered public key does not match account".to_string(),
        ));
    }

    Ok(())
}
