//! 签名模块
//!
//! - [`eip712`]: legacy amino 文档到 EIP-712 信封
//! - [`verify`]: 公钥恢复validate
//! - [`address`]: bech32 address
//! - [`service`]: [`LedgerSigner`]

pub mod address;
pub mod eip712;
pub mod service;
pub mod verify;

pub use eip712::{envelope_from_sign_doc, TypedDataEnvelope};
pub use service::{LedgerSigner, SIGN_MODE_LEGACY_AMINO_JSON};
pub use verify::verify_signature;
