//! 由 legacy amino 签名文档构造 EIP-712 typed data
//!
//! 设备签名的是 `keccak256(0x19 0x01 ‖ domainSeparator ‖ hashStruct(Tx))`，
//! 其中 `Tx` 为 `Tx(string context,string msgs)`：交易上下文与消息列表都以 JSON
//! 字符串携带，便于设备展示。JSON 中的 `<` `>` `&` 会被转义为 `\u003c` 等形式，
//! 与链端重建 typed data 时的编码保持一致。

use crate::core::config::TypedDataConfig;
use crate::core::errors::{HardwareError, Result};
use crate::core::types::{keccak256, Address};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// EIP-712 签名信封前缀
pub const EIP712_PREFIX: [u8; 2] = [0x19, 0x01];

/// 前缀 + domain separator + message hash
pub const ENVELOPE_LEN: usize = 66;

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract,string salt)";
const TX_TYPE: &str = "Tx(string context,string msgs)";

/// 定长结构化数据签名信封
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedDataEnvelope {
    domain_separator: [u8; 32],
    message_hash: [u8; 32],
}

impl TypedDataEnvelope {
    pub fn new(domain_separator: [u8; 32], message_hash: [u8; 32]) -> Self {
        Self { domain_separator, message_hash }
    }

    /// validate原始 payload：必须恰好 66 字节且以 `0x19 0x01` 开头
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != ENVELOPE_LEN {
            return Err(HardwareError::UnsupportedPayload(format!(
                "typed data envelope must be {} bytes, got {}",
                ENVELOPE_LEN,
                payload.len()
            )));
        }
        if payload[..2] != EIP712_PREFIX {
            return Err(HardwareError::UnsupportedPayload(format!(
                "typed data envelope must start with 0x1901, got 0x{}",
                hex::encode(&payload[..2])
            )));
        }

        let mut domain_separator = [0u8; 32];
        let mut message_hash = [0u8; 32];
        domain_separator.copy_from_slice(&payload[2..34]);
        message_hash.copy_from_slice(&payload[34..66]);
        Ok(Self { domain_separator, message_hash })
    }

    pub fn domain_separator(&self) -> &[u8; 32] {
        &self.domain_separator
    }

    pub fn message_hash(&self) -> &[u8; 32] {
        &self.message_hash
    }

    pub fn to_bytes(&self) -> [u8; ENVELOPE_LEN] {
        let mut bytes = [0u8; ENVELOPE_LEN];
        bytes[..2].copy_from_slice(&EIP712_PREFIX);
        bytes[2..34].copy_from_slice(&self.domain_separator);
        bytes[34..].copy_from_slice(&self.message_hash);
        bytes
    }

    /// 签名实际覆盖的摘要
    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.to_bytes())
    }
}

/// EIP-712 domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedDataDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
    pub salt: String,
}

impl TypedDataDomain {
    /// 为 cosmos chain id 构造 domain
    pub fn for_chain(config: &TypedDataConfig, chain_id: &str) -> Result<Self> {
        let verifying_contract = config
            .verifying_contract
            .parse()
            .map_err(|e| HardwareError::Config(format!("verifying_contract: {}", e)))?;

        Ok(Self {
            name: config.domain_name.clone(),
            version: config.domain_version.clone(),
            chain_id: config.eip712_chain_id(chain_id),
            verifying_contract,
            salt: config.salt.clone(),
        })
    }

    /// hashStruct(EIP712Domain)
    pub fn separator(&self) -> [u8; 32] {
        let mut encoded = Vec::with_capacity(32 * 6);
        encoded.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.name.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.version.as_bytes()));
        encoded.extend_from_slice(&encode_uint256(self.chain_id));
        encoded.extend_from_slice(&encode_address(&self.verifying_contract));
        encoded.extend_from_slice(&keccak256(self.salt.as_bytes()));
        keccak256(&encoded)
    }
}

/// `Tx` 消息：context 与 msgs 均为 JSON 字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedTx {
    pub context: String,
    pub msgs: String,
}

impl TypedTx {
    /// hashStruct(Tx)
    pub fn struct_hash(&self) -> [u8; 32] {
        let mut encoded = Vec::with_capacity(32 * 3);
        encoded.extend_from_slice(&keccak256(TX_TYPE.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.context.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.msgs.as_bytes()));
        keccak256(&encoded)
    }
}

/// 解析后的 LEGACY_AMINO_JSON 签名文档
#[derive(Debug, Clone, Deserialize)]
pub struct LegacySignDoc {
    #[serde(deserialize_with = "amino_u64")]
    pub account_number: u64,
    pub chain_id: String,
    pub fee: LegacyFee,
    #[serde(default)]
    pub memo: String,
    pub msgs: Vec<serde_json::Value>,
    #[serde(deserialize_with = "amino_u64")]
    pub sequence: u64,
    #[serde(default, deserialize_with = "amino_u64")]
    pub timeout_height: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyFee {
    #[serde(default)]
    pub amount: Vec<Coin>,
    #[serde(deserialize_with = "amino_u64")]
    pub gas: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

// 字段顺序即序列化后的 key 顺序
#[derive(Serialize)]
struct TxContext<'a> {
    account_number: u64,
    chain_id: &'a str,
    fee: FeeInfo<'a>,
    memo: &'a str,
    sequence: u64,
    timeout_height: u64,
}

// 硬件签名不涉及 fee payer / granter
#[derive(Serialize)]
struct FeeInfo<'a> {
    amount: &'a [Coin],
    gas: u64,
}

impl LegacySignDoc {
    pub fn from_slice(sign_doc: &[u8]) -> Result<Self> {
        serde_json::from_slice(sign_doc).map_err(|e| HardwareError::InvalidSignDoc(e.to_string()))
    }

    pub fn to_typed_tx(&self) -> Result<TypedTx> {
        let context = TxContext {
            account_number: self.account_number,
            chain_id: &self.chain_id,
            fee: FeeInfo { amount: &self.fee.amount, gas: self.fee.gas },
            memo: &self.memo,
            sequence: self.sequence,
            timeout_height: self.timeout_height,
        };

        let context = serde_json::to_string(&context)
            .map_err(|e| HardwareError::InvalidSignDoc(format!("marshal context: {}", e)))?;
        let msgs = serde_json::to_string(&self.msgs)
            .map_err(|e| HardwareError::InvalidSignDoc(format!("marshal msgs: {}", e)))?;

        Ok(TypedTx { context: escape_html(&context), msgs: escape_html(&msgs) })
    }
}

/// 为 legacy amino 签名文档构造签名信封
pub fn envelope_from_sign_doc(sign_doc: &[u8], config: &TypedDataConfig) -> Result<TypedDataEnvelope> {
    let doc = LegacySignDoc::from_slice(sign_doc)?;
    let tx = doc.to_typed_tx()?;
    let domain = TypedDataDomain::for_chain(config, &doc.chain_id)?;
    Ok(TypedDataEnvelope::new(domain.separator(), tx.struct_hash()))
}

/// 链端 JSON 编码使用的 HTML 转义
///
/// 这些字符只会出现在 JSON 字符串内部，因此可以直接替换。
fn escape_html(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn encode_uint256(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn encode_address(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// Amino JSON 把 64 位整数编码为字符串
fn amino_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s.parse().map_err(de::Error::custom),
    }
}
