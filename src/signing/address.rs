//! bech32 address格式化

use crate::core::errors::{HardwareError, Result};
use crate::core::types::Address;
use bech32::{ToBase32, Variant};

/// 以给定 human readable prefix（例如 "inj"）编码address
pub fn bech32_address(hrp: &str, address: &Address) -> Result<String> {
    bech32::encode(hrp, address.as_bytes().to_base32(), Variant::Bech32)
        .map_err(|e| HardwareError::AddressEncoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bech32::FromBase32;

    #[test]
    fn test_bech32_prefix() {
        let address = Address::new([0u8; 20]);
        let encoded = bech32_address("inj", &address).unwrap();
        assert!(encoded.starts_with("inj1"));
        // hrp + '1' + 32 个数据字符 + 6 位校验
        assert_eq!(encoded.len(), 3 + 1 + 32 + 6);

        let (hrp, data, variant) = bech32::decode(&encoded).unwrap();
        assert_eq!(hrp, "inj");
        assert_eq!(variant, Variant::Bech32);
        assert_eq!(Vec::<u8>::from_base32(&data).unwrap(), vec![0u8; 20]);
    }

    #[test]
    fn test_invalid_hrp() {
        let address = Address::new([1u8; 20]);
        assert!(matches!(
            bech32_address("", &address),
            Err(HardwareError::AddressEncoding(_))
        ));
    }
}
