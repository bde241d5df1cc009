use bs58;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid EVM address format: {0}")]
    InvalidEvmAddress(String),

    #[error("Invalid base58 address format: {0}")]
    InvalidSolanaAddress(String),
}

/// Validate a 0x-prefixed 20-byte hex address and return it lowercased.
pub fn normalize_evm_address(address: &str) -> Result<String, ValidationError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ValidationError::MissingParameter("address".to_string()));
    }

    let hex = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| ValidationError::InvalidEvmAddress(address.to_string()))?;

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidEvmAddress(address.to_string()));
    }

    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

pub fn validate_solana_address(address: &str) -> Result<(), ValidationError> {
    // Check if address is empty
    if address.trim().is_empty() {
        return Err(ValidationError::MissingParameter("address".to_string()));
    }

    // Decode base58 string
    let decoded = match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return Err(ValidationError::InvalidSolanaAddress(address.to_string())),
    };

    // Solana addresses are 32 bytes
    if decoded.len() != 32 {
        return Err(ValidationError::InvalidSolanaAddress(address.to_string()));
    }

    Ok(())
}

/// Normalize a wallet address of either family.
///
/// Hex addresses are lowercased, base58 addresses are case sensitive and
/// returned as given.
pub fn normalize_wallet_address(address: &str) -> Result<String, ValidationError> {
    let address = address.trim();
    if address.starts_with("0x") || address.starts_with("0X") {
        normalize_evm_address(address)
    } else {
        validate_solana_address(address)?;
        Ok(address.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_address_is_lowercased() {
        let addr = normalize_evm_address("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01").unwrap();
        assert_eq!(addr, "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn evm_address_rejects_bad_input() {
        assert!(matches!(
            normalize_evm_address(""),
            Err(ValidationError::MissingParameter(_))
        ));
        assert!(normalize_evm_address("0x1234").is_err());
        assert!(normalize_evm_address("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(normalize_evm_address("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn base58_addresses_keep_case() {
        let addr = "9ii1FEiWSgDzXAbwj2oTmJXzkfCw78mnHwPQv9WQ5iTn";
        assert_eq!(normalize_wallet_address(addr).unwrap(), addr);
        assert!(normalize_wallet_address("not-base58-0OIl").is_err());
    }
}
