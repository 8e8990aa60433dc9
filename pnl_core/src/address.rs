use crate::{PnLError, Result};

/// Check that `address` is a base58-encoded 32-byte Solana public key
pub fn validate_wallet_address(address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(PnLError::InvalidWalletAddress(
            "Wallet address cannot be empty".to_string(),
        ));
    }

    if address.len() < 32 || address.len() > 44 {
        return Err(PnLError::InvalidWalletAddress(format!(
            "Invalid wallet address length: {}",
            address.len()
        )));
    }

    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| PnLError::InvalidWalletAddress(format!("{}: {}", address, e)))?;

    if bytes.len() != 32 {
        return Err(PnLError::InvalidWalletAddress(format!(
            "{} decodes to {} bytes, expected 32",
            address,
            bytes.len()
        )));
    }

    Ok(())
}
