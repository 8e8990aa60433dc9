// Provider clients for the P&L engine
// Helius supplies wallet history, BirdEye supplies USD prices

pub mod birdeye_client;
pub mod helius_client;

// Re-export configs from config_manager
pub use config_manager::{BirdEyeConfig, HeliusConfig};

pub use birdeye_client::{parse_historical_price, parse_multi_price, BirdEyeClient, BirdEyeError};
pub use helius_client::{parse_transactions, HeliusClient, HeliusError, HeliusTransaction};

