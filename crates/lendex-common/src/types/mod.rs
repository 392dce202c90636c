//! Core data types for the lending engine

pub mod balance;
pub mod position;
pub mod rates;

/// Authenticated caller identity, trusted as given
pub type UserId = String;

/// Asset symbol, e.g. `USDT` or `BTC`
pub type AssetId = String;
