//! Price Feed Adapters
//!
//! - Binance: REST ticker source for the configured token universe
//! - PriceCache: shared board refreshed in the background, serving
//!   stale-but-recent prices when the source hiccups

pub mod binance;
pub mod price_cache;

pub use binance::BinancePriceSource;
pub use price_cache::PriceCache;
