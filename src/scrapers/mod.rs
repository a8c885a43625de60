//! External price sources.

pub mod binance_price_poller;

pub use binance_price_poller::{spawn_price_poller, BinancePricePoller};
