pub mod candle;
pub mod error;
pub mod instrument;
pub mod schema;
pub mod series;
pub mod store;
pub mod timeframe;
