pub mod binance_usdm;
pub mod error;
pub mod exchange;
pub mod okx;
pub mod pagination;
pub mod resume;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
