pub mod exponential_backoff;
pub mod wallet;
