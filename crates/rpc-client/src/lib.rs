pub mod error;
pub mod jsonrpc_client;
pub mod retry;
pub mod traits;
mod utils;

pub use traits::{view, ChainClient, ContractCall, Receipt};
