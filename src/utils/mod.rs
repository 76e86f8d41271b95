pub mod cache;
pub mod datetime;
pub mod env;
pub mod jsonrpc;
pub mod retry;
