pub mod btle;
pub mod codec;
pub(crate) mod connection;
pub mod constants;
pub mod gesture;
pub mod latch;
pub mod mirror;
pub mod safety;
pub mod session;
pub mod transport;
pub mod types;
