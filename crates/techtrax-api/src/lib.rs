// techtrax-api: Async Rust client for the TechTrax queue backend (REST + push channel)

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod socket;
pub mod transport;

pub use auth::{AccessClaims, TokenPair, decode_claims};
pub use client::{ApiClient, ApiResponse};
pub use error::Error;
pub use socket::ReconnectConfig;
pub use transport::{TlsMode, TransportConfig};
