pub mod provider;

pub use provider::{ConnectionConfig, ConnectionHandle, ConnectionProvider, IdentityPolicy};
