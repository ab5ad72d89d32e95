//! Client side of the players' database-query service.

pub mod client;
pub mod ports;

pub use client::Client;
pub use ports::{PortCache, PortResolution, DB_SERVER_QUERY_PORT};
