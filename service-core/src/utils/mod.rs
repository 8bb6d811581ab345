pub mod client_ip;

pub use client_ip::{RequestOrigin, resolve_client_ip, UNKNOWN_CLIENT_IP};
