pub mod facade;
pub mod server;
pub mod types;

pub use server::StreamServer;
pub use types::{encode_envelope, WireClientEnvelope, WireEnvelope};
