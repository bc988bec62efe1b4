// Network module - JSON-lines TCP server and wire types

pub mod protocol;
pub mod server;

pub use protocol::{ErrorBody, Request, Response, PROTOCOL_VERSION};
pub use server::Server;
