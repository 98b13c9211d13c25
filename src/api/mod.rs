//! REST access: transport, per-entity modules and the client that hands
//! them out.

mod client;
mod entity_api;
mod http;
mod transport;

pub use client::Client;
pub use entity_api::{EntityApi, DEFAULT_PAGE_SIZE};
pub use http::HttpTransport;
pub use transport::{Method, Request, Response, Transport};
