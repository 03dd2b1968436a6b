//! HTTP surface: middleware, client attribution and the server wrapper.

mod client_ip;
mod middleware;
mod server;

pub use client_ip::client_ip;
pub use middleware::{rate_limit, LIMIT_EXCEEDED_MESSAGE, TOKEN_HEADER};
pub use server::{router, HttpServer};
