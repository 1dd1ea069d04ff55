//! HTTP surface: admission middleware, routes and server.

mod handlers;
mod middleware;
mod server;

pub use handlers::{client_ip, health};
pub use middleware::{admission, rejection};
pub use server::{router, HttpServer};
