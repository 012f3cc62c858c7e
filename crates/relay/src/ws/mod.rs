// WebSocket transport: upgrade route and the per-connection socket loop.

mod handler;
mod protocol;

pub use handler::router;
