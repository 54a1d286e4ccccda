pub mod handlers;
pub mod middleware;
pub mod server;
pub mod sse;

pub use server::build_router;
