pub mod pipeline;
pub mod runtime;
pub mod server;

pub use server::{client_request, client_stream, run_daemon};
