// The operator HTTP surface. Not re-exported at the crate root; web types
// are referenced explicitly through the module.
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{AppState, serve};
