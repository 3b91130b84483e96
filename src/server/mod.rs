//! HTTP server

mod http;

pub use http::{run, AppState};

#[cfg(test)]
pub(crate) use http::tests;
