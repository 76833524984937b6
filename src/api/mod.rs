//! Request/response contracts of the HTTP surface.
//!
//! The HTTP server itself lives outside this crate; these types define the
//! JSON bodies it exchanges and the in-body business codes.

pub mod types;

pub use types::*;
