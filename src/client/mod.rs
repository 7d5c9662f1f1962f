// File: ./src/client/mod.rs
pub mod cert;
pub mod core;
pub mod dav;

pub use crate::client::core::{DavRequest, DavResponse, DavTransport, HttpTransport, strip_host};
