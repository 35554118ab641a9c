mod client;
mod error;

pub use client::{HttpClient, HttpResponse};
pub use error::{Error, HttpTransportErrorKind, Result};
