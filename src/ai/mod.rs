mod client;
mod validator;

pub use client::EnrichmentClient;
pub use validator::{validate, ValidationMode};
