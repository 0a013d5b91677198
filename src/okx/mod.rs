//! OKX v5 perpetual swap integration
//!
//! - [`auth`]: request signing and credentials
//! - [`types`]: wire models
//! - [`client`]: [`OkxClient`], the production [`VenueClient`](crate::venue::VenueClient)

pub mod auth;
pub mod client;
pub mod types;

pub use auth::Credentials;
pub use client::{OkxClient, OkxConfig, API_BASE_URL};
