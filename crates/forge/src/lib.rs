//! Client for the external image-synthesis and identity-swap services.
//!
//! [`api::ForgeApi`] speaks HTTP; the rest of the workspace only sees the
//! [`service::ImageService`] trait so tests can substitute a fake.

pub mod api;
pub mod messages;
pub mod service;

pub use api::{ForgeApi, ForgeApiError, ForgeTimeouts};
pub use service::ImageService;
