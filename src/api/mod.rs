//! API clients.
//!
//! - [`Session`]: cookie loading and bearer token scraping
//! - [`CatalogClient`]: typed catalog metadata
//! - [`PlaybackClient`]: webplayback negotiation and license exchange

pub mod catalog;
pub mod playback;
pub mod session;

pub use catalog::CatalogClient;
pub use playback::{PlaybackClient, Webplayback};
pub use session::Session;
