//! Bandcamp extraction: page fetching behind a shared throttle, and the
//! parsers that turn pages into releases and followed accounts.

mod client;
mod error;
pub mod parser;
mod throttle;

pub use client::{player_url, BandcampClient};
pub use error::ExtractionError;
pub use parser::IntermediateRelease;
pub use throttle::{Priority, Throttle};
