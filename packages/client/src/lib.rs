#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client-side logic for the sensor map.
//!
//! [`orchestrator::FetchOrchestrator`] deduplicates search requests so that
//! repeated map events for an unchanged viewport and time range never hit
//! the server twice, and [`playback::PlaybackMachine`] steps a time window
//! across the temporal domain of the current viewport. Timers run against
//! an injectable [`clock::Clock`] so both can be driven in virtual time.

pub mod clock;
pub mod orchestrator;
pub mod playback;
pub mod signature;
pub mod transport;

pub use orchestrator::FetchOrchestrator;
pub use playback::{PlaybackMachine, Player, PlayerCommand};
pub use signature::{TimeRange, Viewport};
pub use transport::{HttpTransport, SearchTransport};

/// Errors that can occur while fetching search results.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request could not be sent or timed out.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Search endpoint returned status {status}: {message}")]
    Status {
        /// HTTP or envelope status code.
        status: u16,
        /// Server-provided message, possibly empty.
        message: String,
    },

    /// The response body was not a valid result envelope.
    #[error("Failed to parse search response: {0}")]
    Parse(#[from] serde_json::Error),
}
