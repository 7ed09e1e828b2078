//! Client-side cache over the Mapillary API.
//!
//! An [`app::App`] resolves usernames to account keys, fetches their
//! sequences, merges the sequence fragments into one trajectory and
//! downloads the matching thumbnails. Every stage is memoized for the
//! lifetime of the session.

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod mapillary;
pub mod merge;
pub mod output;
pub mod store;
