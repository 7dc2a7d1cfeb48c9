//! winmedia library: the media pipeline behind the `winmedia` CLI.
//!
//! Exposed as a library so integration tests can drive each stage with fake
//! tools in place of wimlib, 7z and the disk utilities.

pub mod common;
pub mod config;
pub mod drivers;
pub mod error;
pub mod image;
pub mod media;
pub mod pipeline;
pub mod preflight;
pub mod preset;
pub mod process;
pub mod provision;
pub mod servicing;
pub mod timing;
pub mod tracker;
