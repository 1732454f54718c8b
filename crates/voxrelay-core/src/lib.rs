//! Core config, errors, and wire messages for voxrelay.

pub mod config;
pub mod error;
pub mod protocol;
