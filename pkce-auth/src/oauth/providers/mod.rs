//! Preset provider configurations.

pub mod google;
