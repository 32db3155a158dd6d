//! Texforge - parallel DDS texture conversion for RTX Remix mod authoring
//!
//! This library crate exposes the CLI's input handling for integration
//! testing. The conversion machinery lives in the `tf-*` crates.

pub mod scanner;
