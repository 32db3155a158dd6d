//! # tf-convert
//!
//! External texture converter plumbing for the texforge pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ConverterLocator`]) -- find the DDS converter from
//!   an explicit config path or `PATH`.
//! - **Command execution** ([`ToolCommand`]) -- async builder with a hard
//!   timeout; the child process is killed when the deadline elapses.
//! - **Staging** ([`StagingArea`]) -- uniquely named temporary inputs that are
//!   always removed, whatever the outcome.
//! - **Texture sources** ([`TextureSource`]) -- the host's serialization
//!   callback, with file and in-memory implementations.
//! - **Invocation** ([`ConverterInvoker`]) -- groups a batch by output
//!   directory and encoding, runs one converter process per group, and maps
//!   outputs back to their final paths.
//! - **Unpacking** ([`unpack_dds`], [`unpack_many`]) -- DDS back to PNG.

pub mod command;
pub mod invoker;
pub mod source;
pub mod staging;
pub mod tools;
pub mod unpack;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use invoker::{
    group_requests, ConversionRequest, Converter, ConverterInvoker, FormatGroup, Invocation,
    InvokerStats, Outcome, TexconvConverter,
};
pub use source::{BytesSource, ImageFileSource, TextureSource};
pub use staging::StagingArea;
pub use tools::{ConverterLocator, ToolInfo};
pub use unpack::{unpack_dds, unpack_many};
