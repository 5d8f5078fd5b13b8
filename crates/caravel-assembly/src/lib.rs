//! Caravel Cloud Assembly
//!
//! Boundary types for the synthesized cloud assembly: stacks, their
//! templates, and the assets (files, container images) those templates
//! reference, plus a thin reader for the on-disk assembly directory.
//!
//! Full manifest-format semantics live with the synthesizer; this crate
//! reads only what graph construction and deployment need.

mod error;
mod manifest;
mod types;

pub use error::AssemblyError;
pub use manifest::CloudAssembly;
pub use types::{
  AssetDestination, AssetKind, AssetRef, Environment, StackArtifact,
};
