//! Capability modules and the catalog that loads them on demand.
//!
//! Nothing is loaded up front. The planner searches the catalog for the
//! capabilities a step needs, and the catalog loads them (dependencies
//! first) only when the step is about to run.
//!
//! # Submodules
//!
//! - [`core`]: the [`Capability`] trait, [`Action`], [`CapabilityMetadata`],
//!   and [`PriorityTier`].
//! - [`catalog`]: [`Catalog`]: registration, keyword search, load/unload
//!   with dependency resolution, and usage accounting.
//! - [`dag`]: topological ordering and dependency-closure resolution with
//!   cycle detection.
//! - [`builtin`]: [`EchoCapability`] and the reference catalog used by the
//!   CLI.

pub mod builtin;
pub mod catalog;
pub mod core;
pub mod dag;

pub use builtin::{EchoCapability, echo_factory, reference_catalog};
pub use catalog::{Catalog, CatalogConfig, LoadedContextUsage, UsageStats};
pub use core::{
    Action, Capability, CapabilityFactory, CapabilityFuture, CapabilityMetadata, PriorityTier,
};
