//! On-demand capability loading, context budgeting, and step planning for
//! multi-step tasks.
//!
//! `loadout` runs a free-text request as a chain of steps. Each step names
//! the capability modules it needs; the engine loads them from a shared
//! [`Catalog`](capability::Catalog) just in time, hands the step a slice of
//! the bounded [`ContextBudgetManager`](context::ContextBudgetManager), and
//! retires what no running task still needs once the task ends.
//!
//! # Getting started
//!
//! ```ignore
//! use loadout::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> loadout::Result<()> {
//!     let config = EngineConfig::default();
//!     let catalog = Arc::new(reference_catalog(config.catalog.clone()));
//!     let engine = Engine::from_config(&config, catalog)
//!         .with_event_handler(LoggingHandler);
//!
//!     let options = ExecutionOptions::default().with_max_steps(3);
//!     let result = engine.execute_task("build a REST API for orders", options).await;
//!
//!     println!("{} of {} steps", result.steps_completed, result.total_steps);
//!     println!("Cost: ${:.4}", result.cost_estimate);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Plug in a capability:** implement
//!   [`Capability`](capability::Capability) and register it with a
//!   [`CapabilityFactory`](capability::CapabilityFactory) via
//!   [`Catalog::register`](capability::Catalog::register).
//!   [`EchoCapability`](capability::EchoCapability) is a reference
//!   implementation.
//!
//! - **Bound the working context:** see
//!   [`ContextBudgetManager`](context::ContextBudgetManager) and the eviction
//!   cascade in [`context::eviction`].
//!
//! - **Plan without executing:** [`Planner::decompose`](planner::Planner::decompose)
//!   and [`Planner::estimate_complexity`](planner::Planner::estimate_complexity).
//!
//! - **Observe a run:** implement [`EventHandler`](engine::EventHandler), or
//!   use [`LoggingHandler`](engine::LoggingHandler).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`capability`] | Capability contract, catalog, dependency ordering, reference capability |
//! | [`context`] | Context windows, eviction cascade, summarizer, budget manager |
//! | [`planner`] | Request classification, step templates, complexity |
//! | [`engine`] | Task loop, step dispatch, pause/resume, results, cost, events |
//! | [`config`] | [`EngineConfig`](config::EngineConfig) and JSON loading |

pub mod capability;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod planner;
pub mod prelude;

pub use error::{CapabilityError, Error, Result};
