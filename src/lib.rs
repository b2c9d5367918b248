//! Selectel provider
//!
//! Manages Selectel dedicated servers and scheduled volume backups through
//! their REST APIs. The host owns the plugin protocol and drives the
//! provider through the [`ProviderService`] trait with JSON state.
//!
//! # Overview
//!
//! - **Resources**: `selectel_servers_server_v1` orders a dedicated server or
//!   server chip and installs its OS; `selectel_cloudbackup_plan_v2` manages a
//!   scheduled backup plan for volumes
//! - **Data sources**: server configurations, operating systems, locations and
//!   backup checkpoints
//! - **Waiter**: [`waiter::wait_for_state`] polls a remote object until it
//!   reaches a target status, honouring a deadline and cancellation
//! - **Schema & validation**: declarative schemas, config validation and plan
//!   diffs
//!
//! # Quick Start
//!
//! ```ignore
//! use selectel_provider::{init_logging, ProviderService, SelectelProvider};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = SelectelProvider::new();
//!     provider
//!         .configure(json!({"auth_token": std::env::var("SEL_TOKEN")?}))
//!         .await?;
//!
//!     let locations = provider
//!         .read_data_source("selectel_servers_location_v1", json!({"project_id": "p"}))
//!         .await?;
//!     println!("{}", locations["locations"]);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod service;
pub mod testing;
pub mod types;
pub mod validation;
pub mod waiter;

pub use config::{Config, Timeouts};
pub use error::{ProviderError, ResultExt};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::SelectelProvider;
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};
pub use waiter::{wait_for_state, Refresh, WaitSpec};

pub use async_trait::async_trait;
pub use serde_json;
pub use tracing;
