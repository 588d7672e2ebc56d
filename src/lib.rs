//! Hemmer AEP Provider
//!
//! This crate exposes the resources of an [AEP](https://aep.dev)-style REST
//! API as typed infrastructure-as-code resources. Everything is derived from
//! the API's OpenAPI description at startup; no code is generated.
//!
//! # Overview
//!
//! - **Schema derivation**: every component schema carrying an
//!   `x-aep-resource` annotation becomes a resource type (`<prefix>_<singular>`)
//!   and a collection data source (`<prefix>_<plural>`)
//! - **Value conversion**: host state and JSON bodies convert losslessly
//!   through a typed value model
//! - **Path resolution**: parent parameters and identifiers are resolved
//!   against each resource's path pattern
//! - **Operations**: create, read, update, delete, list and import over HTTP
//!
//! # Quick Start
//!
//! ```no_run
//! use hemmer_provider_aep::{init_logging, AepProvider, ProviderService};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     // AEP_OPENAPI names the description file or URL.
//!     let provider = AepProvider::from_env().await?;
//!     provider.configure(json!({"server_url": "http://localhost:8081"})).await?;
//!
//!     let state = provider
//!         .create("aep_publisher", json!({"description": "my publisher"}))
//!         .await?;
//!     tracing::info!(id = %state["id"], "Created publisher");
//!     Ok(())
//! }
//! ```
//!
//! # Identity
//!
//! Every resource has an `id` attribute holding the final segment of its
//! canonical path, and a computed `path` attribute holding the full path.
//! Parent parameters accept either a parent's full path or its `id`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod logging;
pub mod openapi;
pub mod operations;
pub mod path;
pub mod plan;
pub mod provider;
pub mod resource_schema;
pub mod schema;
pub mod service;
pub mod testing;
pub mod validation;
pub mod value;

// Re-export main types at crate root
pub use client::{HttpExecutor, RequestExecutor};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use plan::{AttributeChange, PlanResult};
pub use provider::AepProvider;
pub use resource_schema::{ResourceRegistry, ResourceSchema};
pub use schema::ProviderSchema;
pub use service::{ImportedResource, ProviderMetadata, ProviderService};
pub use validation::{is_valid, validate, validate_result};
pub use value::{Resource, Value};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
