//! # assembly-lm
//!
//! Client for the lifecycle manager (LM) that owns the real Assembly
//! instances managed by the assembly operator.
//!
//! The crate exposes the [`LmApi`] trait, a stateless-per-call facade over the
//! LM REST API:
//!
//! - **Intents**: create, upgrade, change-state and delete. Each returns the id
//!   of the asynchronous process LM started. The client never polls a process
//!   to completion; pacing belongs to the caller.
//! - **Reads**: assemblies by id or name, the latest process for an assembly
//!   name, and a process by id. Absence is `Ok(None)`, never an error.
//!
//! [`LmClient`] is the `reqwest` implementation. It attaches OAuth2
//! client-credentials bearer tokens obtained and cached by
//! [`security::TokenManager`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use assembly_lm::{LmApi, LmClient, LmConfig};
//!
//! # async fn example() -> assembly_lm::Result<()> {
//! let config = LmConfig::new("https://lm.example.com")
//!     .with_client_credentials("assembly-operator", "secret");
//! let client = LmClient::new(config)?;
//!
//! if let Some(assembly) = client.get_assembly_by_name("svc-a").await? {
//!     println!("{} is {}", assembly.name, assembly.state);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod security;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use client::{LmApi, LmClient};
pub use config::LmConfig;
pub use error::{Error, Result};
pub use types::{
    Assembly, AssemblyProperty, ChangeAssemblyStateRequest, CreateAssemblyRequest,
    DeleteAssemblyRequest, Process, UpgradeAssemblyRequest,
};
