//! # npmship
//!
//! Release lifecycle for publishing npm packages from a release pipeline.
//!
//! A host drives one [`Session`] per release run through the phases:
//!
//! 1. [`Session::verify_conditions`]: validate options, read manifests and
//!    confirm the run may publish (trusted publishing or configured
//!    credentials, checked against the registry once per config file)
//! 2. [`Session::prepare`]: write the release version into the manifests and
//!    optionally pack an archive
//! 3. [`Session::publish`]: publish under the channel's dist-tag
//! 4. [`Session::add_channel`]: point another dist-tag at an existing version
//!
//! [`Session::last_release`] reports what the registry currently holds.
//!
//! Typed failures come back as an [`AggregateError`] inside the returned
//! [`anyhow::Error`]:
//!
//! ```no_run
//! use npmship::{AggregateError, ExecutionContext, RawOptions, Session, SessionOptions};
//! use npmship::types::BufferedReporter;
//!
//! let mut session = Session::new(SessionOptions::default());
//! let mut ctx = ExecutionContext::from_process(".");
//! let mut reporter = BufferedReporter::new();
//!
//! if let Err(err) = session.verify_conditions(&RawOptions::new(), &mut ctx, &mut reporter) {
//!     if let Some(aggregate) = err.downcast_ref::<AggregateError>() {
//!         for code in aggregate.codes() {
//!             eprintln!("{code}");
//!         }
//!     }
//! }
//! ```
//!
//! The building blocks live in their own crates and are re-exported here.

mod context;
mod fanout;
pub mod git;
pub mod last_release;
pub mod manifest;
pub mod pack;
pub mod release_info;
mod session;

pub use context::{ExecutionContext, SessionOptions};
pub use session::{Package, Session};

pub use npmship_auth as auth;
pub use npmship_config as config;
pub use npmship_environment as environment;
pub use npmship_npm as npm;
pub use npmship_npmrc as npmrc;
pub use npmship_process as process;
pub use npmship_registry as registry;
pub use npmship_types as types;

pub use npmship_auth::{AuthCheck, AuthMethod};
pub use npmship_config::{PluginConfig, PluginStep, RawOptions};
pub use npmship_types::{
    AggregateError, LastRelease, NextRelease, PackageManager, PluginError, ReleaseInfo, Reporter,
};
