//! Provision and tear down ephemeral self-hosted GitHub Actions runners
//! on EC2.
//!
//! A start invocation mints one registration token per requested runner,
//! launches one instance per token with a rendered bootstrap script, and
//! waits until every runner registers. The resulting instance-id to
//! runner-label mapping is persisted through the workflow output channel
//! so a later stop invocation can deregister the runners and terminate
//! the instances.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod github;
pub mod lifecycle;
pub mod mapping;
pub mod provider;
pub mod report;

pub use error::{Error, Result};
