//! # Container runtime client
//!
//! A thin, typed interface to the container engine. The orchestrator only
//! ever talks to the engine through [`RuntimeClient`]; [`DockerCli`] drives
//! the `docker` binary, and `testing::FakeRuntime` (feature `test-utils`)
//! stands in for it in tests.
//!
//! Every call takes a deadline. A call that runs out of time fails with
//! [`Error::Timeout`] and says nothing about whether the engine applied the
//! operation; callers re-`inspect` to find out.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod client;
mod docker;
mod error;
mod process;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{
    CreateRequest, MANAGED_LABEL, PROJECT_LABEL, RECORD_LABEL, RunningContainer, RuntimeClient,
    RuntimeRef, RuntimeStatus,
};
pub use docker::{DockerCli, DockerConfig};
pub use error::{Error, Result};
pub use process::{CommandOutput, CommandRunner};
