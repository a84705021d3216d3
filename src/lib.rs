//! vzdriver: lifecycle supervision for a single lightweight VM.
//!
//! The supervisor side ([`driver`]) tracks the `vz` runner process through a
//! PID file and OS signals. The runner side ([`runner`]) owns the hypervisor
//! session and turns a termination signal into a graceful shutdown.

pub mod config;
pub mod driver;
pub mod error;
pub mod leases;
pub mod pidfile;
pub mod process;
pub mod provision;
pub mod runner;
pub mod util;

pub use error::{Error, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
