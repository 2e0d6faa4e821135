//! # passkit
//!
//! Modular static analysis for Rust workspaces.
//!
//! An [`Analyzer`] inspects one package at a time through a [`Pass`]. It can
//! report [`Diagnostic`]s with suggested fixes, hand a result to analyzers
//! that require it, and attach facts to objects and packages that the same
//! analyzer reads back when it later analyzes an importing package.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use passkit::{Analyzer, Diagnostic};
//!
//! let todo = Analyzer::builder("todo")
//!     .doc("reports TODO comments")
//!     .run(|pass| {
//!         let found: Vec<_> = pass
//!             .files()
//!             .iter()
//!             .flat_map(|f| f.content().match_indices("TODO").map(|(i, _)| f.token().pos(i)))
//!             .collect();
//!         for pos in found {
//!             pass.report(Diagnostic::new(pos, "TODO left in code"));
//!         }
//!         Ok(None)
//!     })
//!     .build()?;
//!
//! std::process::exit(passkit::cli::run(std::env::args(), &[todo]));
//! ```
//!
//! ## Testing analyzers
//!
//! [`testing::run`] checks an analyzer against `// want` comments in a test
//! workspace; see the [`testing`] module.

#![forbid(unsafe_code)]

pub use passkit_core::*;

/// Command-line entry point.
pub mod cli {
    pub use passkit_cli::{exit, run, run_with_loader};
}

pub mod testing;
