//! Submits batch jobs to Slurm and resubmits them until they complete.
//!
//! The lifecycle engine lives in the `resubmit-engine` crate; this crate
//! holds the command line surface and its layered configuration.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod commands;
pub mod config;

pub use config::Config;
