//! GCHK Slurm Integration
//!
//! Provides node discovery and draining against the Slurm CLI for GPU Checker.

pub mod client;
pub mod node_ops;

pub use client::{SlurmClient, SlurmConfig};
pub use node_ops::parse_node_list;
