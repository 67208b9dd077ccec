//! `cldctl-core`: the graph engine that lowers validated component and
//! datacenter models into a dependency DAG and drives it to completion.
//!
//! Everything else `cldctl` does — YAML/HCL schema parsing, the IaC plugin
//! transport, state-backend wire formats, secret providers, CI-file
//! generation, the CLI surface — is peripheral IO around this crate and
//! lives outside it (consumed here only through the traits in
//! [`plugin`], [`state_backend`], and [`secrets`]).

pub mod builder;
pub mod constants;
pub mod error;
pub mod events;
pub mod executor;
pub mod filter;
pub mod graph;
pub mod model;
pub mod node;
pub mod plugin;
pub mod resolver;
pub mod secrets;
pub mod state_backend;
pub mod value;
pub mod visualize;
pub mod when;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use graph::{Graph, Verdict};
pub use node::{Instance, Node, NodeState, NodeType};
