//! The `fanout` binary

pub mod cli;
pub mod startup;
