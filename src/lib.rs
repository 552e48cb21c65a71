//! ado-export: command line front end and Azure DevOps REST client.
//!
//! The export logic itself lives in `ado-export-core`; this crate wires it to the network,
//! the file system and the terminal.

pub mod cli;
pub mod client;
pub mod load_config;
pub mod logging;
