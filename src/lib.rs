//! Host-side core of the Octane CI plugin contract.
//!
//! A CI host plugs in through the collaborator traits in [`host`]; the
//! [`Dispatcher`] then serves every plugin operation on top of them.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod models;
pub mod output;
pub mod providers;
pub mod runner;
pub mod services;
pub mod snapshot;
pub mod translator;

pub use dispatcher::Dispatcher;
pub use error::{BridgeError, HostError, Result};
pub use services::CiPluginServices;
