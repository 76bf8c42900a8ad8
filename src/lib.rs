//! Expose a host application's commands to remote peers.
//!
//! A [`manager::RemoteCommandManager`] wraps the host and owns the catalog
//! builder. Transports in [`sources`] decode envelopes from [`protocol`] and
//! hand them to a [`dispatcher::Dispatcher`], which replies through the same
//! transport. The [`hub`] and [`api`] modules are the server the socket
//! transport connects to.

#[cfg(feature = "server")]
pub mod api;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod hub;
pub mod manager;
pub mod paths;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod sources;
pub mod util;
