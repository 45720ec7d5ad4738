//! Release Relay application assembly, shared by the `relay` CLI and `relayd`.

pub mod app;

pub use app::{AppOptions, RelayApp};
