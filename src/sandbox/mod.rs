//! Sandboxed script execution.
//!
//! A [`Sandbox`] is an isolated Lua context bound to one host node. The
//! capability bridge is the only path from guest code back to the host:
//! every callable is deadline-guarded and everything crosses by value
//! copy. The bootstrap chunk assembles the guest-facing API from the
//! capability table, which never becomes reachable from guest code.

pub mod bootstrap;
pub(crate) mod bridge;
pub mod driver;
pub mod env;
pub mod fetch;
pub mod library;
pub mod manager;

pub use bootstrap::{OnPrint, PrintOpts, SetConfig};
pub use driver::{EvalOptions, EvalType};
pub use env::{DeadlineToken, EnvState};
pub use fetch::{FetchKind, FetchOpts, Fetcher};
pub use library::ScriptBundle;
pub use manager::{ResourceLimits, Sandbox};
