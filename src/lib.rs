//! lash — sandboxed Lua scripting runtime for IRC bots.
//!
//! Lets command/plugin authors run arbitrary script code against a
//! strictly capability-scoped view of the host: chat output, persistent
//! storage, SQL, bot identity control, and cross-plugin calls, while the
//! host stays protected from runaway, malicious, or buggy guest code.

pub use mlua;

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod sandbox;

pub use config::Config;
pub use error::{LashError, Result};
pub use host::tree::{TreeNode, TreeOp, TreeVerb};
pub use host::{
    CommandFnTable, HostFuture, HostNode, HostValue, PrintCfg, ScopedFnTable, SendOpts,
    SqlSession,
};
pub use sandbox::{
    EvalOptions, EvalType, OnPrint, PrintOpts, ResourceLimits, Sandbox, ScriptBundle, SetConfig,
};
