//! Host collaborator contract.
//!
//! The sandbox reaches the embedding bot process exclusively through the
//! [`HostNode`] trait object. Everything behind it — the chat client, the
//! persistence layer, the SQL engine — is an external collaborator; the
//! sandbox only defines how calls cross the boundary.

pub mod tree;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::Result;
use tree::TreeNode;

/// A value crossing the host/guest boundary. Always a deep copy.
pub type HostValue = serde_json::Value;

/// Future returned by I/O-bound host methods.
///
/// Sandboxes are single-threaded and `!Send`, so host futures are local.
pub type HostFuture<T> = LocalBoxFuture<'static, Result<T>>;

/// A host function scoped by namespace or log target.
///
/// The first argument is the active scope, injected by the bridge; the
/// guest never supplies it.
pub type ScopedFn = Rc<dyn Fn(String, Vec<HostValue>) -> HostFuture<HostValue>>;

/// An unscoped host function (command-function table entries).
pub type CommandFn = Rc<dyn Fn(Vec<HostValue>) -> HostFuture<HostValue>>;

/// A named table of scoped host functions.
///
/// The key list is advertised to the sandbox at creation time; the guest
/// API is built from it.
#[derive(Default, Clone)]
pub struct ScopedFnTable {
    fns: BTreeMap<String, ScopedFn>,
}

impl ScopedFnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: &str, f: F)
    where
        F: Fn(String, Vec<HostValue>) -> HostFuture<HostValue> + 'static,
    {
        self.fns.insert(name.to_string(), Rc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&ScopedFn> {
        self.fns.get(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.fns.keys().cloned().collect()
    }
}

/// A named table of command functions.
#[derive(Default, Clone)]
pub struct CommandFnTable {
    fns: BTreeMap<String, CommandFn>,
}

impl CommandFnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: &str, f: F)
    where
        F: Fn(Vec<HostValue>) -> HostFuture<HostValue> + 'static,
    {
        self.fns.insert(name.to_string(), Rc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&CommandFn> {
        self.fns.get(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.fns.keys().cloned().collect()
    }
}

/// Options attached to a raw send from the guest print pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct SendOpts {
    /// Destination override; `None` sends to the configured target.
    #[serde(default)]
    pub target: Option<String>,
    /// Message kind: `privmsg`, `notice`, or `action`.
    #[serde(default)]
    pub kind: Option<String>,
    /// Whether the host should log the line.
    #[serde(default = "default_log")]
    pub log: bool,
}

fn default_log() -> bool {
    true
}

impl Default for SendOpts {
    fn default() -> Self {
        Self {
            target: None,
            kind: None,
            log: true,
        }
    }
}

/// Print pipeline configuration the host resolves per target.
#[derive(Debug, Clone, Serialize)]
pub struct PrintCfg {
    /// Whether the guest may redirect output to other targets.
    #[serde(rename = "canBroadcast")]
    pub can_broadcast: bool,
    /// Whether colour codes are passed through.
    pub colors: bool,
    /// Maximum number of raw sends per configuration.
    #[serde(rename = "sendLimit")]
    pub send_limit: u32,
}

impl Default for PrintCfg {
    fn default() -> Self {
        Self {
            can_broadcast: false,
            colors: true,
            send_limit: 100,
        }
    }
}

/// The sandbox's view of the embedding bot process.
///
/// One node is bound to one sandbox for its lifetime. All methods are
/// invoked on the host's own execution context; I/O-bound methods return
/// futures the bridge awaits on behalf of the guest.
pub trait HostNode {
    /// The bot's current nickname.
    fn nick(&self) -> String;

    /// The command trigger prefix (e.g. `!`).
    fn trigger(&self) -> String;

    /// Public web address for this node, if any.
    fn web_address(&self) -> Option<String> {
        None
    }

    /// Process epoch, surfaced to guests as `IRC.epoch`.
    fn epoch(&self) -> DateTime<Utc>;

    /// Clear any queued outgoing messages and timers for this node.
    fn reset_buffer(&self);

    /// Send a raw line to the chat surface.
    fn send_raw(&self, text: &str, opts: &SendOpts);

    /// Issue a nickname change on the chat connection.
    fn send_nick(&self, name: &str);

    /// Look up a user; resolves with the protocol's whois data.
    fn whois(&self, name: &str) -> HostFuture<HostValue>;

    /// Check standing permission for an identity.
    fn auth(&self, identity: &str) -> HostFuture<()>;

    /// Perform the stronger privileged check for an identity.
    fn sudo(&self, identity: &str) -> HostFuture<()>;

    /// Namespaced persistent storage functions.
    fn store_fns(&self) -> ScopedFnTable;

    /// Target-scoped chat log query functions.
    fn log_fns(&self) -> ScopedFnTable;

    /// The shared command-function table.
    fn command_fns(&self) -> CommandFnTable;

    /// Open a SQL session scoped to the given namespace.
    fn sql(&self, namespace: &str) -> Rc<dyn SqlSession>;

    /// Resolve print pipeline settings for a target.
    fn print_cfg(&self, target: &str) -> PrintCfg;

    /// The privileged object graph reachable after sudo.
    fn sudo_tree(&self) -> Rc<RefCell<TreeNode>>;
}

/// A namespace-scoped SQL session.
///
/// The SQL engine itself lives behind this trait; the sandbox only
/// forwards queries and copies results back.
pub trait SqlSession {
    /// Run a query returning all rows.
    fn many(&self, sql: String, params: Vec<HostValue>) -> HostFuture<HostValue>;

    /// Run a query returning the first row, if any.
    fn one(&self, sql: String, params: Vec<HostValue>) -> HostFuture<HostValue>;

    /// Run a statement, returning change metadata.
    fn run(&self, sql: String, params: Vec<HostValue>) -> HostFuture<HostValue>;

    /// Execute a raw statement batch without parameters.
    fn exec(&self, sql: String) -> HostFuture<HostValue>;
}
