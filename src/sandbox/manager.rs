//! Sandbox lifecycle management.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use mlua::{Function, Lua, Table, Value};
use tracing::debug;

use super::bridge::{self, BridgeCtx};
use super::env::{DeadlineToken, EnvState};
use super::fetch::Fetcher;
use super::library::ScriptBundle;
use crate::config::{Config, SandboxConfig};
use crate::host::HostNode;
use crate::{LashError, Result};

/// Resource limits for one sandbox.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum memory in bytes (0 = unlimited).
    pub max_memory: usize,
    /// Sandbox lifetime deadline (zero = no deadline).
    pub max_timeout: Duration,
    /// Command-function call budget per evaluation.
    pub command_budget: i64,
    /// Bulk-allocation element threshold for the fail-fast guard.
    pub alloc_threshold: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory: 128 * 1024 * 1024,
            max_timeout: Duration::from_secs(60),
            command_budget: 20,
            alloc_threshold: 20_000_000,
        }
    }
}

impl ResourceLimits {
    /// Derive limits from the `[sandbox]` configuration section.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            max_memory: config.memory_limit_mb * 1024 * 1024,
            max_timeout: Duration::from_millis(config.max_timeout_ms),
            command_budget: config.command_budget,
            alloc_threshold: config.alloc_threshold,
        }
    }
}

/// Everything released on disposal.
struct SandboxInner {
    lua: Lua,
    scripts: Table,
    configure: Function,
}

/// An isolated execution context bound to one host node.
///
/// Single-threaded and `!Send`. Dropping the sandbox disposes it; calling
/// [`Sandbox::dispose`] early is always safe, including more than once.
pub struct Sandbox {
    inner: Option<SandboxInner>,
    node: Rc<dyn HostNode>,
    env: Rc<EnvState>,
    token: DeadlineToken,
    limits: ResourceLimits,
    timer: Option<tokio::task::JoinHandle<()>>,
    configured: Cell<bool>,
}

impl Sandbox {
    /// Create a sandbox for the given host node.
    ///
    /// Allocates a capped-memory Lua state, builds the capability table,
    /// installs the script bundle, and runs the bootstrap chunk. When the
    /// limits carry a deadline, a detached timer marks the token expired
    /// at expiry — in-flight calls observe it and fail cleanly; the
    /// sandbox itself is not disposed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(node: Rc<dyn HostNode>, limits: ResourceLimits, config: &Config) -> Result<Self> {
        let lua = Lua::new();
        apply_sandbox(&lua)?;

        if limits.max_memory > 0 {
            lua.set_memory_limit(limits.max_memory)
                .map_err(|e| LashError::Script(format!("failed to set memory limit: {}", e)))?;
        }

        let deadline_at =
            (!limits.max_timeout.is_zero()).then(|| Instant::now() + limits.max_timeout);
        let token = DeadlineToken::new(deadline_at);

        let timer = deadline_at.map(|_| {
            let flag = token.flag();
            let wait = limits.max_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                flag.store(true, Ordering::SeqCst);
                debug!("sandbox deadline expired");
            })
        });

        let env = Rc::new(EnvState::new());
        let fetcher = Rc::new(Fetcher::new(&config.fetch)?);
        let ctx = Rc::new(BridgeCtx {
            node: Rc::clone(&node),
            env: Rc::clone(&env),
            token: token.clone(),
            fetcher,
            alloc_threshold: limits.alloc_threshold,
            word_list_path: config.sandbox.word_list_path.clone(),
        });

        let caps = bridge::build_capabilities(&lua, ctx)?;
        let scripts = ScriptBundle::builtin().install(&lua)?;

        // The capability table enters the bootstrap chunk as an argument
        // and never lands in globals.
        lua.load(super::bootstrap::BOOTSTRAP)
            .set_name("bootstrap")
            .call::<()>((caps, scripts.clone()))?;

        let configure = lua
            .load(super::bootstrap::CONFIGURE)
            .set_name("configure")
            .into_function()?;

        debug!(max_memory = limits.max_memory, "sandbox created");

        Ok(Self {
            inner: Some(SandboxInner {
                lua,
                scripts,
                configure,
            }),
            node,
            env,
            token,
            limits,
            timer,
            configured: Cell::new(false),
        })
    }

    /// Release the execution context. Idempotent; never raises.
    pub fn dispose(&mut self) {
        if let Some(inner) = self.inner.take() {
            drop(inner);
            debug!("sandbox disposed");
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Whether the underlying context has been released.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_none()
    }

    /// The sandbox's deadline token.
    pub fn deadline(&self) -> &DeadlineToken {
        &self.token
    }

    /// The Lua state, while not disposed.
    pub fn lua(&self) -> Option<&Lua> {
        self.inner.as_ref().map(|inner| &inner.lua)
    }

    /// The configured resource limits.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub(crate) fn inner_parts(&self) -> Result<(&Lua, &Table, &Function)> {
        self.inner
            .as_ref()
            .map(|inner| (&inner.lua, &inner.scripts, &inner.configure))
            .ok_or_else(|| LashError::Script("sandbox disposed".to_string()))
    }

    pub(crate) fn node(&self) -> &Rc<dyn HostNode> {
        &self.node
    }

    pub(crate) fn env(&self) -> &Rc<EnvState> {
        &self.env
    }

    pub(crate) fn mark_configured(&self) {
        self.configured.set(true);
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.configured.get()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Remove stdlib entry points guest code must not reach.
fn apply_sandbox(lua: &Lua) -> Result<()> {
    let globals = lua.globals();
    for name in [
        "os",
        "io",
        "loadfile",
        "dofile",
        "load",
        "require",
        "package",
        "debug",
        "collectgarbage",
    ] {
        globals
            .set(name, Value::Nil)
            .map_err(|e| LashError::Script(format!("failed to disable {}: {}", name, e)))?;
    }
    Ok(())
}
