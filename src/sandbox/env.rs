//! Per-sandbox environment state and the deadline token.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{LashError, Result};

/// One-way expiry signal for a sandbox's time budget.
///
/// Checked before every cross-boundary dispatch. The flag is monotonic:
/// once set it is never cleared. The timer task holds only the `Arc`, so
/// expiry can fire from another thread while the sandbox itself stays
/// single-threaded.
#[derive(Clone)]
pub struct DeadlineToken {
    expired: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl DeadlineToken {
    /// A token that expires at `deadline`, or never for `None`.
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            expired: Arc::new(AtomicBool::new(false)),
            deadline,
        }
    }

    /// Mark the budget as expired.
    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    /// Whether the budget has expired.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Fail with [`LashError::Timeout`] if the budget has expired.
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(LashError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Time left until the sandbox deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Shared handle for the timer task.
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.expired)
    }
}

/// Mutable per-sandbox state.
///
/// `target`, `namespace`, and `has_set_nick` are set at configuration and
/// immutable until the next configuration (the sudo namespace override is
/// the one exception). The command budget and sudo unlock are per
/// evaluation, reset by each configuration.
#[derive(Default)]
pub struct EnvState {
    target: RefCell<Option<String>>,
    namespace: RefCell<Option<String>>,
    has_set_nick: Cell<bool>,
    sudo_unlocked: Cell<bool>,
    command_budget: Cell<i64>,
    eval_deadline: Cell<Option<Instant>>,
}

impl EnvState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a new configuration: set scope fields, re-lock sudo, refill
    /// the command budget.
    pub fn configure(
        &self,
        target: Option<String>,
        namespace: Option<String>,
        has_set_nick: bool,
        command_budget: i64,
    ) {
        *self.target.borrow_mut() = target;
        *self.namespace.borrow_mut() = namespace;
        self.has_set_nick.set(has_set_nick);
        self.sudo_unlocked.set(false);
        self.command_budget.set(command_budget);
    }

    pub fn target(&self) -> Option<String> {
        self.target.borrow().clone()
    }

    pub fn namespace(&self) -> Option<String> {
        self.namespace.borrow().clone()
    }

    /// Namespace override, reachable only through the sudo result.
    pub fn set_namespace(&self, namespace: Option<String>) {
        *self.namespace.borrow_mut() = namespace;
    }

    pub fn has_set_nick(&self) -> bool {
        self.has_set_nick.get()
    }

    pub fn unlock_sudo(&self) {
        self.sudo_unlocked.set(true);
    }

    pub fn sudo_unlocked(&self) -> bool {
        self.sudo_unlocked.get()
    }

    /// Take one unit of command budget.
    ///
    /// The budget is exactly N calls: the (N+1)-th fails, and a budget of
    /// zero or less fails on the first call.
    pub fn take_command_call(&self) -> Result<()> {
        let left = self.command_budget.get();
        if left <= 0 {
            return Err(LashError::Limit("commandFns limit reached".to_string()));
        }
        self.command_budget.set(left - 1);
        Ok(())
    }

    /// Arm the per-evaluation deadline.
    pub fn set_eval_deadline(&self, deadline: Option<Instant>) {
        self.eval_deadline.set(deadline);
    }

    /// Whether the per-evaluation deadline has passed.
    pub fn eval_deadline_passed(&self) -> bool {
        self.eval_deadline
            .get()
            .is_some_and(|d| Instant::now() >= d)
    }
}
