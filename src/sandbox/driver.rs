//! Evaluation driver.
//!
//! Runs guest text under a wall-clock deadline independent of the
//! sandbox-level budget: expiry here raises a timeout to the caller but
//! leaves the sandbox token untouched.

use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, Table, VmState};

use super::manager::Sandbox;
use crate::{LashError, Result};

/// Default interactive truncation budget, in characters.
const DEFAULT_TRUNCATE: i64 = 390;

/// How guest text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalType {
    /// Execute the text as-is in the sandbox globals.
    #[default]
    Plain,
    /// Evaluate as an expression and render the result through the guest
    /// inspector into the print pipeline.
    InteractivePrint,
    /// Run as a freestanding function body; early `return` is allowed
    /// and locals do not leak into globals.
    WrappedBody,
}

/// Options for one evaluation.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Wall-clock deadline for this evaluation.
    pub timeout: Duration,
    /// Interpretation mode.
    pub eval_type: EvalType,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            eval_type: EvalType::Plain,
        }
    }
}

impl Sandbox {
    /// Run guest text under a deadline.
    ///
    /// [`set_config`](Sandbox::set_config) must have been applied first.
    /// CPU-bound guest loops are interrupted by an instruction hook;
    /// suspended awaits by the outer timer. Uncaught guest errors
    /// propagate to the caller.
    pub async fn evaluate(&self, script: &str, opts: EvalOptions) -> Result<()> {
        let (lua, _, _) = self.inner_parts()?;
        if !self.is_configured() {
            return Err(LashError::Script(
                "set_config must precede evaluate".to_string(),
            ));
        }

        self.env()
            .set_eval_deadline(Some(Instant::now() + opts.timeout));

        let token = self.deadline().clone();
        let env = std::rc::Rc::clone(self.env());
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(10_000),
            move |_lua, _debug| {
                if token.is_expired() || env.eval_deadline_passed() {
                    Err(LashError::Timeout.into_lua())
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        let outcome = tokio::time::timeout(opts.timeout, self.run(lua, script, opts.eval_type)).await;

        let _ = lua.remove_hook();
        self.env().set_eval_deadline(None);

        match outcome {
            Err(_elapsed) => Err(LashError::Timeout),
            Ok(result) => result,
        }
    }

    async fn run(&self, lua: &Lua, script: &str, eval_type: EvalType) -> Result<()> {
        match eval_type {
            EvalType::Plain => {
                lua.load(script).set_name("eval").exec_async().await?;
                Ok(())
            }
            EvalType::WrappedBody => {
                let wrapped = format!("return (function()\n{}\nend)()", script);
                lua.load(&wrapped).set_name("eval").exec_async().await?;
                Ok(())
            }
            EvalType::InteractivePrint => self.run_interactive(lua, script).await,
        }
    }

    /// Expression-first evaluation with inspector rendering.
    async fn run_interactive(&self, lua: &Lua, script: &str) -> Result<()> {
        // REPL convention: try the text as an expression, fall back to
        // statements when it does not compile that way.
        let expression = format!("return {}", script);
        let chunk = match lua.load(&expression).set_name("eval").into_function() {
            Ok(func) => func,
            Err(_) => lua.load(script).set_name("eval").into_function()?,
        };

        let value: mlua::Value = chunk.call_async(()).await?;

        // await deferred results before rendering
        let mut resolved = None;
        if let mlua::Value::Table(table) = &value {
            let is_promise: Option<bool> = table.get("__promise")?;
            if is_promise.unwrap_or(false) {
                let await_fn: Option<Function> = table.get("await")?;
                if let Some(await_fn) = await_fn {
                    resolved = Some(await_fn.call_async::<mlua::Value>(()).await?);
                }
            }
        }

        let globals = lua.globals();
        let irc: Table = globals.get("IRC")?;

        // caller-supplied depth/truncation travel in IRC.command.params
        let mut depth = 0i64;
        let mut truncate = DEFAULT_TRUNCATE;
        if let Ok(Some(command)) = irc.get::<Option<Table>>("command") {
            if let Ok(Some(params)) = command.get::<Option<Table>>("params") {
                if let Ok(Some(d)) = params.get::<Option<i64>>(1) {
                    depth = d;
                }
                if let Ok(Some(t)) = params.get::<Option<i64>>(2) {
                    truncate = t;
                }
            }
        }

        let inspect: Function = irc.get("inspect")?;
        let inspect_opts = lua.create_table()?;
        inspect_opts.set("depth", depth)?;
        inspect_opts.set("truncate", truncate)?;
        if let Some(resolved) = resolved {
            inspect_opts.set("promise", resolved)?;
        }
        let rendered: String = inspect.call((value, inspect_opts))?;

        let print_value: mlua::Value = globals.get("print")?;
        let raw: Function = match &print_value {
            mlua::Value::Table(pipeline) => pipeline.get("raw")?,
            _ => {
                return Err(LashError::Script(
                    "no print target configured".to_string(),
                ))
            }
        };
        raw.call_async::<()>(rendered).await?;
        Ok(())
    }
}
