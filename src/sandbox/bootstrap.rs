//! Bootstrap and per-call configuration.
//!
//! The bootstrap chunk runs once at creation (see [`Sandbox::create`]);
//! the configure chunk is re-invocable and injects per-call context. Both
//! receive everything they need as chunk arguments — raw handles never
//! become globals.
//!
//! [`Sandbox::create`]: super::Sandbox::create

use std::rc::Rc;

use mlua::Function;
use serde_json::json;

use super::bridge::{from_guest, to_guest};
use super::manager::Sandbox;
use crate::host::{HostValue, SendOpts};
use crate::{LashError, Result};

pub(crate) const BOOTSTRAP: &str = include_str!("../../lua/bootstrap.lua");
pub(crate) const CONFIGURE: &str = include_str!("../../lua/configure.lua");

/// Print pipeline options for one configuration.
#[derive(Clone, Default)]
pub struct PrintOpts {
    /// Output destination; `None` leaves the pipeline uninstalled.
    pub target: Option<String>,
}

/// Observer invoked with every line the guest print pipeline emits.
pub type OnPrint = Rc<dyn Fn(HostValue)>;

/// Per-call configuration, applied by [`Sandbox::set_config`].
#[derive(Clone, Default)]
pub struct SetConfig {
    /// Print pipeline options.
    pub print: PrintOpts,
    /// Per-call `IRC` fields (message, command, trigger override, ...),
    /// merged over the node-derived base.
    pub irc: HostValue,
    /// Active namespace for storage and SQL access.
    pub namespace: Option<String>,
    /// Whether this evaluation may change the bot nickname.
    pub has_set_nick: bool,
    /// Print observer.
    pub on_print: Option<OnPrint>,
}

impl Sandbox {
    /// Apply per-call configuration. Re-invocable; must precede
    /// [`evaluate`](Sandbox::evaluate).
    ///
    /// Resets the command budget and re-locks sudo, merges the node's
    /// print settings for the target under the caller's options, and runs
    /// the configure chunk inside the sandbox.
    pub fn set_config(&self, config: SetConfig) -> Result<()> {
        let (lua, scripts, configure) = self.inner_parts()?;

        let target = config.print.target.clone();
        self.env().configure(
            target.clone(),
            config.namespace.clone(),
            config.has_set_nick,
            self.limits().command_budget,
        );

        let node = self.node();
        let print_cfg = target
            .as_deref()
            .map(|t| node.print_cfg(t))
            .unwrap_or_default();
        let mut print_value = serde_json::to_value(&print_cfg)
            .map_err(|e| LashError::Config(format!("bad print config: {}", e)))?;
        print_value["target"] = json!(target);

        let mut irc = json!({
            "trigger": node.trigger(),
            "nick": node.nick(),
            "webAddress": node.web_address().unwrap_or_else(|| "[unspecified]".to_string()),
            "epoch": node.epoch().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        });
        if let HostValue::Object(extra) = &config.irc {
            for (key, value) in extra {
                irc[key.as_str()] = value.clone();
            }
        }

        let vm_config = json!({
            "print": print_value,
            "IRC": irc,
            "namespace": config.namespace,
        });

        let config_value = to_guest(lua, &vm_config)?;
        let send_raw = self.make_send_raw(lua)?;
        let on_print = match &config.on_print {
            Some(observer) => mlua::Value::Function(self.make_on_print(lua, observer.clone())?),
            None => mlua::Value::Nil,
        };

        configure.call::<()>((config_value, scripts.clone(), send_raw, on_print))?;
        self.mark_configured();
        Ok(())
    }

    /// Fresh deadline-guarded `sendRaw` capability for the configure chunk.
    fn make_send_raw(&self, lua: &mlua::Lua) -> Result<Function> {
        let node = Rc::clone(self.node());
        let token = self.deadline().clone();
        let f = lua.create_function(
            move |lua, (text, opts): (String, Option<mlua::Value>)| {
                token.check().map_err(LashError::into_lua)?;
                let opts: SendOpts = match opts {
                    Some(value) => {
                        let raw = from_guest(lua, value)?;
                        serde_json::from_value(raw).unwrap_or_default()
                    }
                    None => SendOpts::default(),
                };
                node.send_raw(&text, &opts);
                Ok(())
            },
        )?;
        Ok(f)
    }

    fn make_on_print(&self, lua: &mlua::Lua, observer: OnPrint) -> Result<Function> {
        let token = self.deadline().clone();
        let f = lua.create_function(move |lua, value: mlua::Value| {
            token.check().map_err(LashError::into_lua)?;
            observer(from_guest(lua, value)?);
            Ok(())
        })?;
        Ok(f)
    }
}
