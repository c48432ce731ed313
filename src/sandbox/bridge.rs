//! Capability bridge.
//!
//! Builds the explicit capability table the bootstrap chunk consumes.
//! Every callable checks the deadline token before executing, and all
//! arguments and results cross the boundary as value copies.

use std::rc::Rc;

use mlua::{DeserializeOptions, Lua, LuaSerdeExt, SerializeOptions, Table};
use tracing::debug;

use super::env::{DeadlineToken, EnvState};
use super::fetch::{FetchKind, FetchOpts, Fetcher};
use crate::host::tree::{self, TreeOp};
use crate::host::{HostNode, HostValue};
use crate::{LashError, Result};

/// Shared context captured by every capability closure.
pub(crate) struct BridgeCtx {
    pub node: Rc<dyn HostNode>,
    pub env: Rc<EnvState>,
    pub token: DeadlineToken,
    pub fetcher: Rc<Fetcher>,
    pub alloc_threshold: u64,
    pub word_list_path: String,
}

/// Copy a host value into the guest.
pub(crate) fn to_guest(lua: &Lua, value: &HostValue) -> mlua::Result<mlua::Value> {
    lua.to_value_with(
        value,
        SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false),
    )
}

/// Copy a guest value out to the host. Functions and other
/// non-transferable values degrade to null.
pub(crate) fn from_guest(lua: &Lua, value: mlua::Value) -> mlua::Result<HostValue> {
    lua.from_value_with(
        value,
        DeserializeOptions::new()
            .deny_unsupported_types(false)
            .deny_recursive_tables(false),
    )
}

/// Interpret a guest argument pack as a positional argument list.
///
/// An empty Lua table serializes as an empty object, so both shapes of
/// emptiness mean "no arguments".
fn value_to_args(value: HostValue) -> Vec<HostValue> {
    match value {
        HostValue::Array(items) => items,
        HostValue::Null => Vec::new(),
        HostValue::Object(map) if map.is_empty() => Vec::new(),
        other => vec![other],
    }
}

/// Build the capability table for one sandbox.
///
/// The table is handed to the bootstrap chunk as an argument and never
/// stored anywhere the guest can reach.
pub(crate) fn build_capabilities(lua: &Lua, ctx: Rc<BridgeCtx>) -> Result<Table> {
    let caps = lua.create_table()?;

    // advertised key lists
    caps.set("store_keys", ctx.node.store_fns().keys().join("|"))?;
    caps.set("log_keys", ctx.node.log_fns().keys().join("|"))?;
    caps.set("command_keys", ctx.node.command_fns().keys().join("|"))?;

    // identity

    let c = ctx.clone();
    caps.set(
        "reset_buffer",
        lua.create_function(move |_, ()| {
            c.token.check().map_err(LashError::into_lua)?;
            c.node.reset_buffer();
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "set_nick",
        lua.create_function(move |_, name: String| {
            c.token.check().map_err(LashError::into_lua)?;
            if !c.env.has_set_nick() {
                return Ok(false);
            }
            let clean: String = name.chars().filter(|ch| ch.is_ascii_alphanumeric()).collect();
            if clean.is_empty() {
                return Ok(false);
            }
            c.node.send_nick(&clean);
            Ok(true)
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "whois",
        lua.create_async_function(move |lua, name: String| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                let data = c.node.whois(&name).await.map_err(LashError::into_lua)?;
                to_guest(&lua, &data)
            }
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "ping",
        lua.create_async_function(move |_, host: String| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                ping(&host).await.map_err(LashError::into_lua)
            }
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "word_list",
        lua.create_async_function(move |_, ()| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                tokio::fs::read_to_string(&c.word_list_path)
                    .await
                    .map_err(|_| {
                        LashError::Io(format!("no such file: {}", c.word_list_path)).into_lua()
                    })
            }
        })?,
    )?;

    // networking

    let c = ctx.clone();
    caps.set(
        "fetch",
        lua.create_async_function(
            move |lua, (url, kind, opts): (String, Option<String>, Option<mlua::Value>)| {
                let c = c.clone();
                async move {
                    c.token.check().map_err(LashError::into_lua)?;
                    let kind = match kind.as_deref() {
                        None | Some("text") => FetchKind::Text,
                        Some("json") => FetchKind::Json,
                        Some(other) => {
                            return Err(LashError::Fetch(format!("unknown fetch kind: {}", other))
                                .into_lua())
                        }
                    };
                    let opts: FetchOpts = match opts {
                        Some(value) => {
                            let raw = from_guest(&lua, value)?;
                            serde_json::from_value(raw).map_err(|e| {
                                LashError::Fetch(format!("bad fetch options: {}", e)).into_lua()
                            })?
                        }
                        None => FetchOpts::default(),
                    };
                    let body = c
                        .fetcher
                        .fetch(&url, kind, opts)
                        .await
                        .map_err(LashError::into_lua)?;
                    to_guest(&lua, &body)
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    caps.set(
        "resolve_module",
        lua.create_async_function(move |_, name: String| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                c.fetcher
                    .resolve_module(&name)
                    .await
                    .map_err(LashError::into_lua)
            }
        })?,
    )?;

    // time

    let c = ctx.clone();
    caps.set(
        "sleep",
        lua.create_async_function(move |_, ms: f64| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                let mut wait = std::time::Duration::from_millis(ms.max(0.0) as u64);
                // never sleep past the sandbox deadline
                if let Some(remaining) = c.token.remaining() {
                    wait = wait.min(remaining);
                }
                tokio::time::sleep(wait).await;
                Ok(())
            }
        })?,
    )?;

    // authentication

    let c = ctx.clone();
    caps.set(
        "auth",
        lua.create_async_function(move |_, (identity, is_sudo): (Option<String>, Option<bool>)| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                let identity = identity
                    .ok_or_else(|| LashError::Auth("no identity".to_string()).into_lua())?;
                let is_sudo = is_sudo.unwrap_or(false);
                let result = if is_sudo {
                    c.node.sudo(&identity).await
                } else {
                    c.node.auth(&identity).await
                };
                result.map_err(LashError::into_lua)?;
                if is_sudo {
                    debug!(identity = %identity, "sudo granted");
                    c.env.unlock_sudo();
                }
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "set_namespace",
        lua.create_function(move |_, namespace: Option<String>| {
            c.token.check().map_err(LashError::into_lua)?;
            if !c.env.sudo_unlocked() {
                return Err(LashError::Auth("sudo required".to_string()).into_lua());
            }
            c.env.set_namespace(namespace);
            Ok(())
        })?,
    )?;

    // privileged tree

    let c = ctx.clone();
    caps.set(
        "sudo_proxy",
        lua.create_async_function(move |lua, op: mlua::Value| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                if !c.env.sudo_unlocked() {
                    return Err(LashError::Auth("sudo required".to_string()).into_lua());
                }
                let raw = from_guest(&lua, op)?;
                let op: TreeOp = serde_json::from_value(raw).map_err(|e| {
                    LashError::Data(format!("malformed sudo message: {}", e)).into_lua()
                })?;
                let root = c.node.sudo_tree();
                let out = tree::walk(&root, op).await.map_err(LashError::into_lua)?;
                to_guest(&lua, &out)
            }
        })?,
    )?;

    // data access

    let c = ctx.clone();
    caps.set(
        "command_fns",
        lua.create_async_function(move |lua, (name, args): (String, mlua::Value)| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                c.env.take_command_call().map_err(LashError::into_lua)?;
                let f = c
                    .node
                    .command_fns()
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| LashError::NotFound(name.clone()).into_lua())?;
                let args = value_to_args(from_guest(&lua, args)?);
                let out = f(args).await.map_err(LashError::into_lua)?;
                to_guest(&lua, &out)
            }
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "store_fns",
        lua.create_async_function(move |lua, (name, args): (String, mlua::Value)| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                // no active namespace: deliberate silent no-op
                let Some(namespace) = c.env.namespace() else {
                    return Ok(mlua::Value::Nil);
                };
                let f = c
                    .node
                    .store_fns()
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| LashError::NotFound(name.clone()).into_lua())?;
                let args = value_to_args(from_guest(&lua, args)?);
                let out = f(namespace, args).await.map_err(LashError::into_lua)?;
                to_guest(&lua, &out)
            }
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "log_fns",
        lua.create_async_function(move |lua, (name, args): (String, mlua::Value)| {
            let c = c.clone();
            async move {
                c.token.check().map_err(LashError::into_lua)?;
                let Some(target) = c.env.target() else {
                    return Ok(mlua::Value::Nil);
                };
                let f = c
                    .node
                    .log_fns()
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| LashError::NotFound(name.clone()).into_lua())?;
                let args = value_to_args(from_guest(&lua, args)?);
                let out = f(target, args).await.map_err(LashError::into_lua)?;
                to_guest(&lua, &out)
            }
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "sql_fns",
        lua.create_async_function(
            move |lua, (verb, sql, params): (String, String, mlua::Value)| {
                let c = c.clone();
                async move {
                    c.token.check().map_err(LashError::into_lua)?;
                    let Some(namespace) = c.env.namespace() else {
                        return Ok(mlua::Value::Nil);
                    };
                    let params = value_to_args(from_guest(&lua, params)?);
                    let session = c.node.sql(&namespace);
                    let out = match verb.as_str() {
                        "many" => session.many(sql, params).await,
                        "one" => session.one(sql, params).await,
                        "run" => session.run(sql, params).await,
                        "exec" => session.exec(sql).await,
                        other => Err(LashError::Data(format!("unknown SQL verb: {}", other))),
                    }
                    .map_err(LashError::into_lua)?;
                    to_guest(&lua, &out)
                }
            },
        )?,
    )?;

    // module machinery

    let c = ctx.clone();
    caps.set(
        "compile",
        lua.create_function(move |lua, (source, name): (String, String)| {
            c.token.check().map_err(LashError::into_lua)?;
            // isolated scope: a fresh environment that reads through to
            // the sandbox globals but keeps its own writes
            let env = lua.create_table()?;
            let mt = lua.create_table()?;
            mt.set("__index", lua.globals())?;
            env.set_metatable(Some(mt));
            let func = lua
                .load(source)
                .set_name(name)
                .set_environment(env.clone())
                .into_function()?;
            Ok((func, env))
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "raise_not_found",
        lua.create_function(move |_, name: String| -> mlua::Result<()> {
            c.token.check().map_err(LashError::into_lua)?;
            Err(LashError::NotFound(name).into_lua())
        })?,
    )?;

    // guards and helpers

    let c = ctx.clone();
    caps.set(
        "alloc_guard",
        lua.create_function(move |_, count: f64| {
            c.token.check().map_err(LashError::into_lua)?;
            if count > c.alloc_threshold as f64 {
                return Err(LashError::OutOfMemory(format!(
                    "allocation of {} elements exceeds the {} limit",
                    count, c.alloc_threshold
                ))
                .into_lua());
            }
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    caps.set(
        "parse_html",
        lua.create_function(move |lua, html: String| {
            c.token.check().map_err(LashError::into_lua)?;
            to_guest(lua, &super::fetch::parse_html(&html))
        })?,
    )?;

    Ok(caps)
}

/// Ping a host once via the system `ping` binary.
async fn ping(host: &str) -> Result<String> {
    let clean: String = host
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-'))
        .collect();
    if clean.is_empty() {
        return Err(LashError::Fetch("invalid ping host".to_string()));
    }

    let output = tokio::process::Command::new("ping")
        .args(["-c", "1", "-W", "2", &clean])
        .output()
        .await
        .map_err(|e| LashError::Fetch(format!("ping failed: {}", e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(LashError::Fetch(format!(
            "ping failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
