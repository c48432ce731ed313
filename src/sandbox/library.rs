//! Shared script library bundle.
//!
//! The bundle is a fixed, ordered set of `(name, source)` pairs loaded
//! once per process. Each sandbox evaluates its own fresh copy, so no
//! state is shared or tamperable across sandboxes.

use std::sync::OnceLock;

use mlua::{Lua, Table};

use crate::Result;

const BUNDLE_SOURCES: &[(&str, &str)] = &[
    ("colors", include_str!("../../lua/lib/colors.lua")),
    ("inspect", include_str!("../../lua/lib/inspect.lua")),
    ("parse-command", include_str!("../../lua/lib/parse-command.lua")),
    ("parse-time", include_str!("../../lua/lib/parse-time.lua")),
    ("fetch", include_str!("../../lua/lib/fetch.lua")),
    ("print", include_str!("../../lua/lib/print.lua")),
];

/// The process-wide script bundle.
pub struct ScriptBundle {
    entries: Vec<(String, String)>,
}

impl ScriptBundle {
    /// The built-in bundle, assembled once per process.
    pub fn builtin() -> &'static ScriptBundle {
        static BUNDLE: OnceLock<ScriptBundle> = OnceLock::new();
        BUNDLE.get_or_init(|| ScriptBundle {
            entries: BUNDLE_SOURCES
                .iter()
                .map(|(name, source)| (name.to_string(), source.to_string()))
                .collect(),
        })
    }

    /// Build a bundle from explicit `(name, source)` pairs.
    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Names in load order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Evaluate every library into the given sandbox.
    ///
    /// Each chunk follows the module-wrapper convention: it returns its
    /// export value, collected into a `scripts` table keyed by name.
    pub fn install(&self, lua: &Lua) -> Result<Table> {
        let scripts = lua.create_table()?;
        for (name, source) in &self.entries {
            let exports: mlua::Value = lua
                .load(source.as_str())
                .set_name(format!("@lib/{}", name))
                .eval()?;
            scripts.set(name.as_str(), exports)?;
        }
        Ok(scripts)
    }
}
