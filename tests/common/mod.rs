//! Shared test fixtures: a mock host node and sandbox builders.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use lash::host::tree::TreeNode;
use lash::{
    CommandFnTable, Config, HostFuture, HostNode, HostValue, PrintCfg, PrintOpts, ResourceLimits,
    Sandbox, ScopedFnTable, SendOpts, SetConfig, SqlSession,
};

/// Identity with standing permission.
pub const FRIEND: &str = "friend!user@host";
/// Identity with sudo rights.
pub const ROOT: &str = "root!user@host";

/// Recording mock of the host collaborator contract.
pub struct MockNode {
    pub sent: RefCell<Vec<(String, SendOpts)>>,
    pub nick_changes: RefCell<Vec<String>>,
    pub reset_count: Cell<u32>,
    pub store_calls: Rc<RefCell<Vec<(String, String, Vec<HostValue>)>>>,
    pub log_calls: Rc<RefCell<Vec<(String, String, Vec<HostValue>)>>>,
    pub command_calls: Rc<RefCell<Vec<(String, Vec<HostValue>)>>>,
    pub sql_calls: Rc<RefCell<Vec<(String, String, Vec<HostValue>)>>>,
    pub tree: Rc<RefCell<TreeNode>>,
    pub tree_requests: Cell<u32>,
    pub print_cfg: RefCell<PrintCfg>,
}

impl MockNode {
    pub fn new() -> Rc<Self> {
        let tree = TreeNode::from_entries([(
            "a".to_string(),
            TreeNode::from_entries([
                ("b".to_string(), TreeNode::Value(json!(42))),
                (
                    "shout".to_string(),
                    TreeNode::func(|args| {
                        Box::pin(async move { Ok(json!(format!("heard {} args", args.len()))) })
                    }),
                ),
            ]),
        )]);

        Rc::new(Self {
            sent: RefCell::new(Vec::new()),
            nick_changes: RefCell::new(Vec::new()),
            reset_count: Cell::new(0),
            store_calls: Rc::new(RefCell::new(Vec::new())),
            log_calls: Rc::new(RefCell::new(Vec::new())),
            command_calls: Rc::new(RefCell::new(Vec::new())),
            sql_calls: Rc::new(RefCell::new(Vec::new())),
            tree: Rc::new(RefCell::new(tree)),
            tree_requests: Cell::new(0),
            print_cfg: RefCell::new(PrintCfg::default()),
        })
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|(text, _)| text.clone()).collect()
    }
}

struct MockSql {
    namespace: String,
    calls: Rc<RefCell<Vec<(String, String, Vec<HostValue>)>>>,
}

impl MockSql {
    fn record(&self, verb: &str, sql: String, params: Vec<HostValue>) -> HostFuture<HostValue> {
        self.calls
            .borrow_mut()
            .push((verb.to_string(), sql, params));
        let namespace = self.namespace.clone();
        Box::pin(async move { Ok(json!({ "namespace": namespace, "n": 1 })) })
    }
}

impl SqlSession for MockSql {
    fn many(&self, sql: String, params: Vec<HostValue>) -> HostFuture<HostValue> {
        self.record("many", sql, params)
    }

    fn one(&self, sql: String, params: Vec<HostValue>) -> HostFuture<HostValue> {
        self.record("one", sql, params)
    }

    fn run(&self, sql: String, params: Vec<HostValue>) -> HostFuture<HostValue> {
        self.record("run", sql, params)
    }

    fn exec(&self, sql: String) -> HostFuture<HostValue> {
        self.record("exec", sql, Vec::new())
    }
}

impl HostNode for MockNode {
    fn nick(&self) -> String {
        "mockbot".to_string()
    }

    fn trigger(&self) -> String {
        "!".to_string()
    }

    fn epoch(&self) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    fn reset_buffer(&self) {
        self.reset_count.set(self.reset_count.get() + 1);
    }

    fn send_raw(&self, text: &str, opts: &SendOpts) {
        self.sent.borrow_mut().push((text.to_string(), opts.clone()));
    }

    fn send_nick(&self, name: &str) {
        self.nick_changes.borrow_mut().push(name.to_string());
    }

    fn whois(&self, name: &str) -> HostFuture<HostValue> {
        let name = name.to_string();
        Box::pin(async move { Ok(json!({ "nick": name, "user": "mock" })) })
    }

    fn auth(&self, identity: &str) -> HostFuture<()> {
        let ok = identity == FRIEND || identity == ROOT;
        Box::pin(async move {
            if ok {
                Ok(())
            } else {
                Err(lash::LashError::Auth("not on the access list".to_string()))
            }
        })
    }

    fn sudo(&self, identity: &str) -> HostFuture<()> {
        let ok = identity == ROOT;
        Box::pin(async move {
            if ok {
                Ok(())
            } else {
                Err(lash::LashError::Auth("sudo denied".to_string()))
            }
        })
    }

    fn store_fns(&self) -> ScopedFnTable {
        let mut table = ScopedFnTable::new();
        for name in ["get", "set"] {
            let calls = Rc::clone(&self.store_calls);
            table.insert(name, move |namespace, args| {
                let calls = Rc::clone(&calls);
                let name = name.to_string();
                Box::pin(async move {
                    calls.borrow_mut().push((name, namespace, args));
                    Ok(json!("stored"))
                })
            });
        }
        table
    }

    fn log_fns(&self) -> ScopedFnTable {
        let mut table = ScopedFnTable::new();
        let calls = Rc::clone(&self.log_calls);
        table.insert("recent", move |target, args| {
            let calls = Rc::clone(&calls);
            Box::pin(async move {
                calls.borrow_mut().push(("recent".to_string(), target, args));
                Ok(json!([{ "text": "older line" }]))
            })
        });
        table
    }

    fn command_fns(&self) -> CommandFnTable {
        let mut table = CommandFnTable::new();

        let calls = Rc::clone(&self.command_calls);
        table.insert("echo", move |args| {
            let calls = Rc::clone(&calls);
            Box::pin(async move {
                calls.borrow_mut().push(("echo".to_string(), args.clone()));
                Ok(json!(args))
            })
        });

        let calls = Rc::clone(&self.command_calls);
        table.insert("get", move |args| {
            let calls = Rc::clone(&calls);
            Box::pin(async move {
                calls.borrow_mut().push(("get".to_string(), args.clone()));
                let name = args.first().and_then(|v| v.as_str()).unwrap_or_default();
                if name == "greet" {
                    Ok(json!({
                        "command": "module.exports = { hello = function() return \"hi from greet\" end }",
                    }))
                } else {
                    Ok(HostValue::Null)
                }
            })
        });

        table
    }

    fn sql(&self, namespace: &str) -> Rc<dyn SqlSession> {
        Rc::new(MockSql {
            namespace: namespace.to_string(),
            calls: Rc::clone(&self.sql_calls),
        })
    }

    fn print_cfg(&self, _target: &str) -> PrintCfg {
        self.print_cfg.borrow().clone()
    }

    fn sudo_tree(&self) -> Rc<RefCell<TreeNode>> {
        self.tree_requests.set(self.tree_requests.get() + 1);
        Rc::clone(&self.tree)
    }
}

/// Limits without a lifetime deadline; tests arm deadlines explicitly.
pub fn no_deadline_limits() -> ResourceLimits {
    ResourceLimits {
        max_timeout: Duration::ZERO,
        ..ResourceLimits::default()
    }
}

pub fn make_sandbox(node: &Rc<MockNode>) -> Sandbox {
    make_sandbox_with(node, no_deadline_limits())
}

pub fn make_sandbox_with(node: &Rc<MockNode>, limits: ResourceLimits) -> Sandbox {
    let node: Rc<dyn HostNode> = node.clone();
    Sandbox::create(node, limits, &Config::default()).expect("sandbox creation failed")
}

/// A configuration with a print target, namespace, and message context.
pub fn basic_config(from: &str) -> SetConfig {
    SetConfig {
        print: PrintOpts {
            target: Some("#chan".to_string()),
        },
        irc: json!({
            "message": { "from": from, "target": "#chan" },
            "command": { "params": [] },
        }),
        namespace: Some("plugin".to_string()),
        has_set_nick: false,
        on_print: None,
    }
}
