//! Sandbox creation, disposal, sealing, and deadline behavior.

mod common;

use std::rc::Rc;
use std::time::{Duration, Instant};

use common::{basic_config, make_sandbox, make_sandbox_with, no_deadline_limits, MockNode, FRIEND};
use lash::{Config, EvalOptions, HostNode, LashError, ResourceLimits, Sandbox};

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let node = MockNode::new();
    let mut sandbox = make_sandbox(&node);
    assert!(!sandbox.is_disposed());

    sandbox.dispose();
    assert!(sandbox.is_disposed());

    // second call is a no-op and must not panic
    sandbox.dispose();
    assert!(sandbox.is_disposed());
}

#[tokio::test]
async fn test_evaluate_after_dispose_fails() {
    let node = MockNode::new();
    let mut sandbox = make_sandbox(&node);
    sandbox.set_config(basic_config(FRIEND)).unwrap();
    sandbox.dispose();

    let err = sandbox
        .evaluate("x = 1", EvalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LashError::Script(msg) if msg.contains("disposed")));
}

#[tokio::test]
async fn test_bootstrap_seals_raw_handles() {
    let node = MockNode::new();
    let sandbox = make_sandbox(&node);
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    sandbox
        .evaluate(
            r#"
            sealed = (caps == nil) and (scripts == nil)
                and (os == nil) and (io == nil)
                and (load == nil) and (loadfile == nil) and (dofile == nil)
                and (package == nil) and (debug == nil)
            curated = (type(IRC) == "table") and (type(store) == "table")
                and (type(SQL) == "table") and (type(sleep) == "function")
                and (type(require) == "function")
            "#,
            EvalOptions::default(),
        )
        .await
        .unwrap();

    let globals = sandbox.lua().unwrap().globals();
    assert!(globals.get::<bool>("sealed").unwrap());
    assert!(globals.get::<bool>("curated").unwrap());
}

#[tokio::test]
async fn test_expired_token_blocks_every_call_kind() {
    let node = MockNode::new();
    let sandbox = make_sandbox(&node);
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    sandbox.deadline().expire();

    let scripts = [
        "IRC.resetBuffer()",
        "store.get('k')",
        "IRC.log.recent()",
        "SQL.many('SELECT 1')",
        "sleep(1)",
        "IRC.whois('pal')",
        "IRC.commandFns.echo(1)",
        "IRC.auth()",
    ];
    for script in scripts {
        let err = sandbox
            .evaluate(script, EvalOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, LashError::Timeout),
            "{} should time out, got {:?}",
            script,
            err
        );
    }

    // nothing reached the host
    assert_eq!(node.reset_count.get(), 0);
    assert!(node.store_calls.borrow().is_empty());
    assert!(node.sql_calls.borrow().is_empty());
    assert!(node.command_calls.borrow().is_empty());
}

#[tokio::test]
async fn test_deadline_timer_expires_token() {
    let node = MockNode::new();
    let limits = ResourceLimits {
        max_timeout: Duration::from_millis(30),
        ..no_deadline_limits()
    };
    let sandbox = make_sandbox_with(&node, limits);
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    assert!(!sandbox.deadline().is_expired());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(sandbox.deadline().is_expired());

    // the sandbox itself is not disposed: pure scripts still run
    sandbox
        .evaluate("x = 1 + 1", EvalOptions::default())
        .await
        .unwrap();

    // but bridge calls observe the flag
    let err = sandbox
        .evaluate("IRC.resetBuffer()", EvalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LashError::Timeout));
}

#[tokio::test]
async fn test_sleep_capped_at_remaining_deadline() {
    let node = MockNode::new();
    let limits = ResourceLimits {
        max_timeout: Duration::from_millis(100),
        ..no_deadline_limits()
    };
    let sandbox = make_sandbox_with(&node, limits);
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    let start = Instant::now();
    sandbox
        .evaluate("sleep(60000)", EvalOptions::default())
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_library_bundle_isolated_between_sandboxes() {
    let node_a = MockNode::new();
    let node_b = MockNode::new();
    let sandbox_a = make_sandbox(&node_a);
    let sandbox_b = make_sandbox(&node_b);
    sandbox_a.set_config(basic_config(FRIEND)).unwrap();
    sandbox_b.set_config(basic_config(FRIEND)).unwrap();

    // sabotage one sandbox's copy of the library surface
    sandbox_a
        .evaluate("IRC.inspect = nil; IRC.parseTime = nil", EvalOptions::default())
        .await
        .unwrap();

    sandbox_b
        .evaluate(
            "ok = (type(IRC.inspect) == 'function') and (IRC.parseTime('1s') == 1000)",
            EvalOptions::default(),
        )
        .await
        .unwrap();
    assert!(sandbox_b.lua().unwrap().globals().get::<bool>("ok").unwrap());
}

#[tokio::test]
async fn test_word_list_lazy_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("words");
    std::fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

    let mut config = Config::default();
    config.sandbox.word_list_path = path.to_string_lossy().to_string();

    let node = MockNode::new();
    let host: Rc<dyn HostNode> = node.clone();
    let sandbox = Sandbox::create(host, no_deadline_limits(), &config).unwrap();
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    sandbox
        .evaluate(
            r#"
            count = #IRC.wordList
            first = IRC.wordList[1]
            same = rawequal(IRC.wordList, IRC.wordList)
            "#,
            EvalOptions::default(),
        )
        .await
        .unwrap();

    let globals = sandbox.lua().unwrap().globals();
    assert_eq!(globals.get::<i64>("count").unwrap(), 3);
    assert_eq!(globals.get::<String>("first").unwrap(), "alpha");
    assert!(globals.get::<bool>("same").unwrap());
}

#[tokio::test]
async fn test_word_list_missing_file_errors() {
    let mut config = Config::default();
    config.sandbox.word_list_path = "/nonexistent/words".to_string();

    let node = MockNode::new();
    let host: Rc<dyn HostNode> = node.clone();
    let sandbox = Sandbox::create(host, no_deadline_limits(), &config).unwrap();
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    let err = sandbox
        .evaluate("return IRC.wordList", EvalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LashError::Io(msg) if msg.contains("no such file")));
}

#[tokio::test]
async fn test_memory_limit_enforced_by_engine() {
    let node = MockNode::new();
    let limits = ResourceLimits {
        max_memory: 4 * 1024 * 1024,
        ..no_deadline_limits()
    };
    let sandbox = make_sandbox_with(&node, limits);
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    // stays under the bridge guard threshold but over the engine budget
    let err = sandbox
        .evaluate(
            r#"
            local t = {}
            for i = 1, 1000000 do
                t[i] = string.rep("x", 100) .. i
            end
            "#,
            EvalOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LashError::OutOfMemory(_)));
}

#[tokio::test]
async fn test_reconfiguration_replaces_context() {
    let node = MockNode::new();
    let sandbox = make_sandbox(&node);

    let mut config = basic_config(FRIEND);
    sandbox.set_config(config.clone()).unwrap();
    sandbox
        .evaluate("first = IRC.message.from", EvalOptions::default())
        .await
        .unwrap();

    config.irc = serde_json::json!({
        "message": { "from": "other!u@h", "target": "#chan" },
        "command": { "params": [] },
    });
    sandbox.set_config(config).unwrap();
    sandbox
        .evaluate("second = IRC.message.from", EvalOptions::default())
        .await
        .unwrap();

    let globals = sandbox.lua().unwrap().globals();
    assert_eq!(globals.get::<String>("first").unwrap(), FRIEND);
    assert_eq!(globals.get::<String>("second").unwrap(), "other!u@h");
}

#[tokio::test]
async fn test_guest_cannot_reach_engine_value_types() {
    let node = MockNode::new();
    let sandbox = make_sandbox(&node);
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    // whois results are copies, not live host references
    sandbox
        .evaluate(
            r#"
            local w = IRC.whois("pal")
            w.user = "tampered"
            tampered = w.user
            local again = IRC.whois("pal")
            fresh = again.user
            "#,
            EvalOptions::default(),
        )
        .await
        .unwrap();

    let globals = sandbox.lua().unwrap().globals();
    assert_eq!(globals.get::<String>("tampered").unwrap(), "tampered");
    assert_eq!(globals.get::<String>("fresh").unwrap(), "mock");
}

#[tokio::test]
async fn test_configure_records_namespace_on_store() {
    let node = MockNode::new();
    let sandbox = make_sandbox(&node);
    sandbox.set_config(basic_config(FRIEND)).unwrap();

    sandbox
        .evaluate("r = store.namespace", EvalOptions::default())
        .await
        .unwrap();
    let value: String = sandbox.lua().unwrap().globals().get("r").unwrap();
    assert_eq!(value, "plugin");
}
