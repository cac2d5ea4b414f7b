#![cfg(unix)]

mod support;

use mcpshot::{CoachingFlow, McpShotError, ProcessLauncher, StudentDemo};
use serde_json::json;
use support::GuideServer;

#[tokio::test]
async fn test_student_demo_runs_the_full_plan() {
    let server = GuideServer::new();
    let (transport, launcher) = server.transport(&server.config());

    let report = StudentDemo::default().run(transport).await.unwrap();

    assert_eq!(report.session_id, "s-1");
    assert_eq!(report.excerpt_id, Some(json!("e-1")));
    assert_eq!(
        report.plan_actions.as_deref(),
        Some(&["Sharpen the thesis", "Add rural broadband data", "(no title)"].map(String::from)[..])
    );
    assert!(report.plan_raw.contains("Sharpen the thesis"));
    assert_eq!(
        report.snapshot_keys.as_deref(),
        Some(&["session_id", "intent", "excerpts", "steps"].map(String::from)[..])
    );

    let printed = report.to_string();
    assert!(printed.contains("Plan actions: 3\n  1. Sharpen the thesis\n"));
    assert!(printed.ends_with("Snapshot keys: session_id, intent, excerpts, steps\n"));

    let tools: Vec<&str> = report.summary.calls.iter().map(|c| c.tool.as_str()).collect();
    assert_eq!(
        tools,
        vec![
            "guide_handshake",
            "set_intent",
            "add_excerpt",
            "extract_intent",
            "interrogate_support",
            "generate_improvement_plan",
            "export_session",
        ]
    );
    assert_eq!(report.summary.calls[0].arguments, json!({"user_key": "dev123", "name": "Lydia"}));
    assert_eq!(report.summary.calls[1].arguments["rubric_keywords"][0], "thesis clarity");
    assert_eq!(report.summary.calls[3].arguments["excerpt_id"], "e-1");
    assert_eq!(report.summary.calls[5].arguments["timebox_minutes"], 60);

    assert_eq!(launcher.spawn_count(), 7);
    assert_eq!(launcher.active_count(), 0);
}

#[tokio::test]
async fn test_student_demo_stops_at_first_failure() {
    let server = GuideServer::new();
    let config = server.config_with_env(&[("FAIL_TOOL", "add_excerpt")]);
    let (transport, launcher) = server.transport(&config);

    let err = StudentDemo::default().run(transport).await.unwrap_err();

    assert!(matches!(err, McpShotError::Rpc { code: -32603, .. }));
    // handshake, set_intent, add_excerpt and nothing after
    assert_eq!(launcher.spawn_count(), 3);
    assert_eq!(server.session_log("s-1"), vec!["set_intent"]);
}

#[tokio::test]
async fn test_coaching_flow_returns_ui() {
    let server = GuideServer::new();
    let (transport, launcher) = server.transport(&server.config());

    let flow = CoachingFlow {
        user_key: "dev123".into(),
        name: "Sam".into(),
    };
    let report = flow.run(transport).await.unwrap();

    assert_eq!(report.session_id, "s-1");
    assert_eq!(report.ui["type"], "wizard");
    assert_eq!(report.ui["steps"], json!(["intent", "excerpt", "plan"]));
    assert_eq!(launcher.spawn_count(), 2);

    let printed = serde_json::to_value(&report).unwrap();
    assert_eq!(printed["session_id"], "s-1");
}
