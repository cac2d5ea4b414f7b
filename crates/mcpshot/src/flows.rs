use crate::session::{SessionClient, SessionSummary};
use mcpshot_core::{McpShotError, Transport};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use tracing::{info, warn};

pub const DEFAULT_USER_KEY: &str = "dev123";
pub const DEFAULT_NAME: &str = "Lydia";
pub const DEFAULT_TIMEBOX_MINUTES: u32 = 60;
pub const DEFAULT_EXCERPT: &str = "My paper argues that public libraries should expand digital access because they reduce information inequality. \
For example, rural students often lack broadband. Therefore, investing in hotspots improves equity.";

const HANDSHAKE_TOOL: &str = "guide_handshake";

/// The scripted student session: handshake, intent, one excerpt, analysis,
/// an improvement plan and a final export.
#[derive(Debug, Clone)]
pub struct StudentDemo {
    pub user_key: String,
    pub name: String,
    pub excerpt: String,
    pub timebox_minutes: u32,
}

impl Default for StudentDemo {
    fn default() -> Self {
        Self {
            user_key: DEFAULT_USER_KEY.to_string(),
            name: DEFAULT_NAME.to_string(),
            excerpt: DEFAULT_EXCERPT.to_string(),
            timebox_minutes: DEFAULT_TIMEBOX_MINUTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemoReport {
    pub session_id: String,
    /// Absent when `add_excerpt` returned no `id`
    pub excerpt_id: Option<Value>,
    /// Action titles, absent when the plan payload was not JSON
    pub plan_actions: Option<Vec<String>>,
    /// Response line of `generate_improvement_plan`
    pub plan_raw: String,
    /// Top-level export keys in server order, absent when the export was not JSON
    pub snapshot_keys: Option<Vec<String>>,
    pub summary: SessionSummary,
}

/// Titles shown under the plan
const SHOWN_ACTIONS: usize = 5;
/// Snapshot keys shown
const SHOWN_KEYS: usize = 6;

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session: {}", self.session_id)?;
        match &self.excerpt_id {
            Some(id) => writeln!(f, "Excerpt ID: {id}")?,
            None => writeln!(f, "Excerpt ID: (none)")?,
        }
        match &self.plan_actions {
            Some(actions) => {
                writeln!(f, "Plan actions: {}", actions.len())?;
                for (i, title) in actions.iter().take(SHOWN_ACTIONS).enumerate() {
                    writeln!(f, "  {}. {title}", i + 1)?;
                }
            }
            None => {
                writeln!(f, "Generated plan (raw):")?;
                writeln!(f, "{}", self.plan_raw)?;
            }
        }
        if let Some(keys) = &self.snapshot_keys {
            let shown: Vec<&str> = keys.iter().take(SHOWN_KEYS).map(String::as_str).collect();
            writeln!(f, "Snapshot keys: {}", shown.join(", "))?;
        }
        Ok(())
    }
}

impl StudentDemo {
    /// Run the fixed call plan, aborting on the first failed call
    pub async fn run<T: Transport>(&self, transport: T) -> Result<DemoReport, McpShotError> {
        let (mut session, _) = SessionClient::new(transport)
            .establish(
                HANDSHAKE_TOOL,
                json!({"user_key": self.user_key, "name": self.name}),
            )
            .await?;
        info!(session_id = %session.session_id(), "Student demo session");

        session
            .call(
                "set_intent",
                json!({
                    "purpose": "argue",
                    "audience": "peers",
                    "constraints": ["1200 words"],
                    "rubric_keywords": ["thesis clarity", "evidence", "reasoning"],
                }),
            )
            .await?;

        let added = session
            .call("add_excerpt", json!({"text": self.excerpt}))
            .await?;
        let excerpt_id = added.field("id").filter(|id| !id.is_null()).cloned();

        let excerpt_ref = json!({"excerpt_id": excerpt_id.clone().unwrap_or(Value::Null)});
        session.call("extract_intent", excerpt_ref.clone()).await?;
        session.call("interrogate_support", excerpt_ref).await?;

        let plan = session
            .call(
                "generate_improvement_plan",
                json!({"timebox_minutes": self.timebox_minutes}),
            )
            .await?;
        let plan_actions = plan.data.as_ref().filter(|d| d.is_object()).map(|data| {
            data.get("actions")
                .and_then(Value::as_array)
                .map(|actions| {
                    actions
                        .iter()
                        .map(|a| {
                            a.get("title")
                                .and_then(Value::as_str)
                                .unwrap_or("(no title)")
                                .to_string()
                        })
                        .collect()
                })
                .unwrap_or_default()
        });
        if plan_actions.is_none() {
            warn!(raw = %plan.raw, "Improvement plan was not JSON");
        }

        let export = session.call("export_session", json!({})).await?;
        let snapshot_keys = export
            .data
            .as_ref()
            .and_then(Value::as_object)
            .map(|snapshot| snapshot.keys().cloned().collect());

        let summary = session.close();
        Ok(DemoReport {
            session_id: summary.session_id.clone(),
            excerpt_id,
            plan_actions,
            plan_raw: plan.raw,
            snapshot_keys,
            summary,
        })
    }
}

/// Handshake followed by `start_coaching_flow`
#[derive(Debug, Clone)]
pub struct CoachingFlow {
    pub user_key: String,
    pub name: String,
}

impl Default for CoachingFlow {
    fn default() -> Self {
        Self {
            user_key: DEFAULT_USER_KEY.to_string(),
            name: DEFAULT_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoachingReport {
    pub session_id: String,
    pub ui: Value,
}

impl CoachingFlow {
    pub async fn run<T: Transport>(&self, transport: T) -> Result<CoachingReport, McpShotError> {
        let (mut session, _) = SessionClient::new(transport)
            .establish(
                HANDSHAKE_TOOL,
                json!({"user_key": self.user_key, "name": self.name}),
            )
            .await?;

        let started = session.call("start_coaching_flow", json!({})).await?;
        Ok(CoachingReport {
            session_id: session.session_id().to_string(),
            ui: started.field("ui").cloned().unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(plan_actions: Option<Vec<String>>, keys: usize) -> DemoReport {
        DemoReport {
            session_id: "s-1".to_string(),
            excerpt_id: None,
            plan_actions,
            plan_raw: r#"{"jsonrpc":"2.0","id":7,"result":{"content":[{"type":"text","text":"draft plan"}]}}"#
                .to_string(),
            snapshot_keys: Some((1..=keys).map(|i| format!("k{i}")).collect()),
            summary: SessionSummary {
                session_id: "s-1".to_string(),
                calls: Vec::new(),
            },
        }
    }

    #[test]
    fn test_display_limits_actions_and_keys() {
        let titles = (1..=7).map(|i| format!("step {i}")).collect();
        let printed = report(Some(titles), 8).to_string();

        assert!(printed.contains("Excerpt ID: (none)\n"));
        assert!(printed.contains("Plan actions: 7\n"));
        assert!(printed.contains("  5. step 5\n"));
        assert!(!printed.contains("step 6"));
        assert!(printed.ends_with("Snapshot keys: k1, k2, k3, k4, k5, k6\n"));
    }

    #[test]
    fn test_display_falls_back_to_raw_plan() {
        let printed = report(None, 0).to_string();

        assert!(!printed.contains("Plan actions"));
        assert!(printed.contains("Generated plan (raw):\n{\"jsonrpc\":\"2.0\",\"id\":7"));
        assert!(printed.ends_with("Snapshot keys: \n"));
    }

    #[test]
    fn test_display_empty_action_list() {
        let printed = report(Some(Vec::new()), 1).to_string();
        assert!(printed.contains("Plan actions: 0\nSnapshot keys: k1\n"));
    }
}
