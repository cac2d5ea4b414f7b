//! Shared fixtures: a POSIX `sh` guide server that keeps session state in
//! files inside its working directory.
#![allow(dead_code)]

use mcpshot::{OneShotTransport, PlatformLauncher, PlatformLauncherFactory, ProcessLauncherFactory, RunnerConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Answers initialize plus the guide tools. Session ids come from a counter
/// file, so every handshake in one directory gets a new id. Set `FAIL_TOOL` to
/// make one tool answer with an internal error.
pub const GUIDE_SERVER: &str = r##"
reply() {
  esc=$(printf '%s' "$1" | sed 's/"/\\"/g')
  printf '%s\n' "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"$esc\"}]}}"
}
fail() {
  printf '%s\n' "{\"jsonrpc\":\"2.0\",\"id\":$id,\"error\":{\"code\":$1,\"message\":\"$2\"}}"
}
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"protocolVersion\":\"2024-11-05\",\"serverInfo\":{\"name\":\"guide\"}}}"
      continue;;
  esac
  tool=$(printf '%s' "$line" | sed -n 's/.*"params":{"name":"\([a-z_]*\)".*/\1/p')
  sid=$(printf '%s' "$line" | sed -n 's/.*"session_id":"\([^"]*\)".*/\1/p')
  if [ -n "$FAIL_TOOL" ] && [ "$tool" = "$FAIL_TOOL" ]; then
    fail -32603 "forced failure"
    continue
  fi
  if [ "$tool" = guide_handshake ]; then
    n=$(cat counter 2>/dev/null || echo 0)
    n=$((n+1))
    echo "$n" > counter
    sid="s-$n"
    : > "session-$sid"
    reply "{\"session_id\":\"$sid\",\"greeting\":\"hello\"}"
    continue
  fi
  if [ -z "$sid" ] || [ ! -f "session-$sid" ]; then
    fail -32602 "unknown session"
    continue
  fi
  echo "$tool" >> "session-$sid"
  case "$tool" in
    set_intent|interrogate_support)
      reply '{"ok":true}';;
    add_excerpt)
      reply '{"id":"e-1","words":28}';;
    extract_intent)
      case "$line" in
        *'"excerpt_id":"e-1"'*) reply '{"claim":"libraries reduce information inequality"}';;
        *) fail -32602 "unknown excerpt";;
      esac;;
    generate_improvement_plan)
      reply '{"actions":[{"title":"Sharpen the thesis"},{"title":"Add rural broadband data"},{}]}';;
    export_session)
      steps=$(wc -l < "session-$sid" | tr -d ' ')
      reply "{\"session_id\":\"$sid\",\"intent\":{\"purpose\":\"argue\"},\"excerpts\":[\"e-1\"],\"steps\":$steps}";;
    start_coaching_flow)
      reply '{"ui":{"type":"wizard","steps":["intent","excerpt","plan"]}}';;
    *)
      fail -32601 "unknown tool";;
  esac
done
"##;

/// A guide server script in its own scratch directory
pub struct GuideServer {
    dir: TempDir,
}

impl GuideServer {
    pub fn new() -> Self {
        Self::with_script(GUIDE_SERVER)
    }

    pub fn with_script(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.sh"), script).unwrap();
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> RunnerConfig {
        self.config_with_env(&[])
    }

    pub fn config_with_env(&self, env: &[(&str, &str)]) -> RunnerConfig {
        let mut builder = RunnerConfig::builder();
        builder
            .name("guide")
            .command("sh")
            .args(["server.sh"])
            .working_directory(self.dir.path().to_path_buf())
            .env_multi(env.iter().copied())
            .shutdown_timeout(Duration::from_secs(2))
            .read_timeout(Duration::from_secs(10));
        builder.build().unwrap()
    }

    /// Transport plus a handle on its launcher for spawn accounting
    pub fn transport(&self, config: &RunnerConfig) -> (OneShotTransport<PlatformLauncher>, Arc<PlatformLauncher>) {
        let launcher = Arc::new(PlatformLauncherFactory::create_launcher(config));
        (OneShotTransport::new(launcher.clone()), launcher)
    }

    /// Tools recorded for a session, in call order
    pub fn session_log(&self, session_id: &str) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join(format!("session-{session_id}")))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn forget_session(&self, session_id: &str) {
        std::fs::remove_file(self.dir.path().join(format!("session-{session_id}"))).unwrap();
    }
}
