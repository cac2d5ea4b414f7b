use derive_builder::Builder;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that keeps Python tool servers from block-buffering stdout
pub const UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED";

/// Bounded wait for a terminated process to exit
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded wait for a server's output stream to reach end-of-stream
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Launch configuration for one tool server
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct RunnerConfig {
    pub name: String,
    pub command: String,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[builder(default = "DEFAULT_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: Duration,
    #[builder(default = "DEFAULT_READ_TIMEOUT")]
    pub read_timeout: Duration,
    /// Inject `PYTHONUNBUFFERED=1` unless the caller already set it
    #[builder(default = "true")]
    pub unbuffered: bool,
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Environment handed to the child process
    pub fn effective_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        if self.unbuffered {
            env.entry(UNBUFFERED_ENV.to_string())
                .or_insert_with(|| "1".to_string());
        }
        env
    }

    /// Human-readable command line for logs and error messages
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl RunnerConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Run `command_line` through a login shell (`bash -lc`), the way service
    /// units invoke tool servers
    pub fn shell_command(&mut self, shell: &str, command_line: &str) -> &mut Self {
        self.command = Some(shell.to_string());
        self.args = Some(vec!["-lc".to_string(), command_line.to_string()]);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = RunnerConfig::builder()
            .name("guide")
            .command("python3")
            .args(["mcp_server.py"])
            .build()
            .unwrap();
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);
        assert!(config.working_directory.is_none());
        assert_eq!(config.display_command(), "python3 mcp_server.py");
    }

    #[test]
    fn test_effective_env_adds_unbuffered_default() {
        let config = RunnerConfig::builder()
            .name("guide")
            .command("python3")
            .env("TRANSPORT", "stdio")
            .build()
            .unwrap();
        let env = config.effective_env();
        assert_eq!(env.get(UNBUFFERED_ENV).map(String::as_str), Some("1"));
        assert_eq!(env.get("TRANSPORT").map(String::as_str), Some("stdio"));
    }

    #[test]
    fn test_effective_env_respects_caller_override() {
        let config = RunnerConfig::builder()
            .name("guide")
            .command("python3")
            .env(UNBUFFERED_ENV, "0")
            .build()
            .unwrap();
        assert_eq!(
            config.effective_env().get(UNBUFFERED_ENV).map(String::as_str),
            Some("0")
        );

        let config = RunnerConfig::builder()
            .name("guide")
            .command("python3")
            .unbuffered(false)
            .build()
            .unwrap();
        assert!(!config.effective_env().contains_key(UNBUFFERED_ENV));
    }

    #[test]
    fn test_shell_command() {
        let config = RunnerConfig::builder()
            .name("guide")
            .shell_command("bash", "python3 mcp_server.py --verbose")
            .working_directory("/srv/guide")
            .build()
            .unwrap();
        assert_eq!(config.command, "bash");
        assert_eq!(config.args, vec!["-lc", "python3 mcp_server.py --verbose"]);
        assert_eq!(config.working_directory, Some(PathBuf::from("/srv/guide")));
    }

    #[test]
    fn test_missing_command_is_rejected() {
        assert!(RunnerConfig::builder().name("guide").build().is_err());
    }
}
