//! Deployment artifact generator: turns one manifest tool entry into
//! service files for a hosting target.

use crate::relay::{DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_RELAY_PORT};
use clap::ValueEnum;
use mcpshot_core::UNBUFFERED_ENV;
use serde::Deserialize;
use serde_json::{Map, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const REPO_ROOT_VAR: &str = "REPO_ROOT";

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Failed to read manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Tool entry as written in the manifest; templates may reference `$REPO_ROOT`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolSpec {
    pub cmd: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSpec>,
}

/// A tool with every template variable substituted
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTool {
    pub name: String,
    pub cmd: String,
    pub cwd: String,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let text = std::fs::read_to_string(path).map_err(|source| DeployError::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| DeployError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Resolve a tool's command and working directory against `repo_root`.
    /// A missing `cwd` defaults to the repository root.
    pub fn resolve(&self, name: &str, repo_root: &Path) -> Result<ResolvedTool, DeployError> {
        let spec = self
            .tools
            .get(name)
            .ok_or_else(|| DeployError::UnknownTool(name.to_string()))?;
        let root = repo_root.to_string_lossy();

        Ok(ResolvedTool {
            name: name.to_string(),
            cmd: expand_vars(&spec.cmd, &root).trim().to_string(),
            cwd: spec
                .cwd
                .as_deref()
                .map(|cwd| expand_vars(cwd, &root))
                .unwrap_or_else(|| root.to_string()),
        })
    }
}

/// Substitute `$REPO_ROOT` and `${REPO_ROOT}`; `$$` is a literal `$`.
/// Unknown variables are left as written.
pub fn expand_vars(template: &str, repo_root: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(after) = tail
            .strip_prefix('{')
            .and_then(|t| t.strip_prefix(REPO_ROOT_VAR))
            .and_then(|t| t.strip_prefix('}'))
        {
            out.push_str(repo_root);
            rest = after;
        } else {
            match tail.strip_prefix(REPO_ROOT_VAR) {
                Some(after) if !after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') => {
                    out.push_str(repo_root);
                    rest = after;
                }
                _ => {
                    out.push('$');
                    rest = tail;
                }
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArtifactTarget {
    #[value(alias = "linux-systemd")]
    ProcessSupervisorUnit,
    #[value(alias = "local-config")]
    LocalClientConfig,
    #[value(alias = "macos-launchd")]
    LaunchAgent,
    #[value(alias = "windows-task")]
    ScheduledTask,
    #[value(alias = "http-proxy-linux")]
    HttpProxyBundle,
}

impl ArtifactTarget {
    /// Output directory name under `<out>/<tool>/`
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::ProcessSupervisorUnit => "linux-systemd",
            Self::LocalClientConfig => "local-config",
            Self::LaunchAgent => "macos-launchd",
            Self::ScheduledTask => "windows-task",
            Self::HttpProxyBundle => "http-proxy-linux",
        }
    }
}

impl fmt::Display for ArtifactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => f.write_str(self.dir_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifacts {
    pub files: Vec<PathBuf>,
    /// Operator instructions for installing what was written
    pub instructions: String,
}

/// Write the artifacts for `tool` under `<out_dir>/<tool>/<target dir>/`
pub fn generate(
    tool: &ResolvedTool,
    target: ArtifactTarget,
    out_dir: &Path,
) -> Result<GeneratedArtifacts, DeployError> {
    let base = out_dir.join(&tool.name).join(target.dir_name());
    info!(tool = %tool.name, %target, dir = %base.display(), "Generating artifacts");

    let generated = match target {
        ArtifactTarget::ProcessSupervisorUnit => supervisor_unit(tool, &base)?,
        ArtifactTarget::LocalClientConfig => local_client_config(tool, &base)?,
        ArtifactTarget::LaunchAgent => launch_agent(tool, &base)?,
        ArtifactTarget::ScheduledTask => scheduled_task(tool, &base)?,
        ArtifactTarget::HttpProxyBundle => http_proxy_bundle(tool, &base)?,
    };
    Ok(generated)
}

fn write(path: PathBuf, content: &str) -> Result<PathBuf, DeployError> {
    let io_err = |source| DeployError::Write {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(&path, content).map_err(io_err)?;
    debug!(path = %path.display(), bytes = content.len(), "Wrote artifact");
    Ok(path)
}

fn supervisor_unit(tool: &ResolvedTool, base: &Path) -> Result<GeneratedArtifacts, DeployError> {
    let ResolvedTool { name, cmd, cwd } = tool;
    let unit = format!(
        "[Unit]
Description={name} (MCP stdio)
After=network.target

[Service]
Type=simple
WorkingDirectory={cwd}
Environment={UNBUFFERED_ENV}=1
ExecStart=/usr/bin/env bash -lc '{cmd}'
Restart=on-failure
RestartSec=2
User=www-data
Group=www-data

[Install]
WantedBy=multi-user.target
"
    );
    let out = write(base.join(format!("{name}.service")), &unit)?;
    let instructions = format!(
        "Copy and enable:\n  sudo cp {} /etc/systemd/system/\n  sudo systemctl daemon-reload\n  sudo systemctl enable --now {name}.service",
        out.display()
    );
    Ok(GeneratedArtifacts {
        files: vec![out],
        instructions,
    })
}

fn local_client_config(tool: &ResolvedTool, base: &Path) -> Result<GeneratedArtifacts, DeployError> {
    let mut env = Map::new();
    env.insert(UNBUFFERED_ENV.to_string(), json!("1"));
    let mut servers = Map::new();
    servers.insert(
        tool.name.clone(),
        json!({
            "command": "bash",
            "args": ["-lc", tool.cmd],
            "env": env,
            "cwd": tool.cwd,
        }),
    );
    let config = json!({ "mcpServers": servers });
    let out = write(base.join("clients.json"), &serde_json::to_string_pretty(&config)?)?;
    let instructions = format!("Merge {} into your client's MCP config.", out.display());
    Ok(GeneratedArtifacts {
        files: vec![out],
        instructions,
    })
}

fn launch_agent(tool: &ResolvedTool, base: &Path) -> Result<GeneratedArtifacts, DeployError> {
    let name = xml_escape(&tool.name);
    let cmd = xml_escape(&tool.cmd);
    let cwd = xml_escape(&tool.cwd);
    let plist = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key><string>com.mcpshot.{name}</string>
  <key>ProgramArguments</key>
  <array>
    <string>/bin/bash</string><string>-lc</string><string>{cmd}</string>
  </array>
  <key>WorkingDirectory</key><string>{cwd}</string>
  <key>EnvironmentVariables</key>
  <dict><key>{UNBUFFERED_ENV}</key><string>1</string></dict>
  <key>RunAtLoad</key><true/>
  <key>KeepAlive</key><true/>
</dict>
</plist>
"#
    );
    let file_name = format!("com.mcpshot.{}.plist", tool.name);
    let out = write(base.join(&file_name), &plist)?;
    let instructions = format!(
        "Load with:\n  cp {} ~/Library/LaunchAgents/\n  launchctl load -w ~/Library/LaunchAgents/{file_name}",
        out.display()
    );
    Ok(GeneratedArtifacts {
        files: vec![out],
        instructions,
    })
}

fn scheduled_task(tool: &ResolvedTool, base: &Path) -> Result<GeneratedArtifacts, DeployError> {
    let cmd = xml_escape(&tool.cmd);
    let cwd = xml_escape(&tool.cwd);
    let task = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Task version="1.4" xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task">
  <Triggers/>
  <Principals><Principal id="Author"><RunLevel>HighestAvailable</RunLevel></Principal></Principals>
  <Settings><MultipleInstancesPolicy>IgnoreNew</MultipleInstancesPolicy><AllowStartOnDemand>true</AllowStartOnDemand><RestartOnFailure><Count>3</Count><Interval>PT5M</Interval></RestartOnFailure></Settings>
  <Actions Context="Author">
    <Exec>
      <Command>powershell.exe</Command>
      <Arguments>-ExecutionPolicy Bypass -NoLogo -NoProfile -Command "cd '{cwd}'; $env:{UNBUFFERED_ENV}='1'; {cmd}"</Arguments>
      <WorkingDirectory>{cwd}</WorkingDirectory>
    </Exec>
  </Actions>
</Task>
"#
    );
    let out = write(base.join(format!("{}.xml", tool.name)), &task)?;
    let instructions = format!(
        "Import with (as admin):\n  schtasks /Create /TN {} /XML {}",
        tool.name,
        out.display()
    );
    Ok(GeneratedArtifacts {
        files: vec![out],
        instructions,
    })
}

fn http_proxy_bundle(tool: &ResolvedTool, base: &Path) -> Result<GeneratedArtifacts, DeployError> {
    let ResolvedTool { name, cmd, cwd } = tool;
    let bind = format!("127.0.0.1:{DEFAULT_RELAY_PORT}");
    let env_path = base.join("relay.env");

    let env_file = format!(
        "# Bearer token for POST /call; leave empty to disable the check
TOKEN=
SERVER_CMD={cmd}
SERVER_CWD={cwd}
MAX_CONTENT_LENGTH={DEFAULT_MAX_CONTENT_LENGTH}
RELAY_BIND={bind}
{UNBUFFERED_ENV}=1
RUST_LOG=info
"
    );
    let unit = format!(
        "[Unit]
Description=MCP HTTP relay ({name})
After=network.target

[Service]
EnvironmentFile={env}
WorkingDirectory={cwd}
ExecStart=/usr/bin/env mcpshot relay
Restart=on-failure
User=www-data
Group=www-data

[Install]
WantedBy=multi-user.target
",
        env = env_path.display()
    );
    let nginx = format!(
        "server {{
    listen 80;
    server_name <your-domain>;
    location /mcp/{name}/ {{
        proxy_pass http://{bind}/;
        proxy_set_header Host $host;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }}
}}
"
    );

    let service_name = format!("mcp-{name}-relay.service");
    let files = vec![
        write(env_path, &env_file)?,
        write(base.join(&service_name), &unit)?,
        write(base.join("nginx.conf.example"), &nginx)?,
    ];
    let instructions = format!(
        "Wrote HTTP relay bundle under {base}\nInstall:\n  set TOKEN in {base}/relay.env\n  sudo cp {base}/{service_name} /etc/systemd/system/\n  sudo systemctl daemon-reload && sudo systemctl enable --now {service_name}\n  (nginx) see {base}/nginx.conf.example",
        base = base.display()
    );
    Ok(GeneratedArtifacts {
        files,
        instructions,
    })
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}
