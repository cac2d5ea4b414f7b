//! mcpshot CLI - one-shot calls, guide flows, the HTTP relay and deploy artifacts

use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Args, Parser, Subcommand};
use mcpshot::deploy::{self, ArtifactTarget, Manifest};
use mcpshot::flows::{DEFAULT_EXCERPT, DEFAULT_NAME, DEFAULT_TIMEBOX_MINUTES, DEFAULT_USER_KEY};
use mcpshot::relay::{self, DEFAULT_MAX_CONTENT_LENGTH, RelayConfig};
use mcpshot::{
    Batch, CoachingFlow, McpShotError, PlatformLauncherFactory, Request, RunnerConfig, StudentDemo,
    Transport,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit code for inputs that never reached a server
const EXIT_BAD_INPUT: u8 = 2;

#[derive(Parser)]
#[command(name = "mcpshot")]
#[command(about = "One-shot client for line-delimited JSON-RPC tool servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one batch and print the last response line
    Call(CallArgs),
    /// Run the scripted student session
    Demo(DemoArgs),
    /// Start a coaching flow and print its UI payload
    Coach(CoachArgs),
    /// Serve a tool server over HTTP
    Relay(RelayArgs),
    /// Generate service artifacts from a tool manifest
    Deploy(DeployArgs),
}

#[derive(Args)]
struct ServerArgs {
    /// Server program followed by its arguments
    #[arg(long, required = true, num_args = 1..)]
    server: Vec<String>,

    /// Working directory for the server process
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Seconds to wait for the server to finish answering
    #[arg(long, default_value_t = 30)]
    read_timeout: u64,
}

impl ServerArgs {
    fn runner_config(&self, name: &str) -> Result<RunnerConfig> {
        let (command, args) = self
            .server
            .split_first()
            .ok_or_else(|| anyhow!("--server needs a program"))?;

        let mut builder = RunnerConfig::builder();
        builder
            .name(name)
            .command(command.as_str())
            .args(args)
            .read_timeout(Duration::from_secs(self.read_timeout));
        if let Some(cwd) = &self.cwd {
            builder.working_directory(cwd.clone());
        }
        builder.build().context("Invalid server configuration")
    }
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["init_only", "payload", "payload_file", "tool"])
))]
struct CallArgs {
    #[command(flatten)]
    server: ServerArgs,

    /// Send only the initialize request
    #[arg(long)]
    init_only: bool,

    /// Raw JSON-RPC request to send after initialize
    #[arg(long)]
    payload: Option<String>,

    /// File holding the JSON-RPC request to send after initialize
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// Send tools/call for this tool
    #[arg(long)]
    tool: Option<String>,

    /// JSON object of tool arguments
    #[arg(long, default_value = "{}")]
    args: String,
}

impl CallArgs {
    /// Error strings here are user input problems, reported with exit code 2
    fn batch(&self) -> Result<Batch, String> {
        let mut batch = Batch::new();

        let extra = if let Some(path) = &self.payload_file {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read --payload-file: {e}"))?;
            Some(parse_request(&text, "--payload-file")?)
        } else if let Some(payload) = &self.payload {
            Some(parse_request(payload, "--payload")?)
        } else if let Some(tool) = &self.tool {
            let arguments: Value = serde_json::from_str(&self.args)
                .map_err(|e| format!("Invalid --args JSON: {e}"))?;
            Some(Request::tool_call(2, tool, arguments))
        } else {
            None
        };

        if let Some(request) = extra {
            batch.push(request).map_err(|e| e.to_string())?;
        }
        Ok(batch)
    }
}

fn parse_request(text: &str, flag: &str) -> Result<Request, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid {flag} JSON-RPC request: {e}"))
}

#[derive(Args)]
struct DemoArgs {
    #[command(flatten)]
    server: ServerArgs,

    #[arg(long, default_value = DEFAULT_USER_KEY)]
    user_key: String,

    #[arg(long, default_value = DEFAULT_NAME)]
    name: String,

    #[arg(long, default_value = DEFAULT_EXCERPT)]
    excerpt: String,

    /// Minutes budgeted for the improvement plan
    #[arg(long, default_value_t = DEFAULT_TIMEBOX_MINUTES)]
    timebox: u32,
}

#[derive(Args)]
struct CoachArgs {
    #[command(flatten)]
    server: ServerArgs,

    #[arg(long, default_value = DEFAULT_USER_KEY)]
    user_key: String,

    #[arg(long, default_value = DEFAULT_NAME)]
    name: String,
}

#[derive(Args)]
struct RelayArgs {
    #[arg(long, env = "RELAY_BIND", default_value = "127.0.0.1:8091")]
    bind: SocketAddr,

    /// Bearer token required on POST /call; empty disables the check
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Tool server command line, run through `<shell> -lc`
    #[arg(long, env = "SERVER_CMD")]
    server_cmd: String,

    #[arg(long, env = "SERVER_CWD")]
    server_cwd: Option<PathBuf>,

    #[arg(long, default_value = "bash")]
    shell: String,

    #[arg(long, env = "MAX_CONTENT_LENGTH", default_value_t = DEFAULT_MAX_CONTENT_LENGTH)]
    max_content_length: usize,

    /// Seconds to wait for the first response line
    #[arg(long, default_value_t = 30)]
    read_timeout: u64,
}

impl RelayArgs {
    fn relay_config(&self) -> Result<RelayConfig> {
        let mut builder = RelayConfig::builder();
        builder
            .bind(self.bind)
            .server_cmd(self.server_cmd.as_str())
            .shell(self.shell.as_str())
            .max_content_length(self.max_content_length)
            .read_timeout(Duration::from_secs(self.read_timeout));
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            builder.token(token);
        }
        if let Some(cwd) = self.server_cwd.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            builder.server_cwd(cwd.clone());
        }
        builder.build().context("Invalid relay configuration")
    }
}

#[derive(Args)]
struct DeployArgs {
    /// Tool manifest (YAML)
    #[arg(long, default_value = "manifest.yaml")]
    manifest: PathBuf,

    /// List the tools in the manifest
    #[arg(long, conflicts_with_all = ["tool", "target"])]
    list: bool,

    #[arg(long, required_unless_present = "list", requires = "target")]
    tool: Option<String>,

    #[arg(long, value_enum, required_unless_present = "list")]
    target: Option<ArtifactTarget>,

    /// Output root; artifacts land in <out>/<tool>/<target>/
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Value of $REPO_ROOT in the manifest; defaults to the current directory
    #[arg(long)]
    repo_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Call(args) => call(args).await,
        Commands::Demo(args) => demo(args).await,
        Commands::Coach(args) => coach(args).await,
        Commands::Relay(args) => serve_relay(args).await,
        Commands::Deploy(args) => generate_artifacts(args),
    }
}

/// Logs go to stderr; stdout carries protocol output only
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn call(args: CallArgs) -> Result<ExitCode> {
    let batch = match args.batch() {
        Ok(batch) => batch,
        Err(message) => {
            eprintln!("{message}");
            return Ok(ExitCode::from(EXIT_BAD_INPUT));
        }
    };

    let config = args.server.runner_config("call")?;
    let mut transport = PlatformLauncherFactory::transport(&config);
    match transport.exchange(&batch).await {
        Ok(collected) => {
            if let Some(last) = collected.last() {
                println!("{}", last.raw);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(McpShotError::EmptyOutput { stderr }) => {
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                eprintln!("{stderr}");
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(surface(e)),
    }
}

async fn demo(args: DemoArgs) -> Result<ExitCode> {
    let config = args.server.runner_config("demo")?;
    let demo = StudentDemo {
        user_key: args.user_key,
        name: args.name,
        excerpt: args.excerpt,
        timebox_minutes: args.timebox,
    };

    let report = demo
        .run(PlatformLauncherFactory::transport(&config))
        .await
        .map_err(surface)?;

    print!("{report}");
    Ok(ExitCode::SUCCESS)
}

async fn coach(args: CoachArgs) -> Result<ExitCode> {
    let config = args.server.runner_config("coach")?;
    let flow = CoachingFlow {
        user_key: args.user_key,
        name: args.name,
    };

    let report = flow
        .run(PlatformLauncherFactory::transport(&config))
        .await
        .map_err(surface)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

async fn serve_relay(args: RelayArgs) -> Result<ExitCode> {
    let config = args.relay_config()?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            trigger.cancel();
        }
    });

    relay::serve(config, shutdown).await.context("Relay failed")?;
    Ok(ExitCode::SUCCESS)
}

fn generate_artifacts(args: DeployArgs) -> Result<ExitCode> {
    let manifest = Manifest::load(&args.manifest)?;

    if args.list {
        for name in manifest.tool_names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let (Some(tool), Some(target)) = (args.tool.as_deref(), args.target) else {
        return Err(anyhow!("--tool and --target are required unless --list is given"));
    };
    let repo_root = match args.repo_root {
        Some(root) => root,
        None => std::env::current_dir().context("Cannot determine the current directory")?,
    };

    let resolved = manifest.resolve(tool, &repo_root)?;
    let generated = deploy::generate(&resolved, target, &args.out)?;
    for file in &generated.files {
        println!("Wrote {}", file.display());
    }
    println!("{}", generated.instructions);
    Ok(ExitCode::SUCCESS)
}

/// Print the raw diagnostic (stderr or offending line) before failing
fn surface(error: McpShotError) -> anyhow::Error {
    if let Some(diagnostic) = error.diagnostic() {
        eprintln!("{}", diagnostic.trim());
    }
    anyhow::Error::new(error)
}
