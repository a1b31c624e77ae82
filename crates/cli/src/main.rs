use std::{
    path::{Path, PathBuf},
    process::{ExitCode, ExitStatus},
};

use {
    anyhow::Context,
    cachegate_backend::{BackendRegistry, ExecutionContext, PluginOptions},
    cachegate_config::CachegateConfig,
    cachegate_gateway::{CacheGateway, ServerOptions, SessionKey, StartOutcome},
    clap::{Args, Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "cachegate", version, about = "Local cache gateway for build task runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway, run a task command against it, then stop it.
    Run {
        #[command(flatten)]
        session: SessionArgs,

        /// Task command and its arguments.
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// Start the gateway and keep it up until Ctrl-C.
    Serve {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// List the cache backends this build knows about.
    Backends,
}

#[derive(Args)]
struct SessionArgs {
    /// Workspace root handed to the backend.
    #[arg(long, default_value = ".")]
    workspace_root: PathBuf,

    /// Config file; defaults to discovery under the workspace root.
    #[arg(long, env = "CACHEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured backend.
    #[arg(long, env = "CACHEGATE_BACKEND")]
    backend: Option<String>,
}

/// Everything a pre-run needs, resolved from flags and config.
struct Session {
    gateway: CacheGateway,
    key: SessionKey,
    plugin: PluginOptions,
    ctx: ExecutionContext,
}

impl Session {
    fn prepare(args: SessionArgs) -> anyhow::Result<Self> {
        let root = std::fs::canonicalize(&args.workspace_root).with_context(|| {
            format!("workspace root {} not found", args.workspace_root.display())
        })?;
        let mut config = load_config(&root, args.config.as_deref())?;
        if let Some(backend) = args.backend {
            config.plugin.backend = backend;
        }

        let gateway = CacheGateway::new(
            BackendRegistry::with_builtins(),
            ServerOptions::from(&config.gateway),
        );
        Ok(Self {
            gateway,
            key: SessionKey::for_workspace(&root),
            plugin: config.plugin,
            ctx: ExecutionContext::new(root),
        })
    }

    async fn start(&self) -> anyhow::Result<StartOutcome> {
        self.gateway
            .pre_run(self.key.clone(), &self.plugin, &self.ctx)
            .await
            .with_context(|| format!("cache backend `{}` failed to start", self.plugin.backend))
    }

    async fn stop(&self) {
        self.gateway.post_run(&self.key).await;
    }
}

fn load_config(root: &Path, explicit: Option<&Path>) -> anyhow::Result<CachegateConfig> {
    match explicit {
        Some(path) => cachegate_config::load_config(path),
        None => cachegate_config::discover_and_load(root),
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // Logs go to stderr; stdout belongs to the task and to `serve` output.
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// How a supervised task run ended.
#[derive(Debug)]
enum TaskEnd {
    Exited(std::io::Result<ExitStatus>),
    Interrupted,
}

/// Wait for the task, or for an interrupt, whichever comes first. If the
/// interrupt handler cannot be installed, keep waiting on the task alone.
async fn wait_or_interrupt(
    wait: impl Future<Output = std::io::Result<ExitStatus>>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> TaskEnd {
    tokio::pin!(wait);
    tokio::select! {
        status = &mut wait => TaskEnd::Exited(status),
        signal = interrupt => match signal {
            Ok(()) => TaskEnd::Interrupted,
            Err(e) => {
                warn!(error = %e, "failed to listen for Ctrl-C");
                TaskEnd::Exited(wait.await)
            },
        },
    }
}

async fn run_task(session: Session, command: Vec<String>) -> anyhow::Result<ExitCode> {
    let Some((program, args)) = command.split_first() else {
        anyhow::bail!("no task command given");
    };

    let outcome = session.start().await?;
    let mut child = tokio::process::Command::new(program);
    child.args(args).current_dir(&session.ctx.workspace_root);
    match &outcome {
        StartOutcome::Listening(discovery) => {
            child.envs(discovery.env_vars());
        },
        StartOutcome::Disabled { reason } => {
            info!(%reason, "running task without the cache gateway");
        },
    }

    let mut child = match child.spawn() {
        Ok(child) => child,
        Err(e) => {
            session.stop().await;
            return Err(e).with_context(|| format!("failed to run `{program}`"));
        },
    };

    let end = wait_or_interrupt(child.wait(), tokio::signal::ctrl_c()).await;
    session.stop().await;

    let status = match end {
        TaskEnd::Exited(status) => status.with_context(|| format!("failed to run `{program}`"))?,
        TaskEnd::Interrupted => {
            warn!("interrupted, stopping task");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill task");
            }
            return Ok(ExitCode::from(130));
        },
    };
    let code = status.code().unwrap_or_else(|| {
        warn!("task terminated by signal");
        1
    });
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

async fn serve(session: Session) -> anyhow::Result<ExitCode> {
    let outcome = session.start().await?;
    let StartOutcome::Listening(discovery) = &outcome else {
        println!("cache backend `{}` is disabled, nothing to serve", session.plugin.backend);
        return Ok(ExitCode::SUCCESS);
    };

    for (name, value) in discovery.env_vars() {
        println!("export {name}={value}");
    }
    info!("press Ctrl-C to stop");

    let signal = tokio::signal::ctrl_c().await;
    session.stop().await;
    signal.context("failed to listen for Ctrl-C")?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "cachegate starting");

    match cli.command {
        Commands::Run { session, command } => run_task(Session::prepare(session)?, command).await,
        Commands::Serve { session } => serve(Session::prepare(session)?).await,
        Commands::Backends => {
            for name in BackendRegistry::with_builtins().names() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_takes_trailing_command() {
        let cli = Cli::try_parse_from([
            "cachegate",
            "run",
            "--backend",
            "memory",
            "--",
            "npx",
            "nx",
            "run-many",
            "-t",
            "build",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { session, command } => {
                assert_eq!(session.backend.as_deref(), Some("memory"));
                assert_eq!(command, ["npx", "nx", "run-many", "-t", "build"]);
            },
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["cachegate", "run"]).is_err());
    }

    #[test]
    fn explicit_config_wins_over_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cachegate.toml"), "[plugin]\nbackend = \"memory\"\n")
            .unwrap();
        let other = dir.path().join("other.toml");
        std::fs::write(&other, "[plugin]\nbackend = \"filesystem\"\n").unwrap();

        assert_eq!(load_config(dir.path(), None).unwrap().plugin.backend, "memory");
        assert_eq!(
            load_config(dir.path(), Some(&other)).unwrap().plugin.backend,
            "filesystem"
        );
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn task_exit_is_reported() {
        let end = wait_or_interrupt(
            async { Ok(exit_status(3)) },
            std::future::pending(),
        )
        .await;
        match end {
            TaskEnd::Exited(status) => assert_eq!(status.unwrap().code(), Some(3)),
            TaskEnd::Interrupted => panic!("expected exit"),
        }
    }

    #[tokio::test]
    async fn interrupt_ends_the_wait() {
        let end = wait_or_interrupt(std::future::pending(), async { Ok(()) }).await;
        assert!(matches!(end, TaskEnd::Interrupted));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn broken_signal_handler_falls_back_to_the_task() {
        let end = wait_or_interrupt(
            async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(exit_status(0))
            },
            async { Err(std::io::Error::other("no signal support")) },
        )
        .await;
        assert!(matches!(end, TaskEnd::Exited(Ok(status)) if status.success()));
    }
}
