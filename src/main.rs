//! gsd-autopilot CLI.
//!
//! Unattended orchestrator that drives an AI coding agent from a product
//! brief to a finished codebase.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gsd_autopilot::activity::ActivityStore;
use gsd_autopilot::broker::QuestionBroker;
use gsd_autopilot::config;
use gsd_autopilot::facade::{AgentFacade, ClaudeAgentRuntime};
use gsd_autopilot::ipc::{AnswerPoller, EventLogWriter, HeartbeatWriter, PlanningPaths};
use gsd_autopilot::log::RingLog;
use gsd_autopilot::notify::{
    DesktopChannel, LogChannel, NotificationChannel, NotificationManager, SlackChannel, TelegramChannel,
    WebhookChannel,
};
use gsd_autopilot::orchestrator::Orchestrator;
use gsd_autopilot::server::Server;
use gsd_autopilot::shutdown::ShutdownManager;
use gsd_autopilot::state::StateStore;
use gsd_autopilot::{Config, Result};

#[derive(Parser)]
#[command(name = "gsd-autopilot")]
#[command(author, version, about = "Unattended AI development workflow orchestrator")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh run against a product brief.
    Run {
        /// Directory the orchestrator operates in; `.planning/` is created here.
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Path to the product requirements document / brief.
        #[arg(long)]
        prd: Option<PathBuf>,

        #[arg(long)]
        port: Option<u16>,

        /// Comma-separated notification adapter names.
        #[arg(long)]
        notify: Option<String>,

        #[arg(long)]
        webhook_url: Option<String>,

        #[arg(long)]
        skip_discuss: bool,

        #[arg(long)]
        skip_verify: bool,

        /// "<from>-<to>" inclusive phase range.
        #[arg(long)]
        phases: Option<String>,

        #[arg(long, value_enum, default_value = "standard")]
        depth: DepthArg,

        #[arg(long, value_enum, default_value = "balanced")]
        model: ModelArg,
    },

    /// Resume the most recent run from its persisted state.
    Resume {
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },

    /// Print the current state document.
    Status {
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },

    /// Write a default config file under `.gsd-autopilot/`.
    Init,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DepthArg {
    Quick,
    Standard,
    Comprehensive,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModelArg {
    Quality,
    Balanced,
    Budget,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut app_config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            project_dir,
            prd,
            port,
            notify,
            webhook_url,
            skip_discuss,
            skip_verify,
            phases,
            depth,
            model,
        } => {
            if let Some(dir) = project_dir {
                app_config.project_dir = dir;
            }
            if let Some(p) = prd {
                app_config.prd = Some(p);
            }
            if let Some(p) = port {
                app_config.port = p;
            }
            if let Some(n) = notify {
                app_config.notify = n.split(',').map(|s| s.trim().to_string()).collect();
            }
            if let Some(u) = webhook_url {
                app_config.webhook_url = Some(u);
            }
            app_config.skip_discuss = skip_discuss;
            app_config.skip_verify = skip_verify;
            if let Some(p) = phases {
                app_config.phases = Some(p);
            }
            app_config.depth = match depth {
                DepthArg::Quick => "quick",
                DepthArg::Standard => "standard",
                DepthArg::Comprehensive => "comprehensive",
            }
            .to_string();
            app_config.model = match model {
                ModelArg::Quality => "quality",
                ModelArg::Balanced => "balanced",
                ModelArg::Budget => "budget",
            }
            .to_string();
            app_config.resume = false;

            run(app_config).await
        }

        Commands::Resume { project_dir } => {
            if let Some(dir) = project_dir {
                app_config.project_dir = dir;
            }
            app_config.resume = true;
            run(app_config).await
        }

        Commands::Status { project_dir } => {
            if let Some(dir) = project_dir {
                app_config.project_dir = dir;
            }
            let paths = PlanningPaths::new(&app_config.project_dir);
            let store = StateStore::restore(paths.state_file())?;
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
            Ok(())
        }

        Commands::Init => {
            config::init()?;
            info!("wrote .gsd-autopilot/config.toml");
            Ok(())
        }
    }
}

async fn run(app_config: Config) -> Result<()> {
    let paths = PlanningPaths::new(&app_config.project_dir);

    let brief = match &app_config.prd {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    };

    let store = Arc::new(if app_config.resume {
        StateStore::restore_or_fresh(paths.state_file())?
    } else {
        StateStore::create_fresh(paths.state_file())
    });
    let broker = Arc::new(QuestionBroker::new(store.clone()));
    let log = Arc::new(RingLog::new(Some(paths.sdk_output_file())));
    let activity = Arc::new(ActivityStore::new(paths.activity_file()));
    let events = Arc::new(EventLogWriter::new(paths.events_file())?);

    let runtime = ClaudeAgentRuntime::new(
        app_config.claude_code.binary.clone().unwrap_or_else(|| "claude".to_string()),
        app_config.claude_code.model.clone(),
        app_config.claude_code.dangerously_skip_permissions,
    );
    let facade = Arc::new(AgentFacade::new(Box::new(runtime), broker.clone(), log.clone()));

    let channels = build_notification_channels(&app_config);
    let notifications = Arc::new(NotificationManager::new(channels));
    notifications.init().await;
    let notifier_handle = broker.spawn_notifier(notifications.clone());

    let server = Server::new();
    server
        .start(app_config.port, store.clone(), broker.clone(), activity.clone(), events.clone())
        .await?;

    let heartbeat = Arc::new(HeartbeatWriter::new(paths.heartbeat_file()));
    let heartbeat_handle = heartbeat.spawn();

    let answer_poller = Arc::new(AnswerPoller::new(paths.answers_dir(), broker.clone()));
    let answer_poller_handle = answer_poller.spawn();

    let shutdown = ShutdownManager::new(facade.clone(), broker.clone(), server.clone(), log.clone(), notifications.clone());
    shutdown.install()?;

    let orchestrator = Orchestrator::new(
        store,
        facade,
        broker,
        notifications,
        activity,
        events,
        brief,
        app_config.orchestrator_options(),
    );

    tokio::select! {
        result = orchestrator.run() => {
            heartbeat_handle.abort();
            answer_poller_handle.abort();
            notifier_handle.abort();
            server.close().await;
            result
        }
        _ = shutdown.wait_for_signal() => {
            heartbeat_handle.abort();
            answer_poller_handle.abort();
            notifier_handle.abort();
            shutdown.run().await;
        }
    }
}

fn build_notification_channels(config: &Config) -> Vec<Box<dyn NotificationChannel>> {
    let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

    for name in &config.notify {
        match name.as_str() {
            "telegram" => {
                if let Some(t) = &config.telegram {
                    channels.push(Box::new(TelegramChannel::new(t.bot_token.clone(), t.chat_id.clone())));
                }
            }
            "slack" => {
                if let Some(s) = &config.slack {
                    channels.push(Box::new(SlackChannel::new(s.webhook_url.clone())));
                }
            }
            "desktop" => channels.push(Box::new(DesktopChannel)),
            "log" => channels.push(Box::new(LogChannel)),
            other => tracing::debug!("unknown notification adapter in config: {other}"),
        }
    }

    if let Some(url) = &config.webhook_url {
        channels.push(Box::new(WebhookChannel::new(url.clone())));
    }

    channels
}
