use clap::{Parser, Subcommand};
use relay::store::Store;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "WhatsApp customer-support relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, default config and database.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the relay (webhook, REST API and live WebSocket channels on one port).
    Serve {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP and WebSocket port (default from config or 15151)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Manage support agents and their API tokens.
    Agent {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH", global = true)]
        config: Option<std::path::PathBuf>,

        #[command(subcommand)]
        command: AgentCommands,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Add an agent and print its token.
    Add { name: String },
    /// List agents.
    List,
    /// Remove an agent; their messages are kept.
    Remove { id: i64 },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config).await {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("relay failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Agent { config, command }) => {
            if let Err(e) = run_agent(config, command).await {
                log::error!("agent command failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(relay::config::default_config_path);
    let url = relay::init::init(&path).await?;
    println!("initialized configuration at {}", relay::config::config_dir(&path).display());
    println!("database: {}", url);
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = relay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting relay on {}:{}", config.gateway.bind, config.gateway.port);
    relay::gateway::run_gateway(config, path).await
}

async fn run_agent(
    config_path: Option<std::path::PathBuf>,
    command: AgentCommands,
) -> anyhow::Result<()> {
    let (config, path) = relay::config::load_config(config_path)?;
    let url = relay::config::resolve_database_url(&config, &path);
    let store = relay::store::connect(&url).await?;

    match command {
        AgentCommands::Add { name } => {
            let agent = store.create_agent(name.trim()).await?;
            println!("added agent {} ({})", agent.id, agent.name);
            println!("token: {}", agent.token);
        }
        AgentCommands::List => {
            let agents = store.list_agents().await?;
            if agents.is_empty() {
                println!("no agents");
            }
            for agent in agents {
                println!("{}\t{}\t{}", agent.id, agent.name, agent.created_at.to_rfc3339());
            }
        }
        AgentCommands::Remove { id } => {
            if store.remove_agent(id).await? {
                println!("removed agent {}", id);
            } else {
                anyhow::bail!("no agent with id {}", id);
            }
        }
    }
    Ok(())
}
