mod agent_cmd;
mod serve_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};

use abacus_core::config::{AgentConfig, OrchestratorConfig};
use abacus_core::expr;
use abacus_db::config::DbConfig;
use abacus_db::pool;

#[derive(Parser)]
#[command(name = "abacus", about = "Distributed arithmetic expression evaluator")]
struct Cli {
    /// Database URL (overrides ABACUS_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator: HTTP API plus the task queue
    Serve,
    /// Run a fleet of agent evaluators against a running orchestrator
    Agent {
        /// Orchestrator base URL (overrides ORCHESTRATOR_HOST/PORT)
        #[arg(long)]
        orchestrator_url: Option<String>,
    },
    /// Evaluate an expression locally and print the result
    Eval {
        /// Infix expression, e.g. "(1+2)*3"
        expression: String,
    },
    /// Create the database file and apply migrations
    DbInit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db_config = match cli.database_url {
        Some(url) => DbConfig::new(url),
        None => DbConfig::from_env(),
    };

    match cli.command {
        Commands::Serve => {
            let config = OrchestratorConfig::from_env()?;
            let db = pool::create_pool(&db_config).await?;
            pool::run_migrations(&db, pool::default_migrations_path()).await?;
            serve_cmd::run_serve(db, config).await
        }
        Commands::Agent { orchestrator_url } => {
            let mut config = AgentConfig::from_env()?;
            if let Some(url) = orchestrator_url {
                config.orchestrator_url = url;
            }
            agent_cmd::run_agent(config).await
        }
        Commands::Eval { expression } => {
            let value = expr::evaluate(&expression)
                .with_context(|| format!("failed to evaluate {expression:?}"))?;
            println!("{value}");
            Ok(())
        }
        Commands::DbInit => {
            let db = pool::create_pool(&db_config).await?;
            pool::run_migrations(&db, pool::default_migrations_path()).await?;
            println!("database ready at {}", db_config.database_url);
            Ok(())
        }
    }
}
