use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chat_relay::{
    cli::{Cli, Command},
    server::ChatServer,
    terminal,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = args.to_config()?;
            let server = ChatServer::bind(config).await?;
            let addr = server.local_addr()?;
            info!("chat server listening on {}", addr);
            server.run_until_ctrl_c().await;
        }
        Command::Client(args) => terminal::run(args).await?,
    }

    Ok(())
}
