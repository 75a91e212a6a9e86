use anyhow::Result;
use clap::Parser;
use roomsync::{
    app,
    cli::{handle_config_command, load_config, Cli, CliCommand, ServeArgs},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let serve_args = match cli.command {
        Some(CliCommand::Version) => {
            println!("roomsync {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Config(args)) => {
            handle_config_command(args, cli.config.as_ref())?;
            return Ok(());
        }
        Some(CliCommand::Serve(args)) => args,
        None => ServeArgs::default(),
    };

    let config = load_config(cli.config.as_ref())?;
    app::run_service(config, serve_args).await
}
