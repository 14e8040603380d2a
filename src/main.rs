mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
  /// Log filter used when RUST_LOG is unset.
  #[arg(long, global = true, default_value = biaosub::logging::DEFAULT_FILTER)]
  log: String,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Decode subscription text (links, base64 lists, Clash proxies) and print nodes, links or a Clash section.
  Parse(cmd::parse::Args),

  /// Fetch a remote subscription and print its stored links and provider metadata as JSON.
  Fetch(cmd::fetch::Args),

  /// Assemble a group from a workspace file into a Clash document or a base64 link list.
  Assemble(cmd::assemble::Args),
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  biaosub::logging::init(&cli.log);
  match cli.command {
    Commands::Parse(args) => cmd::parse::run(args).await,
    Commands::Fetch(args) => cmd::fetch::run(args).await,
    Commands::Assemble(args) => cmd::assemble::run(args).await,
  }
}
