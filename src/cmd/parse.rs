use anyhow::{Context, Result};
use biaosub::clash::to_proxy_block;
use biaosub::import::pasted_entries;
use biaosub::link_encode::{render_link_list, stored_links};
use biaosub::{parse_subscription, Strategy};
use clap::{Args as ClapArgs, ValueEnum};
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  /// One node per line as JSON.
  Jsonl,
  /// Newline-separated links.
  Links,
  /// Links wrapped in base64, as served to clients.
  Base64,
  /// A Clash `proxies:` section.
  Clash,
  /// Stored entries split from pasted text, as JSON lines.
  Entries,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// Fetched content: block documents win ties.
  Remote,
  /// Pasted or stored content: links win ties.
  Pasted,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
  /// Read subscription text from stdin.
  #[arg(long, default_value_t = false)]
  pub stdin: bool,

  /// Subscription text provided directly as an argument. Prefer --stdin for large inputs.
  #[arg(long)]
  pub text: Option<String>,

  /// Read subscription text from a file.
  #[arg(long, conflicts_with = "text")]
  pub file: Option<PathBuf>,

  #[arg(long, value_enum, default_value_t = Format::Jsonl)]
  pub format: Format,

  #[arg(long, value_enum, default_value_t = Mode::Pasted)]
  pub mode: Mode,

  /// Base name for `--format entries`.
  #[arg(long)]
  pub name: Option<String>,
}

pub async fn run(args: Args) -> Result<()> {
  let input = if let Some(path) = &args.file {
    tokio::fs::read_to_string(path)
      .await
      .with_context(|| format!("read {}", path.display()))?
  } else if args.stdin || args.text.is_none() {
    super::read_stdin().await.context("read stdin")?
  } else {
    args.text.clone().unwrap_or_default()
  };

  if args.format == Format::Entries {
    for entry in pasted_entries(&input, args.name.as_deref()) {
      println!("{}", serde_json::to_string(&entry)?);
    }
    return Ok(());
  }

  let strategy = match args.mode {
    Mode::Remote => Strategy::REMOTE,
    Mode::Pasted => Strategy::PASTED,
  };
  let nodes = parse_subscription(&input, strategy);
  tracing::info!(target: "biaosub::cli", count = nodes.len(), "decoded nodes");

  match args.format {
    Format::Jsonl => {
      for n in &nodes {
        if let Ok(line) = serde_json::to_string(n) {
          println!("{line}");
        }
      }
    }
    Format::Links => println!("{}", stored_links(&nodes)),
    Format::Base64 => println!("{}", render_link_list(&nodes)),
    Format::Clash => {
      println!("proxies:");
      for block in nodes.iter().filter_map(to_proxy_block) {
        println!("{block}");
      }
    }
    Format::Entries => {}
  }
  Ok(())
}
