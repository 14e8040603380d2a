use anyhow::{Context, Result};
use biaosub::fetch::{FetchOptions, HttpFetcher, SubscriptionInfo, DEFAULT_TIMEOUT_MS, DEFAULT_USER_AGENT};
use biaosub::import::import_remote;
use clap::Args as ClapArgs;
use serde::Serialize;

/// Options shared by every subcommand that talks to providers.
#[derive(ClapArgs, Debug, Clone)]
pub struct FetchArgs {
  /// User-Agent sent to the provider.
  #[arg(long, env = "BIAOSUB_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
  pub user_agent: String,

  /// Request timeout (ms).
  #[arg(long, env = "BIAOSUB_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
  pub timeout_ms: u64,

  /// HTTP proxy URL to fetch through, e.g. http://127.0.0.1:7890
  #[arg(long)]
  pub proxy_url: Option<String>,
}

impl FetchArgs {
  pub fn options(&self) -> FetchOptions {
    FetchOptions {
      user_agent: self.user_agent.clone(),
      timeout_ms: self.timeout_ms.clamp(1_000, 120_000),
      proxy_url: self.proxy_url.clone(),
    }
  }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
  /// Subscription URL.
  pub url: String,

  /// Display name; defaults to the provider's filename hint.
  #[arg(long)]
  pub name: Option<String>,

  #[command(flatten)]
  pub fetch: FetchArgs,
}

#[derive(Serialize)]
struct ImportOut<'a> {
  name: &'a str,
  #[serde(rename = "nodeCount")]
  node_count: usize,
  info: &'a SubscriptionInfo,
  links: &'a str,
}

pub async fn run(args: Args) -> Result<()> {
  let imported = import_remote(&HttpFetcher, &args.url, args.name.as_deref(), &args.fetch.options())
    .await
    .context("import remote subscription")?;
  let out = ImportOut {
    name: &imported.name,
    node_count: imported.content.nodes.len(),
    info: &imported.content.info,
    links: &imported.content.links,
  };
  println!("{}", serde_json::to_string(&out)?);
  Ok(())
}
