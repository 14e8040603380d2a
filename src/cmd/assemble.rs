use super::fetch::FetchArgs;
use anyhow::{anyhow, bail, Context, Result};
use biaosub::assemble::{assemble_group, assemble_links, GroupSpec, SourceId, SourceTable};
use biaosub::fetch::HttpFetcher;
use biaosub::import::refresh_remote;
use clap::{Args as ClapArgs, ValueEnum};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  /// Full Clash document.
  Clash,
  /// Base64 link subscription.
  Base64,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
  /// Workspace file (YAML or JSON) with `sources` and `groups`.
  #[arg(long)]
  pub workspace: PathBuf,

  /// Group token. May be omitted when the workspace holds a single group.
  #[arg(long)]
  pub group: Option<String>,

  #[arg(long, value_enum, default_value_t = Format::Clash)]
  pub format: Format,

  #[command(flatten)]
  pub fetch: FetchArgs,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
  id: SourceId,
  #[serde(default)]
  name: String,
  content: Option<String>,
  /// Relative paths resolve against the workspace file.
  file: Option<PathBuf>,
  url: Option<String>,
  /// Per-source User-Agent override for `url` sources.
  ua: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Workspace {
  #[serde(default)]
  sources: Vec<SourceEntry>,
  #[serde(default)]
  groups: HashMap<String, GroupSpec>,
}

async fn load_workspace(path: &Path) -> Result<Workspace> {
  let raw = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("read workspace {}", path.display()))?;
  serde_yaml::from_str(&raw).with_context(|| format!("parse workspace {}", path.display()))
}

/// Materializes every source. Remote sources are fetched concurrently and
/// joined in declaration order, so the table is complete before assembly.
async fn build_table(sources: Vec<SourceEntry>, base_dir: &Path, fetch: &FetchArgs) -> Result<SourceTable> {
  let mut table = SourceTable::new();
  let mut pending = Vec::new();

  for entry in sources {
    if let Some(content) = entry.content {
      table.insert(entry.id, &entry.name, content);
    } else if let Some(file) = entry.file {
      let path = base_dir.join(file);
      let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("read source {} ({})", entry.id, path.display()))?;
      table.insert(entry.id, &entry.name, content);
    } else if let Some(url) = entry.url {
      let mut opts = fetch.options();
      if let Some(ua) = entry.ua.filter(|u| !u.trim().is_empty()) {
        opts.user_agent = ua;
      }
      let handle = tokio::spawn(async move { refresh_remote(&HttpFetcher, &url, &opts).await });
      pending.push((entry.id, entry.name, handle));
    } else {
      tracing::warn!(target: "biaosub::cli", source_id = %entry.id, "source has no content, file or url");
    }
  }

  for (id, name, handle) in pending {
    match handle.await.map_err(|e| anyhow!("fetch task for source {id} failed: {e}"))? {
      Ok(remote) => table.insert(id, &name, remote.links),
      Err(e) => {
        tracing::warn!(target: "biaosub::cli", source_id = %id, error = %e, "remote source unavailable, left out");
      }
    }
  }
  Ok(table)
}

fn pick_group(groups: &HashMap<String, GroupSpec>, requested: Option<&str>) -> Result<String> {
  if let Some(token) = requested {
    return Ok(token.to_string());
  }
  match groups.len() {
    1 => Ok(groups.keys().next().cloned().unwrap_or_default()),
    0 => bail!("workspace defines no groups"),
    _ => {
      let mut tokens: Vec<&str> = groups.keys().map(String::as_str).collect();
      tokens.sort_unstable();
      bail!("workspace defines several groups, pick one with --group: {}", tokens.join(", "))
    }
  }
}

pub async fn run(args: Args) -> Result<()> {
  let ws = load_workspace(&args.workspace).await?;
  let token = pick_group(&ws.groups, args.group.as_deref())?;
  let base_dir = args.workspace.parent().unwrap_or_else(|| Path::new("."));
  let table = build_table(ws.sources, base_dir, &args.fetch).await?;
  let groups = ws.groups;
  tracing::info!(target: "biaosub::cli", group = %token, sources = table.len(), "assembling");

  match args.format {
    Format::Clash => {
      let doc = assemble_group(&groups, &token, &table)?;
      print!("{doc}");
    }
    Format::Base64 => {
      let spec = groups
        .get(&token)
        .ok_or_else(|| anyhow!("group not found: {token}"))?;
      println!("{}", assemble_links(spec, &table));
    }
  }
  Ok(())
}
