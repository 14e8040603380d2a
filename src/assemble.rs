use crate::clash::{to_proxy_block, yaml_str};
use crate::link_encode::render_link_list;
use crate::node::Node;
use crate::subscription::{parse_subscription, Strategy};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Routing tokens that are always valid group members.
pub const RESERVED_MEMBERS: [&str; 3] = ["DIRECT", "REJECT", "NO-RESOLVE"];

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
  #[error("group not found: {0}")]
  GroupNotFound(String),
}

/// Source identifier. Stored configurations use numbers and strings
/// interchangeably, so both deserialize to the same textual key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl<'de> Deserialize<'de> for SourceId {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Int(i64),
      Text(String),
    }
    Ok(match Raw::deserialize(d)? {
      Raw::Int(n) => SourceId(n.to_string()),
      Raw::Text(s) => SourceId(s.trim().to_string()),
    })
  }
}

impl From<&str> for SourceId {
  fn from(s: &str) -> Self {
    SourceId(s.trim().to_string())
  }
}

impl From<i64> for SourceId {
  fn from(n: i64) -> Self {
    SourceId(n.to_string())
  }
}

impl fmt::Display for SourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DialerProxy {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub group: String,
}

/// One source taking part in a group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceRef {
  #[serde(rename = "subId")]
  pub sub_id: SourceId,
  /// Node names to keep. Empty or absent keeps every node.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub include: Option<Vec<String>>,
  #[serde(rename = "dialerProxy", default, skip_serializing_if = "Option::is_none")]
  pub dialer_proxy: Option<DialerProxy>,
}

impl SourceRef {
  pub fn new(sub_id: impl Into<SourceId>) -> SourceRef {
    SourceRef {
      sub_id: sub_id.into(),
      include: None,
      dialer_proxy: None,
    }
  }

  fn allows(&self, name: &str) -> bool {
    match &self.include {
      Some(names) if !names.is_empty() => names.iter().any(|n| n == name),
      _ => true,
    }
  }

  fn dialer_group(&self) -> Option<&str> {
    self
      .dialer_proxy
      .as_ref()
      .filter(|d| d.enabled && !d.group.trim().is_empty())
      .map(|d| d.group.as_str())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  #[default]
  Generate,
  Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyGroupDef {
  pub name: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub proxies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClashSettings {
  #[serde(default)]
  pub mode: Mode,
  #[serde(default)]
  pub header: String,
  #[serde(default)]
  pub groups: Option<Vec<ProxyGroupDef>>,
  #[serde(default)]
  pub rules: String,
  /// Overrides the group's default source list when non-empty.
  #[serde(default)]
  pub resources: Option<Vec<SourceRef>>,
  #[serde(default)]
  pub raw_yaml: String,
}

/// Stored definition of one output group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GroupSpec {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub config: Vec<SourceRef>,
  #[serde(default)]
  pub clash_config: ClashSettings,
}

impl GroupSpec {
  pub fn effective_sources(&self) -> &[SourceRef] {
    match &self.clash_config.resources {
      Some(r) if !r.is_empty() => r,
      _ => &self.config,
    }
  }
}

/// Supplies stored source text and display names to the assembler.
pub trait SourceResolver {
  /// Raw text of the source, `None` when it is unknown.
  fn content(&self, id: &SourceId) -> Option<String>;
  fn display_name(&self, id: &SourceId) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct SourceRecord {
  pub name: String,
  pub content: String,
}

/// In-memory resolver over already materialized sources.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
  records: HashMap<SourceId, SourceRecord>,
}

impl SourceTable {
  pub fn new() -> SourceTable {
    SourceTable::default()
  }

  pub fn insert(&mut self, id: impl Into<SourceId>, name: &str, content: impl Into<String>) {
    self.records.insert(
      id.into(),
      SourceRecord {
        name: name.to_string(),
        content: content.into(),
      },
    );
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

impl SourceResolver for SourceTable {
  fn content(&self, id: &SourceId) -> Option<String> {
    self.records.get(id).map(|r| r.content.clone())
  }

  fn display_name(&self, id: &SourceId) -> Option<String> {
    self
      .records
      .get(id)
      .map(|r| r.name.clone())
      .filter(|n| !n.is_empty())
  }
}

/// Nodes of every source in source-list order, uniquely named, each paired
/// with the index of the source it came from.
struct Merged {
  nodes: Vec<(usize, Node)>,
}

fn unique_name(base: &str, taken: &HashSet<String>) -> String {
  if !taken.contains(base) {
    return base.to_string();
  }
  let mut i = 1;
  loop {
    let candidate = format!("{base} {i}");
    if !taken.contains(&candidate) {
      return candidate;
    }
    i += 1;
  }
}

fn merge_sources(sources: &[SourceRef], resolver: &impl SourceResolver) -> Merged {
  let mut taken = HashSet::new();
  let mut nodes = Vec::new();
  for (idx, source) in sources.iter().enumerate() {
    let Some(content) = resolver.content(&source.sub_id) else {
      tracing::warn!(target: "biaosub::assemble", source_id = %source.sub_id, "source not found, skipped");
      continue;
    };
    let decoded = parse_subscription(&content, Strategy::PASTED);
    tracing::debug!(target: "biaosub::assemble", source_id = %source.sub_id, count = decoded.len(), "source decoded");
    let dialer = source.dialer_group();
    for mut node in decoded {
      if !source.allows(&node.name) {
        continue;
      }
      let name = unique_name(node.name.trim(), &taken);
      taken.insert(name.clone());
      node.rename(&name);
      node.dialer_proxy = dialer.map(str::to_string);
      nodes.push((idx, node));
    }
  }
  Merged { nodes }
}

/// Builds the final Clash document for `spec`.
///
/// Raw mode returns the stored document untouched. Otherwise the sources
/// are decoded, filtered, renamed to unique names and serialized, and each
/// declared proxy group gets its members resolved against group names,
/// source names and node names.
pub fn assemble(spec: &GroupSpec, resolver: &impl SourceResolver) -> String {
  let cfg = &spec.clash_config;
  if cfg.mode == Mode::Raw {
    return cfg.raw_yaml.clone();
  }
  let sources = spec.effective_sources();
  if sources.is_empty() {
    return format!("{}\n\nproxies:\n\nproxy-groups:\n\n{}", cfg.header, cfg.rules);
  }

  let merged = merge_sources(sources, resolver);

  let mut doc = format!("{}\n\nproxies:\n", cfg.header);
  let mut generated: HashSet<&str> = HashSet::new();
  let ordered = merged
    .nodes
    .iter()
    .filter(|(_, n)| n.dialer_proxy.is_none())
    .chain(merged.nodes.iter().filter(|(_, n)| n.dialer_proxy.is_some()));
  for (_, node) in ordered {
    let Some(block) = to_proxy_block(node) else {
      continue;
    };
    doc.push_str(&block);
    if let Some(group) = &node.dialer_proxy {
      doc.push_str("\n    dialer-proxy: ");
      doc.push_str(&yaml_str(group));
    }
    doc.push('\n');
    generated.insert(node.name.as_str());
  }

  // source display name -> serialized node names, in accumulation order
  let mut by_source: HashMap<String, Vec<&str>> = HashMap::new();
  for (idx, node) in &merged.nodes {
    if !generated.contains(node.name.as_str()) {
      continue;
    }
    let Some(source_name) = resolver.display_name(&sources[*idx].sub_id) else {
      continue;
    };
    let names = by_source.entry(source_name).or_default();
    if !names.contains(&node.name.as_str()) {
      names.push(node.name.as_str());
    }
  }

  doc.push_str("\nproxy-groups:\n");
  if let Some(groups) = &cfg.groups {
    let group_names: HashSet<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    for g in groups {
      doc.push_str(&format!(
        "  - name: {}\n    type: {}\n    proxies:\n",
        yaml_str(&g.name),
        yaml_str(&g.kind)
      ));
      for member in &g.proxies {
        let m = member.as_str();
        if group_names.contains(m) && m != g.name {
          doc.push_str(&format!("      - {}\n", yaml_str(m)));
        } else if let Some(names) = by_source.get(m).filter(|n| !n.is_empty()) {
          for name in names {
            doc.push_str(&format!("      - {}\n", yaml_str(name)));
          }
        } else if generated.contains(m) || RESERVED_MEMBERS.contains(&m) {
          doc.push_str(&format!("      - {}\n", yaml_str(m)));
        } else {
          tracing::debug!(target: "biaosub::assemble", group = %g.name, member = m, "unresolvable group member omitted");
        }
      }
    }
  }
  doc.push('\n');
  doc.push_str(&cfg.rules);
  doc
}

/// Looks a group up by token and assembles it.
pub fn assemble_group(
  groups: &HashMap<String, GroupSpec>,
  token: &str,
  resolver: &impl SourceResolver,
) -> Result<String, AssembleError> {
  let spec = groups
    .get(token)
    .ok_or_else(|| AssembleError::GroupNotFound(token.to_string()))?;
  Ok(assemble(spec, resolver))
}

/// The group's merged node set as a base64 link subscription. The stored
/// document mode is irrelevant here; sources are always decoded.
pub fn assemble_links(spec: &GroupSpec, resolver: &impl SourceResolver) -> String {
  let merged = merge_sources(spec.effective_sources(), resolver);
  let nodes: Vec<Node> = merged.nodes.into_iter().map(|(_, n)| n).collect();
  render_link_list(&nodes)
}
