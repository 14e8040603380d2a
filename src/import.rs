use crate::fetch::{FetchError, FetchOptions, RemoteFetch, SubscriptionInfo};
use crate::link_encode::stored_links;
use crate::node::Node;
use crate::subscription::{parse_subscription, Strategy};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error("remote subscription returned empty content")]
  EmptyContent,
  #[error("no nodes could be decoded from the remote subscription")]
  NoNodes,
}

/// Decoded remote subscription, ready to be stored.
#[derive(Debug, Clone)]
pub struct RemoteContent {
  pub nodes: Vec<Node>,
  /// Newline-separated links, the stored form of the source.
  pub links: String,
  pub info: SubscriptionInfo,
}

#[derive(Debug, Clone)]
pub struct RemoteImport {
  pub name: String,
  pub content: RemoteContent,
}

/// Fetches and decodes a remote subscription.
///
/// An empty body or one that yields no nodes is an error, never an empty
/// success.
pub async fn refresh_remote<F: RemoteFetch>(
  fetcher: &F,
  url: &str,
  opts: &FetchOptions,
) -> Result<RemoteContent, ImportError> {
  let fetched = fetcher.fetch(url, opts).await?;
  if fetched.body.trim().is_empty() {
    return Err(ImportError::EmptyContent);
  }
  let nodes = parse_subscription(&fetched.body, Strategy::REMOTE);
  if nodes.is_empty() {
    return Err(ImportError::NoNodes);
  }
  let mut info = fetched.info();
  info.node_count = Some(nodes.len());
  Ok(RemoteContent {
    links: stored_links(&nodes),
    nodes,
    info,
  })
}

/// Imports a remote subscription under `name`, falling back to the
/// provider's filename hint and then to a generated name.
pub async fn import_remote<F: RemoteFetch>(
  fetcher: &F,
  url: &str,
  name: Option<&str>,
  opts: &FetchOptions,
) -> Result<RemoteImport, ImportError> {
  let content = refresh_remote(fetcher, url, opts).await?;
  let name = name
    .map(str::trim)
    .filter(|n| !n.is_empty())
    .map(str::to_string)
    .or_else(|| content.info.file_name.clone().filter(|n| !n.trim().is_empty()))
    .unwrap_or_else(|| format!("Remote subscription ({} nodes)", content.nodes.len()));
  tracing::info!(target: "biaosub::import", name = %name, nodes = content.nodes.len(), "remote subscription imported");
  Ok(RemoteImport { name, content })
}

/// One stored entry produced from pasted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PastedEntry {
  pub name: String,
  pub content: String,
  #[serde(rename = "nodeCount")]
  pub node_count: usize,
}

/// Splits pasted text into stored entries.
///
/// Several nodes become one entry each, named `"<base> 1"`, `"<base> 2"`, …
/// when a base name is given and after the node otherwise. Anything else is
/// kept whole as a single entry.
pub fn pasted_entries(text: &str, base_name: Option<&str>) -> Vec<PastedEntry> {
  let base = base_name.map(str::trim).filter(|b| !b.is_empty());
  let nodes = parse_subscription(text, Strategy::PASTED);
  if nodes.len() > 1 {
    return nodes
      .iter()
      .enumerate()
      .map(|(i, n)| PastedEntry {
        name: match base {
          Some(b) => format!("{b} {}", i + 1),
          None => n.name.clone(),
        },
        content: n.link(),
        node_count: 1,
      })
      .collect();
  }
  let name = base
    .map(str::to_string)
    .or_else(|| nodes.first().map(|n| n.name.clone()))
    .unwrap_or_else(|| "New Resource".to_string());
  vec![PastedEntry {
    name,
    content: text.to_string(),
    node_count: nodes.len(),
  }]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::Fetched;
  use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION};

  struct Stub(Result<&'static str, u16>, Option<&'static str>);

  impl RemoteFetch for Stub {
    async fn fetch(&self, _url: &str, _opts: &FetchOptions) -> Result<Fetched, FetchError> {
      let body = self.0.map_err(FetchError::AccessDenied)?;
      let mut headers = HeaderMap::new();
      if let Some(d) = self.1 {
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(d));
      }
      Ok(Fetched {
        body: body.to_string(),
        headers,
      })
    }
  }

  const TWO: &str = "trojan://pw@a.example:443#a\ntrojan://pw@b.example:443#b\n";

  #[tokio::test]
  async fn empty_and_nodeless_bodies_fail() {
    let opts = FetchOptions::default();
    let err = import_remote(&Stub(Ok("  \n"), None), "https://x", None, &opts).await;
    assert!(matches!(err, Err(ImportError::EmptyContent)));
    let err = import_remote(&Stub(Ok("<html>nope</html>"), None), "https://x", None, &opts).await;
    assert!(matches!(err, Err(ImportError::NoNodes)));
  }

  #[tokio::test]
  async fn fetch_errors_pass_through() {
    let err = import_remote(&Stub(Err(403), None), "https://x", None, &FetchOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, ImportError::Fetch(FetchError::AccessDenied(403))));
    assert!(err.to_string().contains("403"));
  }

  #[tokio::test]
  async fn name_fallbacks() {
    let opts = FetchOptions::default();
    let named = import_remote(&Stub(Ok(TWO), Some("attachment; filename=Hint.yaml")), "u", Some("Mine"), &opts)
      .await
      .unwrap();
    assert_eq!(named.name, "Mine");
    assert_eq!(named.content.links, TWO.trim_end());
    assert_eq!(named.content.info.node_count, Some(2));

    let hinted = import_remote(&Stub(Ok(TWO), Some("attachment; filename=Hint.yaml")), "u", Some(" "), &opts)
      .await
      .unwrap();
    assert_eq!(hinted.name, "Hint");

    let bare = import_remote(&Stub(Ok(TWO), None), "u", None, &opts).await.unwrap();
    assert_eq!(bare.name, "Remote subscription (2 nodes)");
  }

  #[test]
  fn pasted_multi_node_split() {
    let entries = pasted_entries(TWO, Some("Batch"));
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "Batch 1");
    assert_eq!(entries[1].name, "Batch 2");
    assert_eq!(entries[1].content, "trojan://pw@b.example:443#b");

    let own = pasted_entries(TWO, None);
    assert_eq!(own[0].name, "a");
  }

  #[test]
  fn pasted_single_node_kept_whole() {
    let entries = pasted_entries("trojan://pw@a.example:443#solo", Some("Named"));
    assert_eq!(
      entries,
      vec![PastedEntry {
        name: "Named".into(),
        content: "trojan://pw@a.example:443#solo".into(),
        node_count: 1,
      }]
    );
    assert_eq!(pasted_entries("nothing here", None)[0].name, "New Resource");
  }
}
