use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_DISPOSITION};
use reqwest::{Client, Proxy, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Clash-flavoured agents get block-style documents from most providers.
pub const DEFAULT_USER_AGENT: &str = "clash-verge/v1.7.7";
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const MAX_REDIRECTS: usize = 10;

pub const USERINFO_HEADER: &str = "subscription-userinfo";

#[derive(Debug, Clone)]
pub struct FetchOptions {
  pub user_agent: String,
  pub timeout_ms: u64,
  /// Optional HTTP proxy the request is sent through.
  pub proxy_url: Option<String>,
}

impl Default for FetchOptions {
  fn default() -> Self {
    FetchOptions {
      user_agent: DEFAULT_USER_AGENT.to_string(),
      timeout_ms: DEFAULT_TIMEOUT_MS,
      proxy_url: None,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("request timed out ({0} ms)")]
  Timeout(u64),
  #[error(
    "remote server refused access ({0}); the provider may be blocking this network. \
     Copy the subscription content by hand and import it as pasted nodes instead"
  )]
  AccessDenied(u16),
  #[error("HTTP {status}: {reason}")]
  Status { status: u16, reason: String },
  #[error("request failed: {0}")]
  Transport(#[source] reqwest::Error),
  #[error("failed to read response body: {0}")]
  Body(#[source] reqwest::Error),
}

/// Body and headers of a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
  pub body: String,
  pub headers: HeaderMap,
}

impl Fetched {
  pub fn info(&self) -> SubscriptionInfo {
    SubscriptionInfo::from_headers(&self.headers)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
  Int(i64),
  Text(String),
}

/// Traffic accounting and naming hints sent alongside a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
  #[serde(flatten)]
  pub usage: BTreeMap<String, InfoValue>,
  #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
  pub file_name: Option<String>,
  #[serde(rename = "nodeCount", skip_serializing_if = "Option::is_none")]
  pub node_count: Option<usize>,
}

impl SubscriptionInfo {
  pub fn from_headers(headers: &HeaderMap) -> SubscriptionInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    SubscriptionInfo {
      usage: header(USERINFO_HEADER).map(parse_userinfo_header).unwrap_or_default(),
      file_name: header(CONTENT_DISPOSITION.as_str()).and_then(parse_filename),
      node_count: None,
    }
  }
}

/// Parses `upload=1; download=2; total=3; expire=4` pairs. Values that are
/// not integers are kept as text; empty keys or values are dropped.
pub fn parse_userinfo_header(raw: &str) -> BTreeMap<String, InfoValue> {
  let mut out = BTreeMap::new();
  for part in raw.split(';') {
    let mut kv = part.split('=').map(str::trim);
    let (Some(key), Some(val)) = (kv.next(), kv.next()) else {
      continue;
    };
    if key.is_empty() || val.is_empty() {
      continue;
    }
    let value = match val.parse::<i64>() {
      Ok(n) => InfoValue::Int(n),
      Err(_) => InfoValue::Text(val.to_string()),
    };
    out.insert(key.to_string(), value);
  }
  out
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
  let head = s.get(..prefix.len())?;
  head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn filename_value(after_key: &str) -> Option<&str> {
  let rest = after_key.strip_prefix('*').unwrap_or(after_key);
  let rest = rest.strip_prefix('=')?;
  let rest = strip_prefix_ignore_case(rest, "UTF-8''").unwrap_or(rest);
  let rest = rest.strip_prefix(['"', '\'']).unwrap_or(rest);
  let end = rest.find(['"', '\'', ';', '\n']).unwrap_or(rest.len());
  let value = &rest[..end];
  (!value.is_empty()).then_some(value)
}

/// Extracts the filename hint from a `Content-Disposition` value, with a
/// `.yaml` suffix removed and percent-escapes decoded where valid.
pub fn parse_filename(disposition: &str) -> Option<String> {
  let lower = disposition.to_ascii_lowercase();
  let raw = lower
    .match_indices("filename")
    .find_map(|(pos, key)| filename_value(&disposition[pos + key.len()..]))?;
  let stem = match raw.len().checked_sub(5) {
    Some(cut) if raw.is_char_boundary(cut) && raw[cut..].eq_ignore_ascii_case(".yaml") => &raw[..cut],
    _ => raw,
  };
  Some(match percent_decode_str(stem).decode_utf8() {
    Ok(s) => s.into_owned(),
    Err(_) => stem.to_string(),
  })
}

/// Retrieves subscription text from a URL.
pub trait RemoteFetch {
  fn fetch(
    &self,
    url: &str,
    opts: &FetchOptions,
  ) -> impl Future<Output = Result<Fetched, FetchError>> + Send;
}

/// `RemoteFetch` backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher;

fn build_client(opts: &FetchOptions) -> Result<Client, reqwest::Error> {
  let mut builder = Client::builder()
    .user_agent(opts.user_agent.as_str())
    .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
    .timeout(Duration::from_millis(opts.timeout_ms.max(1)));
  if let Some(p) = opts.proxy_url.as_deref().filter(|p| !p.trim().is_empty()) {
    builder = builder.proxy(Proxy::all(p)?);
  }
  builder.build()
}

fn host_of(url: &str) -> String {
  url::Url::parse(url)
    .ok()
    .and_then(|u| u.host_str().map(str::to_string))
    .unwrap_or_default()
}

fn classify(e: reqwest::Error, timeout_ms: u64, body: bool) -> FetchError {
  if e.is_timeout() {
    FetchError::Timeout(timeout_ms)
  } else if body {
    FetchError::Body(e)
  } else {
    FetchError::Transport(e)
  }
}

impl RemoteFetch for HttpFetcher {
  async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<Fetched, FetchError> {
    let timeout_ms = opts.timeout_ms.max(1);
    let client = build_client(opts).map_err(FetchError::Transport)?;
    let work = async {
      let res = client
        .get(url)
        .header(ACCEPT, "*/*")
        .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
        .map_err(|e| classify(e, timeout_ms, false))?;

      let status = res.status();
      if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FetchError::AccessDenied(status.as_u16()));
      }
      if !status.is_success() {
        return Err(FetchError::Status {
          status: status.as_u16(),
          reason: status.canonical_reason().unwrap_or_default().to_string(),
        });
      }
      let headers = res.headers().clone();
      let body = res.text().await.map_err(|e| classify(e, timeout_ms, true))?;
      Ok(Fetched { body, headers })
    };

    // the client timeout and this outer deadline report identically
    let out = match tokio::time::timeout(Duration::from_millis(timeout_ms), work).await {
      Ok(r) => r,
      Err(_) => Err(FetchError::Timeout(timeout_ms)),
    };
    match &out {
      Ok(f) => {
        tracing::info!(target: "biaosub::fetch", host = %host_of(url), bytes = f.body.len(), "fetched subscription");
      }
      Err(e) => {
        tracing::warn!(target: "biaosub::fetch", host = %host_of(url), error = %e, "subscription fetch failed");
      }
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::HeaderValue;

  #[test]
  fn userinfo_pairs() {
    let info = parse_userinfo_header("upload=123; download=456;total=1073741824; expire=; plan=pro; junk");
    assert_eq!(info.get("upload"), Some(&InfoValue::Int(123)));
    assert_eq!(info.get("total"), Some(&InfoValue::Int(1_073_741_824)));
    assert_eq!(info.get("plan"), Some(&InfoValue::Text("pro".into())));
    assert!(!info.contains_key("expire"));
    assert!(!info.contains_key("junk"));
  }

  #[test]
  fn filename_variants() {
    assert_eq!(
      parse_filename("attachment; filename*=UTF-8''My%20Sub.yaml; filename=\"x.yaml\"").as_deref(),
      Some("My Sub")
    );
    assert_eq!(parse_filename("attachment; filename=\"plain.YAML\"").as_deref(), Some("plain"));
    assert_eq!(parse_filename("inline; FILENAME='Quoted Name'").as_deref(), Some("Quoted Name"));
    assert_eq!(parse_filename("attachment; filename=bad%ZZ.txt").as_deref(), Some("bad%ZZ.txt"));
    assert_eq!(parse_filename("attachment; filename=\"\"; filename=second").as_deref(), Some("second"));
    assert_eq!(parse_filename("attachment"), None);
  }

  #[test]
  fn info_from_headers_serializes_flat() {
    let mut headers = HeaderMap::new();
    headers.insert(
      USERINFO_HEADER,
      HeaderValue::from_static("upload=1; download=2; total=3; expire=4"),
    );
    headers.insert(
      CONTENT_DISPOSITION,
      HeaderValue::from_static("attachment; filename*=UTF-8''Airport.yaml"),
    );
    let mut info = Fetched {
      body: String::new(),
      headers,
    }
    .info();
    info.node_count = Some(2);
    let v = serde_json::to_value(&info).unwrap();
    assert_eq!(v["upload"], 1);
    assert_eq!(v["expire"], 4);
    assert_eq!(v["fileName"], "Airport");
    assert_eq!(v["nodeCount"], 2);
  }

  #[test]
  fn access_denied_message_is_actionable() {
    let msg = FetchError::AccessDenied(403).to_string();
    assert!(msg.contains("403"));
    assert!(msg.contains("pasted nodes"));
    assert_eq!(FetchError::Timeout(15_000).to_string(), "request timed out (15000 ms)");
  }

  #[test]
  fn defaults() {
    let o = FetchOptions::default();
    assert_eq!(o.user_agent, "clash-verge/v1.7.7");
    assert_eq!(o.timeout_ms, 15_000);
    assert!(build_client(&o).is_ok());
  }
}
