use crate::node::{non_empty, to_bool, GrpcOpts, Node, Port, Protocol, RealityOpts, WsOpts};
use crate::peel::{decode_base64_to_utf8, is_base64_alphabet};
use percent_encoding::percent_decode_str;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use url::Url;

pub const DEFAULT_NAME: &str = "Node";

/// Link schemes recognized by `extract_links` and `parse_link`.
pub const SCHEMES: [&str; 11] = [
  "vmess",
  "vless",
  "ss",
  "shadowsocks",
  "trojan",
  "hysteria2",
  "hysteria",
  "hy2",
  "hy",
  "tuic",
  "anytls",
];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
  #[error("unsupported link scheme: {0}")]
  UnsupportedScheme(String),
  #[error("payload is not valid base64")]
  Base64,
  #[error("vmess payload is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("malformed link: {0}")]
  Uri(#[from] url::ParseError),
  #[error("link has no host")]
  MissingHost,
  #[error("link has no credentials")]
  MissingCredentials,
  #[error("invalid port: {0:?}")]
  InvalidPort(String),
}

fn percent_decode_to_string(s: &str) -> String {
  match percent_decode_str(s).decode_utf8() {
    Ok(cow) => cow.to_string(),
    Err(_) => s.to_string(),
  }
}

fn json_get_str(obj: &JsonValue, key: &str) -> String {
  let v = obj.get(key);
  if let Some(s) = v.and_then(|x| x.as_str()) {
    return s.trim().to_string();
  }
  if let Some(n) = v.and_then(|x| x.as_i64()) {
    return n.to_string();
  }
  if let Some(b) = v.and_then(|x| x.as_bool()) {
    return if b { "true".to_string() } else { "false".to_string() };
  }
  String::new()
}

fn json_get_port(obj: &JsonValue, key: &str) -> Port {
  match obj.get(key) {
    Some(JsonValue::Number(n)) => match n.as_u64() {
      Some(p) if p <= u16::MAX as u64 => Port::Num(p as u16),
      _ => Port::Raw(n.to_string()),
    },
    Some(JsonValue::String(s)) => Port::parse(s),
    _ => Port::Raw(String::new()),
  }
}

fn strip_brackets(host: &str) -> String {
  host.trim_start_matches('[').trim_end_matches(']').to_string()
}

/// Decodes one link into a `Node`, recording the input as `original_link`
/// and memoizing its re-encoded form.
pub fn parse_link(line: &str) -> Result<Node, DecodeError> {
  let s = line.trim();
  let Some((scheme, rest)) = s.split_once("://") else {
    return Err(DecodeError::UnsupportedScheme(s.chars().take(16).collect()));
  };
  let scheme = scheme.to_ascii_lowercase();
  let mut node = match scheme.as_str() {
    "vmess" => parse_vmess(rest)?,
    "ss" | "shadowsocks" => parse_ss(rest)?,
    "vless" | "trojan" | "hysteria2" | "hysteria" | "hy2" | "hy" | "tuic" | "anytls" => {
      parse_url_style(s)?
    }
    other => return Err(DecodeError::UnsupportedScheme(other.to_string())),
  };
  node.original_link = Some(s.to_string());
  node.refresh_link();
  Ok(node)
}

fn parse_vmess(payload: &str) -> Result<Node, DecodeError> {
  let json_text = decode_base64_to_utf8(payload).ok_or(DecodeError::Base64)?;
  let obj: JsonValue = serde_json::from_str(&json_text)?;

  let name = non_empty(&json_get_str(&obj, "ps")).unwrap_or_else(|| DEFAULT_NAME.to_string());
  let server = strip_brackets(&json_get_str(&obj, "add"));
  let mut node = Node::new(Protocol::Vmess, &name, &server, json_get_port(&obj, "port"));

  node.uuid = non_empty(&json_get_str(&obj, "id"));
  node.alter_id = Some(json_get_str(&obj, "aid").parse::<u32>().unwrap_or(0));
  node.cipher = Some(non_empty(&json_get_str(&obj, "scy")).unwrap_or_else(|| "auto".to_string()));
  let tls = json_get_str(&obj, "tls");
  node.tls = tls.eq_ignore_ascii_case("tls") || tls == "true";
  node.sni = non_empty(&json_get_str(&obj, "sni"));
  node.skip_cert_verify = to_bool(&json_get_str(&obj, "insecure"));

  let net = non_empty(&json_get_str(&obj, "net")).unwrap_or_else(|| "tcp".to_string());
  let path = json_get_str(&obj, "path");
  match net.as_str() {
    "ws" => {
      node.ws = Some(WsOpts {
        path: Some(non_empty(&path).unwrap_or_else(|| "/".to_string())),
        host: non_empty(&json_get_str(&obj, "host")).or_else(|| node.sni.clone()),
      });
    }
    "grpc" => {
      node.grpc = Some(GrpcOpts {
        service_name: path,
        mode: "gun".to_string(),
      });
    }
    _ => {}
  }
  node.network = Some(net);
  Ok(node)
}

/// Splits shadowsocks userinfo into `(cipher, password)`.
///
/// Userinfo without a colon that stays inside the base64 alphabet is treated
/// as the SIP002 encoded pair; anything else is read as literal
/// `cipher:password`, the remainder after the first colon being the password.
pub(crate) fn split_ss_userinfo(raw: &str) -> (Option<String>, Option<String>) {
  let user = percent_decode_to_string(raw);
  if !user.contains(':') && is_base64_alphabet(&user) {
    if let Some(decoded) = decode_base64_to_utf8(&user) {
      if let Some((c, p)) = decoded.split_once(':') {
        return (non_empty(c), Some(p.to_string()));
      }
    }
    return (None, Some(user));
  }
  match user.split_once(':') {
    Some((c, p)) => (non_empty(c), Some(p.to_string())),
    None => (non_empty(&user), None),
  }
}

fn split_host_port(raw: &str) -> Result<(String, Port), DecodeError> {
  let hp = raw.trim().trim_end_matches('/');
  let (host, port) = if let Some(inner) = hp.strip_prefix('[') {
    let (h, after) = inner.split_once(']').ok_or(DecodeError::MissingHost)?;
    let p = after.strip_prefix(':').ok_or_else(|| DecodeError::InvalidPort(after.to_string()))?;
    (h, p)
  } else {
    hp.rsplit_once(':').ok_or_else(|| DecodeError::InvalidPort(hp.to_string()))?
  };
  if host.trim().is_empty() {
    return Err(DecodeError::MissingHost);
  }
  let port: u16 = port
    .trim()
    .parse()
    .map_err(|_| DecodeError::InvalidPort(port.to_string()))?;
  Ok((host.trim().to_string(), Port::Num(port)))
}

fn parse_ss(rest: &str) -> Result<Node, DecodeError> {
  let (before_hash, fragment) = match rest.split_once('#') {
    Some((a, b)) => (a, Some(b)),
    None => (rest, None),
  };
  let name = fragment
    .map(percent_decode_to_string)
    .and_then(|s| non_empty(&s))
    .unwrap_or_else(|| DEFAULT_NAME.to_string());

  // plugin options live in the query and are not modelled
  let main = before_hash.split('?').next().unwrap_or("").trim().trim_end_matches('/');
  if main.is_empty() {
    return Err(DecodeError::MissingHost);
  }

  let (userinfo, host_part) = match main.rsplit_once('@') {
    Some((a, b)) => (a.to_string(), b.to_string()),
    None => {
      let decoded = decode_base64_to_utf8(main).ok_or(DecodeError::Base64)?;
      let (a, b) = decoded.rsplit_once('@').ok_or(DecodeError::MissingCredentials)?;
      (a.to_string(), b.to_string())
    }
  };

  let (cipher, password) = split_ss_userinfo(&userinfo);
  let (host, port) = split_host_port(&host_part)?;
  let mut node = Node::new(Protocol::Shadowsocks, &name, &host, port);
  node.cipher = cipher;
  node.password = password;
  Ok(node)
}

fn query_params(u: &Url) -> HashMap<String, String> {
  let mut params = HashMap::new();
  for (k, v) in u.query_pairs() {
    params.entry(k.to_string()).or_insert_with(|| v.to_string());
  }
  params
}

fn param(params: &HashMap<String, String>, key: &str) -> Option<String> {
  params.get(key).and_then(|v| non_empty(v))
}

fn apply_grpc(node: &mut Node, params: &HashMap<String, String>) {
  if node.network.as_deref() == Some("grpc") || params.contains_key("serviceName") {
    node.network = Some("grpc".to_string());
    node.grpc = Some(GrpcOpts {
      service_name: param(params, "serviceName")
        .or_else(|| param(params, "path"))
        .unwrap_or_default(),
      mode: param(params, "mode").unwrap_or_else(|| "gun".to_string()),
    });
  }
}

fn parse_url_style(link: &str) -> Result<Node, DecodeError> {
  let u = Url::parse(link)?;
  let protocol = Protocol::from_name(u.scheme());
  let host = strip_brackets(u.host_str().unwrap_or("").trim());
  if host.is_empty() {
    return Err(DecodeError::MissingHost);
  }
  let name = u
    .fragment()
    .map(percent_decode_to_string)
    .and_then(|s| non_empty(&s))
    .unwrap_or_else(|| DEFAULT_NAME.to_string());
  let user = percent_decode_to_string(u.username());
  let pass = u.password().map(percent_decode_to_string);
  // the URL parser splits a secret at its first colon; glue it back
  let secret = match &pass {
    Some(p) => format!("{user}:{p}"),
    None => user.clone(),
  };
  let params = query_params(&u);

  let mut node = Node::new(protocol, &name, &host, Port::Num(u.port().unwrap_or(443)));

  if let Some(v) = param(&params, "sni") {
    node.sni = Some(v);
  }
  if let Some(v) = param(&params, "peer") {
    node.sni = Some(v);
  }
  let security = param(&params, "security").map(|s| s.to_ascii_lowercase());
  if let Some(sec) = &security {
    node.tls = sec == "tls" || sec == "reality";
    node.reality_enabled = sec == "reality";
  }
  node.network = param(&params, "type");
  node.flow = param(&params, "flow");
  node.client_fingerprint = param(&params, "fp");
  node.alpn = param(&params, "alpn");
  if params.contains_key("insecure") || params.contains_key("allowInsecure") {
    node.skip_cert_verify = params.get("insecure").map(|v| to_bool(v)).unwrap_or(false)
      || params.get("allowInsecure").map(|v| to_bool(v)).unwrap_or(false);
  }
  if let Some(pbk) = param(&params, "pbk") {
    node.reality = Some(RealityOpts {
      public_key: pbk,
      short_id: param(&params, "sid"),
    });
    node.tls = true;
  }
  let path = param(&params, "path");
  let ws_host = param(&params, "host");
  if path.is_some() || ws_host.is_some() {
    node.ws = Some(WsOpts {
      path,
      host: ws_host,
    });
  }

  match protocol {
    Protocol::Vless => {
      node.uuid = non_empty(&user);
      if node.network.is_none() {
        node.network = Some("tcp".to_string());
      }
      apply_grpc(&mut node, &params);
    }
    Protocol::Trojan => {
      node.password = non_empty(&secret);
      if security.is_none() {
        node.tls = true;
      }
      apply_grpc(&mut node, &params);
    }
    Protocol::Hysteria2 => {
      node.password = non_empty(&secret);
      node.obfs = param(&params, "obfs");
      node.obfs_password = param(&params, "obfs-password");
      node.ports = param(&params, "mport");
    }
    Protocol::Tuic => {
      match user.split_once(':') {
        Some((id, pw)) => {
          node.uuid = non_empty(id);
          node.password = Some(pw.to_string());
        }
        None => {
          node.uuid = non_empty(&user);
          node.password = pass.clone();
        }
      }
      node.congestion_controller = param(&params, "congestion_control");
      node.udp_relay_mode = param(&params, "udp_relay_mode");
    }
    Protocol::AnyTls => {
      node.password = non_empty(&secret);
      node.udp = true;
      if node.client_fingerprint.is_none() {
        node.client_fingerprint = Some("chrome".to_string());
      }
    }
    _ => return Err(DecodeError::UnsupportedScheme(u.scheme().to_string())),
  }
  Ok(node)
}

fn find_link_start(token: &str) -> Option<usize> {
  let lower = token.to_ascii_lowercase();
  let bytes = lower.as_bytes();
  let mut best: Option<usize> = None;
  for scheme in SCHEMES {
    let pat = format!("{scheme}://");
    let mut from = 0;
    while let Some(rel) = lower[from..].find(&pat) {
      let pos = from + rel;
      let boundary = pos == 0 || !bytes[pos - 1].is_ascii_alphanumeric();
      if boundary && token.len() > pos + pat.len() {
        if best.map_or(true, |b| pos < b) {
          best = Some(pos);
        }
        break;
      }
      from = pos + 1;
    }
  }
  best
}

/// Finds every link-looking substring in `text`, in order, without repeats.
pub fn extract_links(text: &str) -> Vec<&str> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for token in text.split(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
    if let Some(start) = find_link_start(token) {
      let link = &token[start..];
      if seen.insert(link) {
        out.push(link);
      }
    }
  }
  out
}

/// One link per line: a trimmed line opening with a known scheme is taken
/// whole, so display names may contain spaces.
pub fn extract_line_links(text: &str) -> Vec<&str> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for line in text.lines() {
    let line = line.trim();
    if find_link_start(line) == Some(0) && seen.insert(line) {
      out.push(line);
    }
  }
  out
}

fn preview(s: &str) -> String {
  s.chars().take(64).collect()
}

fn decode_each(links: Vec<&str>) -> Vec<Node> {
  let mut out = Vec::new();
  for link in links {
    match parse_link(link) {
      Ok(node) => out.push(node),
      Err(e) => {
        tracing::debug!(target: "biaosub::decode", link = %preview(link), error = %e, "skipping undecodable link");
      }
    }
  }
  out
}

/// Decodes every link found in `text`. Undecodable links are skipped and
/// reported on the `biaosub::decode` target.
pub fn decode_links(text: &str) -> Vec<Node> {
  decode_each(extract_links(text))
}

/// Like `decode_links`, but reads one whole link per line.
pub fn decode_line_links(text: &str) -> Vec<Node> {
  decode_each(extract_line_links(text))
}
