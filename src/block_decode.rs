//! Best-effort reader for Clash-style `proxies:` lists.
//!
//! Entries are cut out of the document by indentation, tokenized into a small
//! tree of scalars, mappings and sequences, and projected onto `Node`. Keys
//! the projection does not know about are ignored, and nothing outside the
//! proxy list is interpreted.

use crate::link_decode::DEFAULT_NAME;
use crate::node::{non_empty, to_bool, GrpcOpts, Node, Port, Protocol, RealityOpts, WsOpts};

/// `type` values that describe groups or built-in outbounds rather than
/// endpoints.
const NON_ENDPOINT_TYPES: [&str; 7] = [
  "selector",
  "url-test",
  "fallback",
  "direct",
  "reject",
  "load-balance",
  "compatible",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Scalar(String),
  Map(Vec<(String, Value)>),
  List(Vec<Value>),
}

impl Value {
  pub fn get(&self, key: &str) -> Option<&Value> {
    match self {
      Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
      _ => None,
    }
  }

  /// Scalar text, or a comma-joined rendering of a scalar list.
  pub fn text(&self) -> Option<String> {
    match self {
      Value::Scalar(s) => non_empty(s),
      Value::List(items) => {
        let parts: Vec<String> = items.iter().filter_map(|v| v.text()).collect();
        if parts.is_empty() {
          None
        } else {
          Some(parts.join(","))
        }
      }
      Value::Map(_) => None,
    }
  }
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
  indent: usize,
  text: &'a str,
}

fn indent_of(line: &str) -> usize {
  line.len() - line.trim_start().len()
}

fn is_top_level_proxies(line: &str) -> bool {
  if indent_of(line) != 0 {
    return false;
  }
  match line.strip_prefix("proxies:") {
    Some(rest) => {
      let rest = rest.trim();
      rest.is_empty() || rest.starts_with('#')
    }
    None => false,
  }
}

/// Cuts the raw lines of each entry under the top-level `proxies:` key.
fn collect_blocks(text: &str) -> Vec<Vec<&str>> {
  let mut blocks = Vec::new();
  let mut in_list = false;
  let mut current: Vec<&str> = Vec::new();
  let mut baseline = 0usize;

  for line in text.lines() {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    if !in_list {
      in_list = is_top_level_proxies(line);
      continue;
    }
    let indent = indent_of(line);
    if trimmed.starts_with('-') && (current.is_empty() || indent <= baseline) {
      if !current.is_empty() {
        blocks.push(std::mem::take(&mut current));
      }
      current.push(line);
      baseline = indent;
    } else if !current.is_empty() && indent > baseline {
      current.push(line);
    } else {
      if !current.is_empty() {
        blocks.push(std::mem::take(&mut current));
      }
      in_list = is_top_level_proxies(line);
    }
  }
  if !current.is_empty() {
    blocks.push(current);
  }
  blocks
}

/// Finds the `key:` separator in a line, returning `(key, rest)`.
fn split_key(text: &str) -> Option<(String, &str)> {
  let t = text.trim_start();
  if let Some(q) = t.chars().next().filter(|c| *c == '"' || *c == '\'') {
    let inner = &t[1..];
    let end = inner.find(q)?;
    let after = inner[end + 1..].trim_start();
    let rest = after.strip_prefix(':')?;
    return Some((inner[..end].to_string(), rest.trim()));
  }
  let bytes = t.as_bytes();
  for (i, b) in bytes.iter().enumerate() {
    if *b != b':' {
      continue;
    }
    let at_end = i + 1 == bytes.len();
    if at_end || bytes[i + 1] == b' ' || bytes[i + 1] == b'\t' {
      let key = t[..i].trim();
      if key.is_empty() || key.starts_with('{') || key.starts_with('[') {
        return None;
      }
      return Some((key.to_string(), t[i + 1..].trim()));
    }
  }
  None
}

/// Rewrites `- key: value` so the mapping starts on its own virtual line
/// at the column of `key`.
fn normalize_lines<'a>(raw: &[&'a str]) -> Vec<Line<'a>> {
  let mut out = Vec::with_capacity(raw.len() + 4);
  for l in raw {
    let mut indent = indent_of(l);
    let mut text = l.trim();
    loop {
      let Some(rest) = text.strip_prefix('-') else { break };
      if !(rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t')) {
        break;
      }
      let item = rest.trim_start();
      let col = indent + (text.len() - item.len());
      let nested = item.starts_with("- ") || item == "-";
      let mapping = !item.starts_with('{') && !item.starts_with('[') && split_key(item).is_some();
      if nested || mapping {
        out.push(Line { indent, text: "-" });
        indent = col;
        text = item;
        if mapping {
          break;
        }
      } else {
        break;
      }
    }
    out.push(Line { indent, text });
  }
  out
}

fn unquote_double(s: &str) -> (String, &str) {
  let mut out = String::new();
  let mut chars = s.char_indices().skip(1);
  while let Some((i, c)) = chars.next() {
    match c {
      '\\' => {
        if let Some((_, e)) = chars.next() {
          match e {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            other => out.push(other),
          }
        }
      }
      '"' => return (out, &s[i + 1..]),
      other => out.push(other),
    }
  }
  (out, "")
}

fn unquote_single(s: &str) -> (String, &str) {
  let mut out = String::new();
  let body = &s[1..];
  let mut idx = 0;
  let bytes = body.as_bytes();
  while idx < bytes.len() {
    if bytes[idx] == b'\'' {
      if bytes.get(idx + 1) == Some(&b'\'') {
        out.push('\'');
        idx += 2;
        continue;
      }
      return (out, &body[idx + 1..]);
    }
    let ch = body[idx..].chars().next().unwrap_or_default();
    out.push(ch);
    idx += ch.len_utf8();
  }
  (out, "")
}

fn strip_comment(s: &str) -> &str {
  match s.find(" #").or_else(|| s.find("\t#")) {
    Some(i) => s[..i].trim_end(),
    None => s,
  }
}

/// Parses the value part of a `key: value` line.
fn parse_inline(rest: &str) -> Value {
  let t = rest.trim();
  if t.starts_with('{') || t.starts_with('[') {
    let mut p = FlowParser { s: t, pos: 0 };
    return p.value();
  }
  if t.starts_with('"') {
    return Value::Scalar(unquote_double(t).0);
  }
  if t.starts_with('\'') {
    return Value::Scalar(unquote_single(t).0);
  }
  Value::Scalar(strip_comment(t).trim().to_string())
}

/// Parser for flow collections: `{a: 1, b: [x, y]}`.
struct FlowParser<'a> {
  s: &'a str,
  pos: usize,
}

impl<'a> FlowParser<'a> {
  fn rest(&self) -> &'a str {
    &self.s[self.pos..]
  }

  fn skip_ws(&mut self) {
    let r = self.rest();
    self.pos += r.len() - r.trim_start().len();
  }

  fn peek(&self) -> Option<char> {
    self.rest().chars().next()
  }

  fn eat(&mut self, c: char) -> bool {
    self.skip_ws();
    if self.peek() == Some(c) {
      self.pos += c.len_utf8();
      true
    } else {
      false
    }
  }

  fn scalar(&mut self, stops: &[char]) -> String {
    self.skip_ws();
    let r = self.rest();
    if r.starts_with('"') {
      let (v, after) = unquote_double(r);
      self.pos += r.len() - after.len();
      return v;
    }
    if r.starts_with('\'') {
      let (v, after) = unquote_single(r);
      self.pos += r.len() - after.len();
      return v;
    }
    let end = r.find(|c: char| stops.contains(&c)).unwrap_or(r.len());
    self.pos += end;
    r[..end].trim().to_string()
  }

  fn value(&mut self) -> Value {
    self.skip_ws();
    match self.peek() {
      Some('{') => {
        self.pos += 1;
        let mut entries = Vec::new();
        loop {
          if self.eat('}') || self.rest().is_empty() {
            break;
          }
          let key = self.scalar(&[':', ',', '}']);
          let val = if self.eat(':') {
            self.value()
          } else {
            Value::Scalar(String::new())
          };
          if !key.is_empty() {
            entries.push((key, val));
          }
          if !self.eat(',') {
            self.eat('}');
            break;
          }
        }
        Value::Map(entries)
      }
      Some('[') => {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
          if self.eat(']') || self.rest().is_empty() {
            break;
          }
          items.push(self.value());
          if !self.eat(',') {
            self.eat(']');
            break;
          }
        }
        Value::List(items)
      }
      _ => Value::Scalar(self.scalar(&[',', '}', ']'])),
    }
  }
}

fn parse_nested(lines: &[Line], pos: &mut usize, indent: usize) -> Value {
  if lines[*pos].text.starts_with('-') {
    Value::List(parse_sequence(lines, pos, indent))
  } else {
    Value::Map(parse_mapping(lines, pos, indent))
  }
}

fn parse_sequence(lines: &[Line], pos: &mut usize, indent: usize) -> Vec<Value> {
  let mut items = Vec::new();
  while *pos < lines.len() {
    let line = lines[*pos];
    if line.indent != indent || !line.text.starts_with('-') {
      break;
    }
    *pos += 1;
    let rest = line.text[1..].trim();
    if rest.is_empty() {
      if *pos < lines.len() && lines[*pos].indent > indent {
        let child = lines[*pos].indent;
        items.push(parse_nested(lines, pos, child));
      } else {
        items.push(Value::Scalar(String::new()));
      }
    } else {
      items.push(parse_inline(rest));
    }
  }
  items
}

fn parse_mapping(lines: &[Line], pos: &mut usize, indent: usize) -> Vec<(String, Value)> {
  let mut entries = Vec::new();
  while *pos < lines.len() {
    let line = lines[*pos];
    if line.indent < indent || (line.indent == indent && line.text.starts_with('-')) {
      break;
    }
    *pos += 1;
    if line.indent > indent {
      continue;
    }
    let Some((key, rest)) = split_key(line.text) else {
      continue;
    };
    let value = if !rest.is_empty() && !rest.starts_with('#') {
      parse_inline(rest)
    } else if *pos < lines.len() && lines[*pos].indent > indent {
      let child = lines[*pos].indent;
      parse_nested(lines, pos, child)
    } else if *pos < lines.len() && lines[*pos].indent == indent && lines[*pos].text.starts_with('-') {
      Value::List(parse_sequence(lines, pos, indent))
    } else {
      Value::Scalar(String::new())
    };
    entries.push((key, value));
  }
  entries
}

/// Tokenizes one list entry (its first line carries the `-` marker).
pub fn parse_entry(raw: &[&str]) -> Option<Value> {
  let lines = normalize_lines(raw);
  let first = lines.first()?;
  let mut pos = 0;
  let mut items = parse_sequence(&lines, &mut pos, first.indent);
  if items.is_empty() {
    None
  } else {
    Some(items.swap_remove(0))
  }
}

fn text_at(v: &Value, key: &str) -> Option<String> {
  v.get(key).and_then(Value::text)
}

fn text_any(v: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| text_at(v, k))
}

fn flag(v: &Value, key: &str) -> bool {
  text_at(v, key).map(|s| to_bool(&s)).unwrap_or(false)
}

/// Projects a tokenized entry onto a `Node`, or `None` when it is not an
/// endpoint or lacks a server or port.
pub fn entry_to_node(entry: &Value) -> Option<Node> {
  let ty = text_at(entry, "type")?;
  let ty_lower = ty.to_ascii_lowercase();
  if NON_ENDPOINT_TYPES.contains(&ty_lower.as_str()) {
    return None;
  }
  let server = text_at(entry, "server")?;
  let port = Port::parse(&text_at(entry, "port")?);
  if port.is_empty() {
    return None;
  }
  let name = text_at(entry, "name").unwrap_or_else(|| DEFAULT_NAME.to_string());
  let server = server.trim_start_matches('[').trim_end_matches(']').to_string();
  let mut node = Node::new(Protocol::from_block_type(&ty_lower), &name, &server, port);

  node.uuid = text_at(entry, "uuid");
  node.cipher = text_at(entry, "cipher");
  node.password = text_any(entry, &["password", "auth"]);
  node.alter_id = text_at(entry, "alterId").and_then(|s| s.parse().ok());
  node.udp = flag(entry, "udp");
  // trojan is TLS-only; Clash omits the key for it
  node.tls = match entry.get("tls") {
    Some(_) => flag(entry, "tls"),
    None => node.protocol == Protocol::Trojan,
  };
  node.skip_cert_verify = flag(entry, "skip-cert-verify");
  node.sni = text_any(entry, &["sni", "servername"]);
  node.network = text_at(entry, "network");
  node.client_fingerprint = text_any(entry, &["client-fingerprint", "fingerprint"]);
  node.flow = text_at(entry, "flow");
  node.alpn = text_at(entry, "alpn");
  node.obfs = text_at(entry, "obfs");
  node.obfs_password = text_at(entry, "obfs-password");
  node.ports = text_at(entry, "ports");
  node.congestion_controller = text_at(entry, "congestion-controller");
  node.udp_relay_mode = text_at(entry, "udp-relay-mode");

  let ws_opts = entry.get("ws-opts");
  if node.network.as_deref() == Some("ws") || ws_opts.is_some() {
    node.network = Some("ws".to_string());
    let host = ws_opts
      .and_then(|w| w.get("headers"))
      .and_then(|h| text_any(h, &["Host", "host"]));
    node.ws = Some(WsOpts {
      path: Some(ws_opts.and_then(|w| text_at(w, "path")).unwrap_or_else(|| "/".to_string())),
      host,
    });
  }
  if let Some(grpc) = entry.get("grpc-opts") {
    node.network = Some("grpc".to_string());
    node.grpc = Some(GrpcOpts {
      service_name: text_at(grpc, "grpc-service-name").unwrap_or_default(),
      mode: "gun".to_string(),
    });
  }
  if let Some(reality) = entry.get("reality-opts") {
    node.tls = true;
    node.reality_enabled = true;
    node.reality = Some(RealityOpts {
      public_key: text_at(reality, "public-key").unwrap_or_default(),
      short_id: text_at(reality, "short-id"),
    });
  }

  node.refresh_link();
  Some(node)
}

/// Extracts every endpoint entry from a block-style document.
pub fn decode_blocks(text: &str) -> Vec<Node> {
  let mut out = Vec::new();
  for block in collect_blocks(text) {
    let Some(entry) = parse_entry(&block) else {
      continue;
    };
    match entry_to_node(&entry) {
      Some(node) => out.push(node),
      None => {
        tracing::debug!(
          target: "biaosub::decode",
          entry = %block.first().map(|l| l.trim()).unwrap_or_default(),
          "skipping non-endpoint or incomplete block"
        );
      }
    }
  }
  out
}
