//! Clash (mihomo) proxy blocks.
//!
//! Blocks are written by hand rather than through a YAML serializer so the
//! key order and layout stay stable across releases: two spaces before the
//! list dash, four before each field.

use crate::node::{Node, Port, Protocol};
use std::fmt::Write as _;

const SPECIAL: &[char] = &[
  ':', '[', ']', '{', '}', '&', '*', '?', '|', '<', '>', '=', '!', '%', '@', '`', '#', ',', ' ', '\'', '"', '\\',
];

const RESERVED_SCALARS: [&str; 11] = [
  "true", "false", "yes", "no", "on", "off", "null", "~", "y", "n", ".inf",
];

fn reads_as_non_string(s: &str) -> bool {
  RESERVED_SCALARS.contains(&s.to_ascii_lowercase().as_str()) || s.parse::<f64>().is_ok()
}

/// Quotes `val` when a YAML reader would not give it back as the same string.
pub(crate) fn yaml_str(val: &str) -> String {
  if val.is_empty() {
    return "\"\"".to_string();
  }
  let needs_quotes = val.contains(SPECIAL)
    || val.contains(char::is_control)
    || val.starts_with('-')
    || val.trim() != val
    || reads_as_non_string(val);
  if needs_quotes {
    quoted(val)
  } else {
    val.to_string()
  }
}

/// Double-quoted scalar; control characters use YAML escapes so a name can
/// never break the line it sits on.
fn quoted(val: &str) -> String {
  let mut out = String::with_capacity(val.len() + 2);
  out.push('"');
  for c in val.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '"' => out.push_str("\\\""),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      c if c.is_control() => {
        let _ = write!(out, "\\x{:02X}", c as u32);
      }
      c => out.push(c),
    }
  }
  out.push('"');
  out
}

/// Server address with IPv6 brackets removed; anything holding a colon is
/// always quoted.
pub(crate) fn yaml_server(server: &str) -> String {
  let clean = server.trim().trim_start_matches('[').trim_end_matches(']');
  if clean.contains(':') {
    format!("\"{clean}\"")
  } else {
    yaml_str(clean)
  }
}

fn yaml_port(port: &Port) -> String {
  match port {
    Port::Num(n) => n.to_string(),
    Port::Raw(s) => match s.trim().parse::<i64>() {
      Ok(n) => n.to_string(),
      Err(_) => yaml_str(s.trim()),
    },
  }
}

fn present(v: &Option<String>) -> Option<&str> {
  v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

struct Block(String);

impl Block {
  fn field(&mut self, key: &str, value: impl std::fmt::Display) {
    let _ = write!(self.0, "\n    {key}: {value}");
  }

  fn opt(&mut self, key: &str, value: Option<&str>) {
    if let Some(v) = value {
      self.field(key, yaml_str(v));
    }
  }

  fn list(&mut self, key: &str, items: &[&str]) {
    let _ = write!(self.0, "\n    {key}:");
    for item in items {
      let _ = write!(self.0, "\n      - {}", yaml_str(item));
    }
  }

  fn ws(&mut self, node: &Node, always_host: bool) {
    self.field("network", "ws");
    let _ = write!(
      self.0,
      "\n    ws-opts:\n      path: {}",
      yaml_str(node.ws_path().filter(|p| !p.is_empty()).unwrap_or("/"))
    );
    match node.ws_host().filter(|h| !h.is_empty()) {
      Some(h) => {
        let _ = write!(self.0, "\n      headers:\n        Host: {}", yaml_str(h));
      }
      None if always_host => {
        let _ = write!(self.0, "\n      headers:\n        Host: \"\"");
      }
      None => {}
    }
  }

  /// Emits the transport section. Returns false when nothing was written.
  fn transport(&mut self, node: &Node, always_host: bool) -> bool {
    match node.network.as_deref() {
      Some("ws") => {
        self.ws(node, always_host);
        true
      }
      Some("grpc") => match &node.grpc {
        Some(g) => {
          self.field("network", "grpc");
          let _ = write!(
            self.0,
            "\n    grpc-opts:\n      grpc-service-name: {}",
            yaml_str(&g.service_name)
          );
          true
        }
        None => false,
      },
      _ => false,
    }
  }
}

fn render(node: &Node) -> Result<String, &'static str> {
  if node.name.trim().is_empty() {
    return Err("missing name");
  }
  if node.server.trim().is_empty() {
    return Err("missing server");
  }
  if node.port.is_empty() {
    return Err("missing port");
  }

  let mut b = Block(format!("  - name: {}", yaml_str(&node.name)));
  b.field("type", node.protocol);
  b.field("server", yaml_server(&node.server));
  b.field("port", yaml_port(&node.port));

  match node.protocol {
    Protocol::Shadowsocks => {
      let cipher = present(&node.cipher).ok_or("missing cipher")?;
      let password = node.password.as_deref().filter(|p| !p.is_empty()).ok_or("missing password")?;
      b.field("cipher", yaml_str(cipher));
      b.field("password", yaml_str(password));
    }
    Protocol::Trojan => {
      let password = present(&node.password).ok_or("missing password")?;
      b.field("password", yaml_str(password));
      b.field("udp", true);
      b.field("skip-cert-verify", node.skip_cert_verify);
      b.opt("sni", present(&node.sni));
      b.transport(node, false);
    }
    Protocol::Vmess => {
      let uuid = present(&node.uuid).ok_or("missing uuid")?;
      b.field("uuid", yaml_str(uuid));
      b.field("alterId", node.alter_id.unwrap_or(0));
      b.field("cipher", yaml_str(present(&node.cipher).unwrap_or("auto")));
      b.field("udp", true);
      b.field("tls", node.tls);
      b.field("skip-cert-verify", node.skip_cert_verify);
      b.opt("servername", present(&node.sni));
      b.transport(node, true);
    }
    Protocol::Vless => {
      let uuid = present(&node.uuid).ok_or("missing uuid")?;
      b.field("uuid", yaml_str(uuid));
      b.field("udp", true);
      b.field("tls", node.tls);
      b.field("skip-cert-verify", node.skip_cert_verify);
      b.opt("flow", present(&node.flow));
      b.opt("servername", present(&node.sni));
      b.opt("client-fingerprint", present(&node.client_fingerprint));
      if let Some(r) = node.reality.as_ref().filter(|r| !r.public_key.is_empty()) {
        let _ = write!(b.0, "\n    reality-opts:\n      public-key: {}", yaml_str(&r.public_key));
        if let Some(sid) = present(&r.short_id) {
          let _ = write!(b.0, "\n      short-id: {}", yaml_str(sid));
        }
      }
      let has_ws_opts = node.ws.is_some();
      let wrote = match node.network.as_deref() {
        Some("ws") if !has_ws_opts => false,
        _ => b.transport(node, false),
      };
      if !wrote {
        b.field("network", yaml_str(present(&node.network).unwrap_or("tcp")));
      }
    }
    Protocol::Hysteria2 => {
      let password = present(&node.password).ok_or("missing password")?;
      b.field("password", yaml_str(password));
      b.field("skip-cert-verify", node.skip_cert_verify);
      b.opt("sni", present(&node.sni));
      b.list("alpn", &["h3"]);
      if let Some(obfs) = present(&node.obfs) {
        b.field("obfs", yaml_str(obfs));
        b.opt("obfs-password", present(&node.obfs_password));
      }
      b.opt("ports", present(&node.ports));
    }
    Protocol::Tuic => {
      let uuid = present(&node.uuid).ok_or("missing uuid")?;
      b.field("uuid", yaml_str(uuid));
      b.field("password", yaml_str(node.password.as_deref().unwrap_or_default()));
      b.field("skip-cert-verify", node.skip_cert_verify);
      b.opt("sni", present(&node.sni));
      b.list("alpn", &["h3"]);
      b.field(
        "udp-relay-mode",
        yaml_str(present(&node.udp_relay_mode).unwrap_or("native")),
      );
      b.opt("congestion-controller", present(&node.congestion_controller));
    }
    Protocol::AnyTls => {
      let password = present(&node.password).ok_or("missing password")?;
      b.field("password", yaml_str(password));
      b.field(
        "client-fingerprint",
        yaml_str(present(&node.client_fingerprint).unwrap_or("chrome")),
      );
      b.field("udp", true);
      b.field("skip-cert-verify", node.skip_cert_verify);
      b.opt("sni", present(&node.sni));
      b.list("alpn", &["h2", "http/1.1"]);
    }
    Protocol::Raw => return Err("unsupported protocol"),
  }
  Ok(b.0)
}

/// Renders one `proxies:` list entry for `node`, without a trailing newline.
///
/// Returns `None` when a field the protocol requires is missing; the reason
/// is reported on the `biaosub::clash` target.
pub fn to_proxy_block(node: &Node) -> Option<String> {
  match render(node) {
    Ok(block) => Some(block),
    Err(reason) => {
      tracing::debug!(
        target: "biaosub::clash",
        name = %node.name,
        protocol = %node.protocol,
        reason,
        "node skipped by serializer"
      );
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::link_decode::parse_link;
  use crate::node::{GrpcOpts, WsOpts};
  use serde_yaml::Value;

  fn parse_block(block: &str) -> Value {
    let doc: Value = serde_yaml::from_str(&format!("proxies:\n{block}\n")).unwrap();
    doc["proxies"][0].clone()
  }

  #[test]
  fn vless_reality_block() {
    let n = parse_link(
      "vless://11111111-1111-1111-1111-111111111111@example.com:443?security=reality&pbk=ABC123&sid=01&type=tcp#MyNode",
    )
    .unwrap();
    let block = to_proxy_block(&n).unwrap();
    assert!(block.starts_with("  - name: MyNode\n    type: vless\n"));
    let v = parse_block(&block);
    assert_eq!(v["server"].as_str(), Some("example.com"));
    assert_eq!(v["port"].as_u64(), Some(443));
    assert_eq!(v["tls"].as_bool(), Some(true));
    assert_eq!(v["network"].as_str(), Some("tcp"));
    assert_eq!(v["reality-opts"]["public-key"].as_str(), Some("ABC123"));
    assert_eq!(v["reality-opts"]["short-id"].as_str(), Some("01"));
  }

  #[test]
  fn required_fields_gate_output() {
    let mut ss = Node::new(Protocol::Shadowsocks, "s", "1.2.3.4", Port::Num(8388));
    ss.cipher = Some("aes-128-gcm".into());
    assert!(to_proxy_block(&ss).is_none());
    ss.password = Some("pw".into());
    assert!(to_proxy_block(&ss).is_some());

    assert!(to_proxy_block(&Node::new(Protocol::Vmess, "v", "h", Port::Num(1))).is_none());
    assert!(to_proxy_block(&Node::new(Protocol::Raw, "r", "h", Port::Num(1))).is_none());

    let mut no_port = Node::new(Protocol::Trojan, "t", "h", Port::Num(0));
    no_port.password = Some("pw".into());
    assert!(to_proxy_block(&no_port).is_none());
  }

  #[test]
  fn ipv6_server_is_quoted_without_brackets() {
    let n = parse_link("trojan://pw@[2001:db8::1]:443#v6").unwrap();
    let block = to_proxy_block(&n).unwrap();
    assert!(block.contains("server: \"2001:db8::1\""));
    assert_eq!(parse_block(&block)["server"].as_str(), Some("2001:db8::1"));
  }

  #[test]
  fn protocol_defaults() {
    let any = parse_link("anytls://pw@a.example:443#a").unwrap();
    let v = parse_block(&to_proxy_block(&any).unwrap());
    assert_eq!(v["client-fingerprint"].as_str(), Some("chrome"));
    assert_eq!(v["alpn"][0].as_str(), Some("h2"));
    assert_eq!(v["alpn"][1].as_str(), Some("http/1.1"));
    assert_eq!(v["udp"].as_bool(), Some(true));

    let tuic = parse_link("tuic://u:p@t.example:443#t").unwrap();
    let v = parse_block(&to_proxy_block(&tuic).unwrap());
    assert_eq!(v["udp-relay-mode"].as_str(), Some("native"));
    assert_eq!(v["alpn"][0].as_str(), Some("h3"));

    let hy = parse_link("hy2://pw@h.example:443?obfs=salamander&obfs-password=o%20p&mport=1000-2000#h").unwrap();
    let v = parse_block(&to_proxy_block(&hy).unwrap());
    assert_eq!(v["type"].as_str(), Some("hysteria2"));
    assert_eq!(v["obfs-password"].as_str(), Some("o p"));
    assert_eq!(v["ports"].as_str(), Some("1000-2000"));
  }

  #[test]
  fn vmess_always_emits_ws_host() {
    let mut n = Node::new(Protocol::Vmess, "vm", "v.example", Port::Num(443));
    n.uuid = Some("id".into());
    n.network = Some("ws".into());
    n.ws = Some(WsOpts {
      path: None,
      host: None,
    });
    let v = parse_block(&to_proxy_block(&n).unwrap());
    assert_eq!(v["alterId"].as_u64(), Some(0));
    assert_eq!(v["cipher"].as_str(), Some("auto"));
    assert_eq!(v["ws-opts"]["path"].as_str(), Some("/"));
    assert_eq!(v["ws-opts"]["headers"]["Host"].as_str(), Some(""));
  }

  #[test]
  fn trojan_grpc_transport() {
    let mut n = Node::new(Protocol::Trojan, "g", "t.example", Port::Num(443));
    n.password = Some("pw".into());
    n.network = Some("grpc".into());
    n.grpc = Some(GrpcOpts {
      service_name: "svc".into(),
      mode: "gun".into(),
    });
    let v = parse_block(&to_proxy_block(&n).unwrap());
    assert_eq!(v["network"].as_str(), Some("grpc"));
    assert_eq!(v["grpc-opts"]["grpc-service-name"].as_str(), Some("svc"));
  }

  #[test]
  fn awkward_names_survive_yaml() {
    for name in [
      "a: b",
      "#tag",
      "- dash",
      "say \"hi\"",
      "back\\slash",
      "001",
      "true",
      "🇭🇰 HK 01",
      "a\nb",
      "tab\there\r",
      "bell\u{7}\u{85}",
    ] {
      let mut n = Node::new(Protocol::Trojan, name, "t.example", Port::Num(443));
      n.password = Some("123".into());
      let v = parse_block(&to_proxy_block(&n).unwrap());
      assert_eq!(v["name"].as_str(), Some(name), "name {name:?}");
      assert_eq!(v["password"].as_str(), Some("123"));
    }
  }

  #[test]
  fn raw_port_is_coerced_when_numeric() {
    let mut n = Node::new(Protocol::Trojan, "t", "t.example", Port::Raw(" 8443 ".into()));
    n.password = Some("pw".into());
    assert!(to_proxy_block(&n).unwrap().contains("\n    port: 8443"));
  }
}
