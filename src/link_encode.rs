use crate::node::{Node, Port, Protocol};
use crate::peel::{decode_base64_to_utf8, encode_base64_std, encode_base64_url};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::Value as JsonValue;
use url::form_urlencoded;

/// Characters left alone by JavaScript's `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

/// RFC 3986 unreserved characters survive; everything else in a secret is
/// escaped so `@`, `:` and `#` cannot break the authority.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'~');

fn component(s: &str) -> String {
  utf8_percent_encode(s, COMPONENT).to_string()
}

fn userinfo(s: &str) -> String {
  utf8_percent_encode(s, USERINFO).to_string()
}

fn url_host(server: &str) -> String {
  if server.contains(':') && !server.starts_with('[') {
    format!("[{server}]")
  } else {
    server.to_string()
  }
}

/// Serializes a node into its link form. Returns an empty string when the
/// node cannot be expressed as a link.
pub fn encode(node: &Node) -> String {
  if let Some(orig) = &node.original_link {
    return patch_original(orig, &node.name).unwrap_or_else(|| orig.clone());
  }
  build(node).unwrap_or_default()
}

fn is_vmess(link: &str) -> bool {
  link
    .get(..8)
    .map(|p| p.eq_ignore_ascii_case("vmess://"))
    .unwrap_or(false)
}

/// Swaps only the display name inside an existing link.
fn patch_original(orig: &str, name: &str) -> Option<String> {
  if is_vmess(orig) {
    let json_text = decode_base64_to_utf8(&orig[8..])?;
    let mut obj: JsonValue = serde_json::from_str(&json_text).ok()?;
    obj
      .as_object_mut()?
      .insert("ps".to_string(), JsonValue::String(name.to_string()));
    return Some(format!("vmess://{}", encode_base64_std(&obj.to_string())));
  }
  let base = match orig.rfind('#') {
    Some(i) => &orig[..i],
    None => orig,
  };
  Some(format!("{base}#{}", component(name)))
}

#[derive(Serialize)]
struct VmessJson<'a> {
  v: &'a str,
  ps: &'a str,
  add: &'a str,
  port: JsonValue,
  id: &'a str,
  aid: u32,
  scy: &'a str,
  net: &'a str,
  #[serde(rename = "type")]
  kind: &'a str,
  tls: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  sni: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  path: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  host: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  insecure: Option<&'a str>,
}

fn port_json(port: &Port) -> JsonValue {
  match port {
    Port::Num(n) => JsonValue::from(*n),
    Port::Raw(s) => JsonValue::String(s.clone()),
  }
}

fn with_query(base: String, query: String, name: &str) -> String {
  if query.is_empty() {
    format!("{base}#{}", component(name))
  } else {
    format!("{base}?{query}#{}", component(name))
  }
}

fn build(node: &Node) -> Option<String> {
  if node.server.trim().is_empty() {
    return None;
  }
  let host = url_host(&node.server);
  let port = &node.port;
  let mut q = form_urlencoded::Serializer::new(String::new());

  match node.protocol {
    Protocol::Vmess => {
      let net = node.network.as_deref().unwrap_or("tcp");
      let (path, ws_host) = match net {
        "ws" => (node.ws_path(), node.ws_host()),
        "grpc" => (node.grpc.as_ref().map(|g| g.service_name.as_str()), None),
        _ => (None, None),
      };
      let body = VmessJson {
        v: "2",
        ps: &node.name,
        add: &node.server,
        port: port_json(port),
        id: node.uuid.as_deref().unwrap_or_default(),
        aid: node.alter_id.unwrap_or(0),
        scy: node.cipher.as_deref().unwrap_or("auto"),
        net,
        kind: "none",
        tls: if node.tls { "tls" } else { "" },
        sni: node.sni.as_deref(),
        path,
        host: ws_host,
        insecure: node.skip_cert_verify.then_some("1"),
      };
      let json = serde_json::to_string(&body).ok()?;
      Some(format!("vmess://{}", encode_base64_std(&json)))
    }
    Protocol::Vless | Protocol::Trojan => {
      match node.reality.as_ref().filter(|r| !r.public_key.is_empty()) {
        Some(r) => {
          q.append_pair("security", "reality");
          q.append_pair("pbk", &r.public_key);
          if let Some(sid) = &r.short_id {
            q.append_pair("sid", sid);
          }
        }
        None => {
          q.append_pair("security", if node.tls { "tls" } else { "none" });
        }
      }
      if let Some(net) = &node.network {
        q.append_pair("type", net);
      }
      if let Some(flow) = &node.flow {
        q.append_pair("flow", flow);
      }
      if let Some(sni) = &node.sni {
        q.append_pair("sni", sni);
      }
      if let Some(fp) = &node.client_fingerprint {
        q.append_pair("fp", fp);
      }
      if let Some(alpn) = &node.alpn {
        q.append_pair("alpn", alpn);
      }
      if node.skip_cert_verify {
        q.append_pair("allowInsecure", "1");
      }
      match node.network.as_deref() {
        Some("ws") => {
          if let Some(path) = node.ws_path() {
            q.append_pair("path", path);
          }
          if let Some(h) = node.ws_host() {
            q.append_pair("host", h);
          }
        }
        Some("grpc") => {
          if let Some(g) = &node.grpc {
            q.append_pair("serviceName", &g.service_name);
            q.append_pair("mode", &g.mode);
          }
        }
        _ => {}
      }
      let secret = if node.protocol == Protocol::Vless {
        node.uuid.as_deref()?
      } else {
        node.password.as_deref().or(node.uuid.as_deref())?
      };
      let scheme = node.protocol.as_str();
      Some(with_query(
        format!("{scheme}://{}@{host}:{port}", userinfo(secret)),
        q.finish(),
        &node.name,
      ))
    }
    Protocol::Hysteria2 => {
      if let Some(sni) = &node.sni {
        q.append_pair("sni", sni);
      }
      if node.skip_cert_verify {
        q.append_pair("insecure", "1");
      }
      if let Some(obfs) = &node.obfs {
        q.append_pair("obfs", obfs);
        if let Some(pw) = &node.obfs_password {
          q.append_pair("obfs-password", pw);
        }
      }
      if let Some(ports) = &node.ports {
        q.append_pair("mport", ports);
      }
      let pw = node.password.as_deref()?;
      Some(with_query(
        format!("hysteria2://{}@{host}:{port}", userinfo(pw)),
        q.finish(),
        &node.name,
      ))
    }
    Protocol::Tuic => {
      if let Some(sni) = &node.sni {
        q.append_pair("sni", sni);
      }
      if let Some(alpn) = &node.alpn {
        q.append_pair("alpn", alpn);
      }
      if node.skip_cert_verify {
        q.append_pair("insecure", "1");
      }
      if let Some(cc) = &node.congestion_controller {
        q.append_pair("congestion_control", cc);
      }
      if let Some(mode) = &node.udp_relay_mode {
        q.append_pair("udp_relay_mode", mode);
      }
      let id = node.uuid.as_deref()?;
      let pw = node.password.as_deref().unwrap_or_default();
      Some(with_query(
        format!("tuic://{}@{host}:{port}", component(&format!("{id}:{pw}"))),
        q.finish(),
        &node.name,
      ))
    }
    Protocol::AnyTls => {
      if let Some(sni) = &node.sni {
        q.append_pair("sni", sni);
      }
      if node.skip_cert_verify {
        q.append_pair("insecure", "1");
      }
      let pw = node.password.as_deref()?;
      Some(with_query(
        format!("anytls://{}@{host}:{port}", userinfo(pw)),
        q.finish(),
        &node.name,
      ))
    }
    Protocol::Shadowsocks => {
      let cipher = node.cipher.as_deref()?;
      let pw = node.password.as_deref()?;
      let user = encode_base64_url(&format!("{cipher}:{pw}"));
      Some(format!("ss://{user}@{host}:{port}#{}", component(&node.name)))
    }
    Protocol::Raw => None,
  }
}

/// Newline-joined links of `nodes`, the form persisted for a source.
pub fn stored_links(nodes: &[Node]) -> String {
  nodes
    .iter()
    .map(Node::link)
    .filter(|l| !l.is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}

/// The line-delimited link subscription wrapped in base64.
pub fn render_link_list(nodes: &[Node]) -> String {
  encode_base64_std(&stored_links(nodes))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::link_decode::parse_link;
  use crate::node::{GrpcOpts, RealityOpts, WsOpts};
  use crate::peel::peel;

  fn roundtrip(node: &Node) -> Node {
    let link = encode(node);
    assert!(!link.is_empty(), "no link for {:?}", node.protocol);
    parse_link(&link).unwrap()
  }

  fn assert_core_preserved(a: &Node, b: &Node) {
    assert_eq!(a.protocol, b.protocol);
    assert_eq!(a.server, b.server);
    assert_eq!(a.port, b.port);
    assert_eq!(a.name, b.name);
  }

  #[test]
  fn original_link_only_name_changes() {
    let mut n = parse_link("trojan://pw@t.example:443?sni=x.example&unknown=keep#old").unwrap();
    n.rename("new name");
    assert_eq!(
      n.link(),
      "trojan://pw@t.example:443?sni=x.example&unknown=keep#new%20name"
    );
  }

  #[test]
  fn original_link_without_fragment_gets_one() {
    let mut n = parse_link("anytls://pw@a.example:443").unwrap();
    n.rename("a");
    assert_eq!(n.link(), "anytls://pw@a.example:443#a");
  }

  #[test]
  fn vmess_rename_keeps_other_fields() {
    let json = r#"{"v":"2","ps":"a","add":"v.example","port":443,"id":"id-1","aid":"0","net":"ws","path":"/p","extra":"kept"}"#;
    let mut n = parse_link(&format!("vmess://{}", encode_base64_std(json))).unwrap();
    n.rename("b");
    let payload = decode_base64_to_utf8(&n.link()[8..]).unwrap();
    let v: JsonValue = serde_json::from_str(&payload).unwrap();
    assert_eq!(v["ps"], "b");
    assert_eq!(v["extra"], "kept");
    assert_eq!(v["path"], "/p");
  }

  #[test]
  fn shadowsocks_roundtrip() {
    let mut n = Node::new(Protocol::Shadowsocks, "ss one", "1.2.3.4", Port::Num(8388));
    n.cipher = Some("aes-256-gcm".into());
    n.password = Some("p:w@#".into());
    let back = roundtrip(&n);
    assert_core_preserved(&n, &back);
    assert_eq!(back.cipher, n.cipher);
    assert_eq!(back.password, n.password);
  }

  #[test]
  fn vless_reality_takes_precedence_over_tls() {
    let mut n = Node::new(Protocol::Vless, "r", "v.example", Port::Num(443));
    n.uuid = Some("uuid-1".into());
    n.tls = true;
    n.network = Some("tcp".into());
    n.reality = Some(RealityOpts {
      public_key: "PK".into(),
      short_id: Some("ab".into()),
    });
    let link = encode(&n);
    assert!(link.contains("security=reality"));
    assert!(!link.contains("security=tls"));
    let back = parse_link(&link).unwrap();
    assert_core_preserved(&n, &back);
    assert_eq!(back.uuid, n.uuid);
    assert_eq!(back.reality, n.reality);
  }

  #[test]
  fn vless_and_trojan_transports_roundtrip() {
    let mut ws = Node::new(Protocol::Vless, "ws", "v.example", Port::Num(443));
    ws.uuid = Some("u".into());
    ws.tls = true;
    ws.network = Some("ws".into());
    ws.ws = Some(WsOpts {
      path: Some("/a b".into()),
      host: Some("cdn.example".into()),
    });
    let back = roundtrip(&ws);
    assert_eq!(back.ws_path(), Some("/a b"));
    assert_eq!(back.ws_host(), Some("cdn.example"));

    let mut grpc = Node::new(Protocol::Trojan, "g", "t.example", Port::Num(443));
    grpc.password = Some("pw".into());
    grpc.tls = true;
    grpc.network = Some("grpc".into());
    grpc.grpc = Some(GrpcOpts {
      service_name: "svc".into(),
      mode: "gun".into(),
    });
    let back = roundtrip(&grpc);
    assert_core_preserved(&grpc, &back);
    assert_eq!(back.password.as_deref(), Some("pw"));
    assert_eq!(back.grpc, grpc.grpc);
  }

  #[test]
  fn vmess_roundtrip() {
    let mut n = Node::new(Protocol::Vmess, "vm", "vm.example", Port::Num(8080));
    n.uuid = Some("id".into());
    n.network = Some("ws".into());
    n.ws = Some(WsOpts {
      path: Some("/ws".into()),
      host: Some("h.example".into()),
    });
    n.tls = true;
    let back = roundtrip(&n);
    assert_core_preserved(&n, &back);
    assert_eq!(back.uuid, n.uuid);
    assert!(back.tls);
    assert_eq!(back.ws_host(), Some("h.example"));
  }

  #[test]
  fn udp_protocols_roundtrip() {
    let mut hy = Node::new(Protocol::Hysteria2, "hy", "2001:db8::1", Port::Num(443));
    hy.password = Some("pw".into());
    hy.obfs = Some("salamander".into());
    hy.obfs_password = Some("op".into());
    let back = roundtrip(&hy);
    assert_core_preserved(&hy, &back);
    assert_eq!(back.obfs_password.as_deref(), Some("op"));

    let mut tuic = Node::new(Protocol::Tuic, "tu", "t.example", Port::Num(443));
    tuic.uuid = Some("uuid".into());
    tuic.password = Some("pass".into());
    tuic.alpn = Some("h3".into());
    let back = roundtrip(&tuic);
    assert_core_preserved(&tuic, &back);
    assert_eq!(back.uuid.as_deref(), Some("uuid"));
    assert_eq!(back.password.as_deref(), Some("pass"));

    let mut any = Node::new(Protocol::AnyTls, "an", "a.example", Port::Num(443));
    any.password = Some("secret".into());
    let back = roundtrip(&any);
    assert_core_preserved(&any, &back);
    assert_eq!(back.password.as_deref(), Some("secret"));
  }

  #[test]
  fn unencodable_nodes_give_empty_string() {
    assert_eq!(encode(&Node::new(Protocol::Raw, "x", "h", Port::Num(1))), "");
    assert_eq!(encode(&Node::new(Protocol::Vless, "x", "h", Port::Num(1))), "");
  }

  #[test]
  fn link_list_is_base64_of_lines() {
    let a = parse_link("trojan://pw@a.example:443#a").unwrap();
    let b = parse_link("trojan://pw@b.example:443#b").unwrap();
    let raw = Node::new(Protocol::Raw, "r", "h", Port::Num(1));
    let list = render_link_list(&[a, raw, b]);
    assert_eq!(
      peel(&list),
      "trojan://pw@a.example:443#a\ntrojan://pw@b.example:443#b"
    );
  }
}
