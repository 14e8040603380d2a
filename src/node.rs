use serde::Serialize;
use std::fmt;

/// Proxy protocol families understood by the decoders and encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
  Vmess,
  Vless,
  Trojan,
  #[serde(rename = "ss")]
  Shadowsocks,
  Hysteria2,
  Tuic,
  #[serde(rename = "anytls")]
  AnyTls,
  #[default]
  Raw,
}

impl Protocol {
  /// Maps a link scheme onto a protocol, folding the short aliases (`hy`,
  /// `hy2`, `hysteria`, `shadowsocks`).
  pub fn from_name(name: &str) -> Protocol {
    match name.trim().to_ascii_lowercase().as_str() {
      "vmess" => Protocol::Vmess,
      "vless" => Protocol::Vless,
      "trojan" => Protocol::Trojan,
      "ss" | "shadowsocks" => Protocol::Shadowsocks,
      "hysteria2" | "hysteria" | "hy2" | "hy" => Protocol::Hysteria2,
      "tuic" => Protocol::Tuic,
      "anytls" => Protocol::AnyTls,
      _ => Protocol::Raw,
    }
  }

  /// Maps a Clash `type` value. There `hysteria` names the v1 protocol,
  /// which is kept as `Raw` rather than folded into hysteria2.
  pub fn from_block_type(ty: &str) -> Protocol {
    match ty.trim().to_ascii_lowercase().as_str() {
      "hysteria" | "hy" => Protocol::Raw,
      other => Protocol::from_name(other),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Protocol::Vmess => "vmess",
      Protocol::Vless => "vless",
      Protocol::Trojan => "trojan",
      Protocol::Shadowsocks => "ss",
      Protocol::Hysteria2 => "hysteria2",
      Protocol::Tuic => "tuic",
      Protocol::AnyTls => "anytls",
      Protocol::Raw => "raw",
    }
  }
}

impl fmt::Display for Protocol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Port as found in the source. Non-numeric values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Port {
  Num(u16),
  Raw(String),
}

impl Port {
  pub fn parse(raw: &str) -> Port {
    let t = raw.trim();
    match t.parse::<u16>() {
      Ok(n) => Port::Num(n),
      Err(_) => Port::Raw(t.to_string()),
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Port::Num(n) => *n == 0,
      Port::Raw(s) => s.trim().is_empty(),
    }
  }
}

impl Default for Port {
  fn default() -> Self {
    Port::Num(0)
  }
}

impl fmt::Display for Port {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Port::Num(n) => write!(f, "{n}"),
      Port::Raw(s) => f.write_str(s),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WsOpts {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrpcOpts {
  #[serde(rename = "serviceName")]
  pub service_name: String,
  pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RealityOpts {
  #[serde(rename = "publicKey")]
  pub public_key: String,
  #[serde(rename = "shortId", skip_serializing_if = "Option::is_none")]
  pub short_id: Option<String>,
}

/// Canonical record for one proxy endpoint.
///
/// Nodes are always derived from text: a decoded link keeps its verbatim
/// source in `original_link` so that fields the model does not capture
/// survive a rename. `encoded_link` memoizes the re-encoded form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Node {
  pub name: String,
  #[serde(rename = "type")]
  pub protocol: Protocol,
  pub server: String,
  pub port: Port,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub uuid: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub password: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cipher: Option<String>,
  #[serde(rename = "alterId", skip_serializing_if = "Option::is_none")]
  pub alter_id: Option<u32>,

  pub udp: bool,
  pub tls: bool,
  #[serde(rename = "realityEnabled", skip_serializing_if = "std::ops::Not::not")]
  pub reality_enabled: bool,
  #[serde(rename = "skipCertVerify")]
  pub skip_cert_verify: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sni: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub network: Option<String>,
  #[serde(rename = "wsOpts", skip_serializing_if = "Option::is_none")]
  pub ws: Option<WsOpts>,
  #[serde(rename = "grpcOpts", skip_serializing_if = "Option::is_none")]
  pub grpc: Option<GrpcOpts>,
  #[serde(rename = "clientFingerprint", skip_serializing_if = "Option::is_none")]
  pub client_fingerprint: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub flow: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub alpn: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reality: Option<RealityOpts>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub obfs: Option<String>,
  #[serde(rename = "obfsPassword", skip_serializing_if = "Option::is_none")]
  pub obfs_password: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ports: Option<String>,
  #[serde(rename = "congestionController", skip_serializing_if = "Option::is_none")]
  pub congestion_controller: Option<String>,
  #[serde(rename = "udpRelayMode", skip_serializing_if = "Option::is_none")]
  pub udp_relay_mode: Option<String>,

  #[serde(rename = "originalLink", skip_serializing_if = "Option::is_none")]
  pub original_link: Option<String>,
  #[serde(rename = "link", skip_serializing_if = "Option::is_none")]
  pub encoded_link: Option<String>,

  /// Proxy-group this node dials through. Only set during assembly.
  #[serde(skip)]
  pub dialer_proxy: Option<String>,
}

impl Node {
  pub fn new(protocol: Protocol, name: &str, server: &str, port: Port) -> Node {
    Node {
      name: name.to_string(),
      protocol,
      server: server.to_string(),
      port,
      ..Node::default()
    }
  }

  /// The memoized link, computed on demand when absent.
  pub fn link(&self) -> String {
    match &self.encoded_link {
      Some(l) => l.clone(),
      None => crate::link_encode::encode(self),
    }
  }

  pub fn refresh_link(&mut self) {
    self.encoded_link = Some(crate::link_encode::encode(self));
  }

  /// Renames the node and re-encodes its link so the two never disagree.
  pub fn rename(&mut self, name: &str) {
    self.name = name.to_string();
    self.refresh_link();
  }

  pub fn ws_path(&self) -> Option<&str> {
    self.ws.as_ref().and_then(|w| w.path.as_deref())
  }

  pub fn ws_host(&self) -> Option<&str> {
    self.ws.as_ref().and_then(|w| w.host.as_deref())
  }
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
  let t = s.trim();
  if t.is_empty() {
    None
  } else {
    Some(t.to_string())
  }
}

pub(crate) fn to_bool(v: &str) -> bool {
  let s = v.trim().to_lowercase();
  matches!(s.as_str(), "1" | "true" | "yes" | "y" | "on")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn protocol_aliases_fold() {
    assert_eq!(Protocol::from_name("hy2"), Protocol::Hysteria2);
    assert_eq!(Protocol::from_name("HY"), Protocol::Hysteria2);
    assert_eq!(Protocol::from_name("shadowsocks"), Protocol::Shadowsocks);
    assert_eq!(Protocol::from_name("socks5"), Protocol::Raw);
    assert_eq!(Protocol::from_name("hysteria"), Protocol::Hysteria2);
    assert_eq!(Protocol::from_block_type("Hysteria"), Protocol::Raw);
    assert_eq!(Protocol::from_block_type("hysteria2"), Protocol::Hysteria2);
  }

  #[test]
  fn port_degrades_to_raw() {
    assert_eq!(Port::parse("443"), Port::Num(443));
    assert_eq!(Port::parse(" 8443 "), Port::Num(8443));
    assert_eq!(Port::parse("443-445"), Port::Raw("443-445".into()));
    assert!(Port::parse("").is_empty());
    assert_eq!(Port::Raw("x".into()).to_string(), "x");
  }

  #[test]
  fn rename_refreshes_link() {
    let mut n = Node::new(Protocol::Shadowsocks, "a", "1.2.3.4", Port::Num(8388));
    n.cipher = Some("aes-256-gcm".into());
    n.password = Some("pw".into());
    n.refresh_link();
    let before = n.link();
    n.rename("b");
    assert_ne!(before, n.link());
    assert!(n.link().ends_with("#b"));
  }
}
