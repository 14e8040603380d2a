use crate::block_decode::decode_blocks;
use crate::link_decode::{decode_line_links, decode_links};
use crate::node::Node;
use crate::peel::peel;

/// Tunes how the link and block decoders are arbitrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
  /// Prefer block-style output when both decoders yield the same count.
  pub prefer_block_on_tie: bool,
  /// Read one whole link per line instead of every link-looking token.
  pub links_per_line: bool,
}

impl Strategy {
  /// Fetched subscriptions: block documents usually carry richer metadata.
  pub const REMOTE: Strategy = Strategy {
    prefer_block_on_tie: true,
    links_per_line: false,
  };
  /// Pasted or stored content, which is normally a link list.
  pub const PASTED: Strategy = Strategy {
    prefer_block_on_tie: false,
    links_per_line: true,
  };
}

impl Default for Strategy {
  fn default() -> Self {
    Strategy::REMOTE
  }
}

const CONFIG_MARKERS: [&str; 3] = ["://", "proxies:", "name:"];
const MIN_DECODED_LEN: usize = 10;

impl Strategy {
  fn decode_links(&self, text: &str) -> Vec<Node> {
    if self.links_per_line {
      decode_line_links(text)
    } else {
      decode_links(text)
    }
  }
}

fn looks_like_config(s: &str) -> bool {
  s.len() > MIN_DECODED_LEN && CONFIG_MARKERS.iter().any(|m| s.contains(m))
}

/// Decodes arbitrary subscription text into nodes.
///
/// The text is peeled first; both decoders then run on the working content
/// and the block-style result wins when it is non-empty and at least as large
/// (strictly larger under `Strategy::PASTED`). A link decode of the unpeeled
/// text is the last resort when peeling changed the content.
pub fn parse_subscription(text: &str, strategy: Strategy) -> Vec<Node> {
  let peeled = peel(text);
  let content: &str = if peeled != text && looks_like_config(&peeled) {
    &peeled
  } else {
    text
  };

  let link_nodes = strategy.decode_links(content);
  let block_nodes = decode_blocks(content);
  tracing::debug!(
    target: "biaosub::decode",
    links = link_nodes.len(),
    blocks = block_nodes.len(),
    peeled = content != text,
    "decoded subscription candidates"
  );

  let block_wins = if strategy.prefer_block_on_tie {
    block_nodes.len() >= link_nodes.len()
  } else {
    block_nodes.len() > link_nodes.len()
  };
  if !block_nodes.is_empty() && block_wins {
    return block_nodes;
  }
  if !link_nodes.is_empty() {
    return link_nodes;
  }
  if content != text {
    let raw_nodes = strategy.decode_links(text);
    if !raw_nodes.is_empty() {
      tracing::debug!(target: "biaosub::decode", count = raw_nodes.len(), "fell back to unpeeled link decode");
      return raw_nodes;
    }
  }
  Vec::new()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::Protocol;
  use base64::engine::general_purpose::STANDARD;
  use base64::Engine;

  fn block_doc() -> String {
    let mut doc = String::from("# vless://id@a.example:443#c1\n# trojan://pw@b.example:443#c2\nproxies:\n");
    for i in 0..5 {
      doc.push_str(&format!(
        "  - name: n{i}\n    type: trojan\n    server: s{i}.example.com\n    port: 443\n    password: pw{i}\n"
      ));
    }
    doc
  }

  #[test]
  fn block_result_wins_over_commented_links() {
    let nodes = parse_subscription(&block_doc(), Strategy::REMOTE);
    assert_eq!(nodes.len(), 5);
    assert!(nodes.iter().all(|n| n.original_link.is_none()));
    assert_eq!(nodes[0].name, "n0");
  }

  #[test]
  fn single_link_list_is_used() {
    let nodes = parse_subscription("trojan://pw@b.example:443#only", Strategy::REMOTE);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].protocol, Protocol::Trojan);
  }

  #[test]
  fn base64_wrapped_link_list() {
    let list = "vless://id@a.example:443?security=tls#a\ntrojan://pw@b.example:443#b\n";
    let nodes = parse_subscription(&STANDARD.encode(list), Strategy::REMOTE);
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[1].name, "b");
  }

  #[test]
  fn base64_wrapped_block_document() {
    let nodes = parse_subscription(&STANDARD.encode(block_doc()), Strategy::REMOTE);
    assert_eq!(nodes.len(), 5);
  }

  #[test]
  fn tie_breaking_follows_strategy() {
    let doc = "proxies:\n  - name: blk\n    type: trojan\n    server: s.example.com\n    port: 443\n    password: pw\n    # trojan://pw@l.example:443#lnk\n";
    let remote = parse_subscription(doc, Strategy::REMOTE);
    assert_eq!(remote[0].name, "blk");
    let tied = format!("trojan://pw@l.example:443#lnk\n{doc}");
    let pasted = parse_subscription(&tied, Strategy::PASTED);
    assert_eq!(pasted[0].name, "lnk");
  }

  #[test]
  fn pasted_links_are_read_per_line() {
    let text = "trojan://pw@a.example:443#HK 01\n  vless://id@b.example:443?security=tls#US West  \n";
    let names: Vec<String> = parse_subscription(text, Strategy::PASTED).into_iter().map(|n| n.name).collect();
    assert_eq!(names, vec!["HK 01", "US West"]);
    // fetched content still matches link-looking tokens anywhere
    let remote = parse_subscription("see trojan://pw@a.example:443#HK", Strategy::REMOTE);
    assert_eq!(remote.len(), 1);
    assert!(parse_subscription("see trojan://pw@a.example:443#HK", Strategy::PASTED).is_empty());
  }

  #[test]
  fn nothing_recognizable() {
    assert!(parse_subscription("hello world", Strategy::REMOTE).is_empty());
    assert!(parse_subscription("", Strategy::PASTED).is_empty());
  }
}
