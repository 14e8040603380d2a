//! Transport peeling: undoing the base64 layers subscription payloads are
//! commonly wrapped in.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

/// Maximum number of nested layers peeled below the first one.
pub const MAX_PEEL_DEPTH: usize = 3;

const MIN_ENCODED_LEN: usize = 10;

/// Standard alphabet, accepting missing padding and non-zero trailing bits the
/// way browsers' `atob` does.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
  &alphabet::STANDARD,
  GeneralPurposeConfig::new()
    .with_decode_allow_trailing_bits(true)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const PAYLOAD_MARKERS: [&str; 3] = ["://", "proxies:", "server:"];

/// True when `s` carries a token typical of a subscription payload.
pub fn has_payload_marker(s: &str) -> bool {
  PAYLOAD_MARKERS.iter().any(|m| s.contains(m))
}

/// Normalizes the URL-safe variant onto the standard alphabet and drops
/// whitespace. Returns `None` when a character outside the alphabet remains.
fn normalize(s: &str) -> Option<String> {
  let mut out = String::with_capacity(s.len() + 3);
  for c in s.chars() {
    match c {
      c if c.is_whitespace() => continue,
      '-' => out.push('+'),
      '_' => out.push('/'),
      c if c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=') => out.push(c),
      _ => return None,
    }
  }
  let rem = out.len() % 4;
  if rem != 0 {
    out.push_str(&"=".repeat(4 - rem));
  }
  Some(out)
}

/// True when every non-whitespace character belongs to either base64 alphabet.
pub(crate) fn is_base64_alphabet(s: &str) -> bool {
  !s.trim().is_empty()
    && s
      .chars()
      .filter(|c| !c.is_whitespace())
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'))
}

/// Decodes either base64 variant into UTF-8 text.
pub(crate) fn decode_base64_to_utf8(s: &str) -> Option<String> {
  let cleaned = normalize(s)?;
  if cleaned.is_empty() {
    return None;
  }
  let bytes = LENIENT.decode(cleaned.as_bytes()).ok()?;
  String::from_utf8(bytes).ok()
}

/// URL-safe, unpadded base64 of `s` (SIP002 userinfo).
pub(crate) fn encode_base64_url(s: &str) -> String {
  URL_SAFE_NO_PAD.encode(s.as_bytes())
}

pub(crate) fn encode_base64_std(s: &str) -> String {
  STANDARD.encode(s.as_bytes())
}

fn has_binary_controls(s: &str) -> bool {
  s.chars().any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
}

/// Peels up to `MAX_PEEL_DEPTH + 1` base64 layers from `text`.
///
/// Input that is not encoded, fails to decode, or decodes to binary-looking
/// bytes is returned unchanged.
pub fn peel(text: &str) -> String {
  peel_at(text, 0)
}

fn peel_at(text: &str, depth: usize) -> String {
  let compact_len = text.chars().filter(|c| !c.is_whitespace()).count();
  if compact_len < MIN_ENCODED_LEN {
    return text.to_string();
  }
  let Some(decoded) = decode_base64_to_utf8(text) else {
    return text.to_string();
  };
  if has_binary_controls(&decoded) {
    tracing::trace!(target: "biaosub::peel", depth, "decoded bytes look binary, keeping input");
    return text.to_string();
  }
  if depth < MAX_PEEL_DEPTH && has_payload_marker(&decoded) {
    return peel_at(&decoded, depth + 1);
  }
  decoded
}
