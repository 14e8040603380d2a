pub mod assemble;
pub mod fetch;
pub mod parse;

use anyhow::Result;
use tokio::io::{AsyncReadExt, BufReader};

/// Reads the whole of stdin as text.
pub async fn read_stdin() -> Result<String> {
  let mut buf = String::new();
  let mut stdin = BufReader::new(tokio::io::stdin());
  stdin.read_to_string(&mut buf).await?;
  Ok(buf)
}
