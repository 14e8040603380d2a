use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING: OnceLock<()> = OnceLock::new();

pub const DEFAULT_FILTER: &str = "biaosub=info";

/// Installs the stderr subscriber. Safe to call more than once; only the
/// first call has an effect. `RUST_LOG` overrides `default_filter`.
pub fn init(default_filter: &str) {
  TRACING.get_or_init(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_target(true)
      .with_writer(std::io::stderr)
      .try_init();
    tracing::debug!(target: "biaosub::logging", "tracing initialized");
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn init_is_idempotent() {
    init(DEFAULT_FILTER);
    init("biaosub=trace");
    assert!(TRACING.get().is_some());
  }
}
