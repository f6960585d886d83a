//! Scan command
//!
//! Reads the Codex session logs directly, without the poll engine.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use ratewatch_core::services::quota::scan;

use super::Context;
use crate::output::{print_info, print_json, print_output, snapshot_rows, OutputFormat};

pub async fn execute(ctx: &Context, dir: Option<String>, max_age_hours: u64) -> Result<()> {
    let root = match dir {
        Some(dir) => PathBuf::from(shellexpand::tilde(&dir).into_owned()),
        None => ctx.settings.sessions_root(),
    };
    let max_age = max_age_from_hours(max_age_hours);

    log::debug!("Scanning {:?} (max age: {:?})", root, max_age);
    let found = tokio::task::spawn_blocking(move || scan(&root, max_age)).await??;

    let Some(snapshot) = found else {
        print_info("No rate limit data found in recent session logs.", ctx.quiet);
        return Ok(());
    };

    match ctx.format {
        OutputFormat::Table => print_output(&snapshot_rows(&snapshot), ctx.format),
        OutputFormat::Json => print_json(&snapshot),
    }
}

/// `0` means no limit
fn max_age_from_hours(hours: u64) -> Option<Duration> {
    (hours > 0).then(|| Duration::from_secs(hours.saturating_mul(60 * 60)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_age_from_hours() {
        assert_eq!(max_age_from_hours(0), None);
        assert_eq!(max_age_from_hours(12), Some(Duration::from_secs(43_200)));
        assert_eq!(max_age_from_hours(u64::MAX), Some(Duration::from_secs(u64::MAX)));
    }
}
