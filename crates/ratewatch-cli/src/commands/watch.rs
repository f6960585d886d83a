//! Watch command
//!
//! Keeps the poll engine running and prints every completed poll until
//! interrupted.

use std::time::Duration;

use anyhow::Result;
use ratewatch_core::PollMode;

use super::{build_engine, resolve_mode, Context};
use crate::output::{print_info, status_line, OutputFormat};

pub async fn execute(ctx: &Context, mode: Option<PollMode>, interval: Option<u64>) -> Result<()> {
    let mode = resolve_mode(ctx, mode);
    let handle = build_engine(ctx, mode, None)?.spawn();
    if let Some(secs) = interval {
        handle.set_interval(Duration::from_secs(secs)).await?;
    }

    print_info(
        &format!("Watching {} usage, press Ctrl-C to stop", mode),
        ctx.quiet,
    );

    let mut updates = handle.subscribe();
    let mut last_printed = 0;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                if status.poll_count == last_printed {
                    continue;
                }
                last_printed = status.poll_count;
                match ctx.format {
                    OutputFormat::Table => println!("{}", status_line(&status)),
                    OutputFormat::Json => println!("{}", serde_json::to_string(&status)?),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::debug!("Interrupted, shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
