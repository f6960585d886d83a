//! Check command
//!
//! Runs one poll and prints the result.

use anyhow::Result;
use ratewatch_core::PollMode;

use super::{build_engine, resolve_mode, Context};
use crate::output::{print_json, print_output, status_rows, OutputFormat};

pub async fn execute(ctx: &Context, mode: Option<PollMode>, model: Option<String>) -> Result<()> {
    let mode = resolve_mode(ctx, mode);
    let handle = build_engine(ctx, mode, model)?.force_initial_poll().spawn();

    let status = handle.wait_for_poll(1).await?;
    handle.shutdown().await;

    match ctx.format {
        OutputFormat::Table => print_output(&status_rows(&status), ctx.format)?,
        OutputFormat::Json => print_json(&status)?,
    }

    if let Some(error) = status.error_text {
        anyhow::bail!(error);
    }
    Ok(())
}
