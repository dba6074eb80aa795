//! Replay a recording and print engine diagnostics.

use std::path::{Path, PathBuf};

use crate::recording::{self, Recording};
use crate::AppContext;

pub async fn run(ctx: &AppContext, file: &Path, store: Option<PathBuf>) -> anyhow::Result<()> {
    let recording = Recording::load(file)?;
    let (engine, _sessions) = recording::replay(&ctx.config, recording, store, 1).await?;

    let report = engine.collect_garbage().await?;
    tracing::debug!(evicted = report.evicted.len(), "final collection");

    println!("{}", serde_json::to_string_pretty(&engine.dump())?);
    Ok(())
}
