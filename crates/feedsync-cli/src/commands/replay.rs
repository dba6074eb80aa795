//! Replay a recording and print each session's view as a tree.

use std::path::{Path, PathBuf};

use feedsync_core::{ContentId, ModelChild};
use feedsync_session::SessionHandle;

use crate::recording::{self, label, preview, Recording};
use crate::AppContext;

pub async fn run(
    ctx: &AppContext,
    file: &Path,
    store: Option<PathBuf>,
    session_count: usize,
) -> anyhow::Result<()> {
    let recording = Recording::load(file)?;
    let (_engine, sessions) = recording::replay(&ctx.config, recording, store, session_count).await?;

    for session in &sessions {
        println!("session {}", session.id());
        match session.root_feature() {
            Some(root) => {
                println!("  {} {}", label(&root.id), preview(&root.payload));
                print_children(session, &root.id, 2)?;
            }
            None => println!("  (empty)"),
        }
        println!();
    }
    Ok(())
}

fn print_children(session: &SessionHandle, parent: &ContentId, depth: usize) -> anyhow::Result<()> {
    let indent = "  ".repeat(depth);
    for item in session.cursor(Some(parent))? {
        match item {
            ModelChild::Feature(feature) => {
                println!("{indent}{} {}", label(&feature.content_id), preview(&feature.payload));
                print_children(session, &feature.content_id, depth + 1)?;
            }
            ModelChild::Token(token) => println!("{indent}... more ({})", token.id),
        }
    }
    Ok(())
}
