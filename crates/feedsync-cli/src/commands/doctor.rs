//! Diagnostic command to check installation.

use feedsync_core::Config;
use feedsync_session::{PayloadStore, SqlitePayloadStore};

use crate::AppContext;

pub fn run(ctx: &AppContext) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Check config directory
    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.join("config.toml").exists() {
        println!("  ✓ config.toml found");
    } else {
        println!("  ✗ No config.toml (defaults in use)");
    }

    // Check data directory
    let data_dir = Config::data_dir();
    println!("\nData directory: {:?}", data_dir);
    if data_dir.exists() {
        println!("  ✓ Exists");
    } else {
        println!("  ✗ Missing (created on first persistent run)");
    }

    // Check configuration
    println!("\nConfiguration:");
    let result = ctx.config.validate();
    if result.issues.is_empty() {
        println!("  ✓ Valid");
    }
    for issue in result.errors() {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }
    for issue in result.warnings() {
        println!("  ! {}: {}", issue.field, issue.message);
    }
    println!(
        "  Synthetic paging: {}",
        if ctx.config.paging_enabled() { "enabled" } else { "disabled" }
    );

    // Check payload store
    println!("\nPayload store:");
    let opened = match &ctx.config.store.path {
        Some(path) => SqlitePayloadStore::new(path),
        None => SqlitePayloadStore::open_default(),
    };
    match opened {
        Ok(store) => {
            println!("  ✓ {}", store.path().display());
            match store.payload_count() {
                Ok(count) => println!("  {} stored payloads", count),
                Err(e) => println!("  ✗ Failed to count payloads: {}", e),
            }
        }
        Err(e) => println!("  ✗ Failed to open store: {}", e),
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
