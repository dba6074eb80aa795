//! Configuration management commands.

use feedsync_core::Config;

use crate::{AppContext, ConfigAction};

pub fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", ctx.config.to_toml_string()?);

            let result = ctx.config.validate();
            for issue in result.errors() {
                eprintln!("error: {}: {}", issue.field, issue.message);
            }
            for issue in result.warnings() {
                eprintln!("warning: {}: {}", issue.field, issue.message);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_dir().join("config.toml").display());
        }
    }
    Ok(())
}
