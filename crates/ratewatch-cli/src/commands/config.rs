//! Config commands
//!
//! Commands for managing saved settings and the stored API key.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use ratewatch_core::credentials::{default_secret_store, API_KEY_ENV};
use ratewatch_core::settings::SETTINGS_KEYS;

use super::Context;
use crate::output::{print_info, print_output, print_success};

/// Pseudo key addressing the secret store instead of the settings file
const API_KEY: &str = "api_key";

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (refresh_interval, mode, model, sessions_dir, api_key)
        key: String,

        /// Configuration value (empty clears sessions_dir and api_key)
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx),
        ConfigAction::Set { key, value } => set_config(ctx, key, value),
        ConfigAction::Get { key } => get_config(ctx, key),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let rows = get_all_config(ctx);
    print_output(&rows, ctx.format)?;
    Ok(())
}

fn get_config(ctx: &Context, key: String) -> Result<()> {
    let rows = get_all_config(ctx);

    if let Some(row) = rows.iter().find(|r| r.key.eq_ignore_ascii_case(&key)) {
        print_info(&format!("{} = {}", row.key, row.value), ctx.quiet);
    } else {
        anyhow::bail!("Config key not found: {}", key);
    }

    Ok(())
}

fn set_config(ctx: &Context, key: String, value: String) -> Result<()> {
    let key = key.to_lowercase();

    if key == API_KEY {
        let store = default_secret_store()?;
        store.save(value.trim())?;
        if value.trim().is_empty() {
            print_success("API key removed", ctx.quiet);
        } else {
            print_success(
                &format!("API key saved to {}", store.backend_name()),
                ctx.quiet,
            );
        }
        return Ok(());
    }

    let mut settings = ctx.settings.clone();
    settings.set(&key, &value)?;
    settings.save_to(&ctx.config_path)?;

    let shown = settings.get(&key).unwrap_or_else(|| "(unset)".to_string());
    print_success(&format!("{} = {}", key, shown), ctx.quiet);
    Ok(())
}

fn get_all_config(ctx: &Context) -> Vec<ConfigRow> {
    let defaults = ratewatch_core::Settings::default();
    let source_of = |key: &str| {
        if ctx.settings.get(key) == defaults.get(key) {
            "default".to_string()
        } else {
            "settings".to_string()
        }
    };

    let mut rows: Vec<ConfigRow> = SETTINGS_KEYS
        .iter()
        .map(|key| ConfigRow {
            key: key.to_string(),
            value: display_value(ctx, key),
            source: source_of(key),
        })
        .collect();

    rows.push(api_key_row());
    rows.push(ConfigRow {
        key: "config_path".to_string(),
        value: ctx.config_path.display().to_string(),
        source: "-".to_string(),
    });
    rows
}

fn display_value(ctx: &Context, key: &str) -> String {
    match key {
        "mode" => ctx
            .settings
            .get(key)
            .unwrap_or_else(|| "(auto)".to_string()),
        "sessions_dir" => ctx.settings.sessions_root().display().to_string(),
        _ => ctx.settings.get(key).unwrap_or_default(),
    }
}

fn api_key_row() -> ConfigRow {
    let stored = match default_secret_store() {
        Ok(store) => store.load().map(|key| (key, store.backend_name().to_string())),
        Err(e) => {
            log::debug!("Secret store unavailable: {}", e);
            None
        }
    };
    let from_env = || {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|key| (key, "env".to_string()))
    };

    match stored.or_else(from_env) {
        Some((key, source)) => ConfigRow {
            key: API_KEY.to_string(),
            value: mask_secret(&key),
            source,
        },
        None => ConfigRow {
            key: API_KEY.to_string(),
            value: "(not set)".to_string(),
            source: "-".to_string(),
        },
    }
}

/// Show only the last four characters of a secret
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.trim().chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-proj-abcdefgh1234"), "****1234");
        assert_eq!(mask_secret("short"), "****");
    }
}
