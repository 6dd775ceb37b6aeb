use anyhow::{bail, Context, Result};
use immersive_config::{
    load_config, load_enabled, save_config, save_enabled, ConfigPatch, ImmersiveConfig,
    JsonFileStore, CONFIG_KEY, ENABLED_KEY,
};
use serde_json::{Map, Value};

use crate::cli::ConfigAction;
use crate::paths::AppPaths;

pub fn open_store(paths: &AppPaths) -> Result<JsonFileStore> {
    let path = paths.preferences_file();
    JsonFileStore::open(&path)
        .with_context(|| format!("failed to open preferences at {}", path.display()))
}

pub fn handle_config_command(action: ConfigAction, paths: &AppPaths) -> Result<()> {
    match action {
        ConfigAction::Show => show(paths),
        ConfigAction::Set(args) => set(paths, &args.key, &args.value),
    }
}

pub fn set_enabled(paths: &AppPaths, enabled: bool) -> Result<()> {
    let mut store = open_store(paths)?;
    save_enabled(&mut store, enabled)?;
    println!(
        "Ambient background {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn show(paths: &AppPaths) -> Result<()> {
    let store = open_store(paths)?;
    let config = load_config(&store);
    println!("Preferences: {}", store.path().display());
    println!("{ENABLED_KEY}: {}", load_enabled(&store));
    println!(
        "{CONFIG_KEY}: {}",
        serde_json::to_string_pretty(&config).context("failed to render configuration")?
    );
    Ok(())
}

fn set(paths: &AppPaths, key: &str, raw: &str) -> Result<()> {
    let patch = parse_assignment(key, raw)?;
    let mut store = open_store(paths)?;
    let updated = patch.apply(&load_config(&store));
    save_config(&mut store, &updated)?;
    tracing::debug!(key, path = %store.path().display(), "configuration updated");
    println!("{CONFIG_KEY}.{key} updated.");
    Ok(())
}

/// Turns `key value` into a single-field patch, rejecting unknown keys.
fn parse_assignment(key: &str, raw: &str) -> Result<ConfigPatch> {
    let known = serde_json::to_value(ImmersiveConfig::default())?;
    let is_known = known
        .as_object()
        .is_some_and(|fields| fields.contains_key(key));
    if !is_known {
        let names = known
            .as_object()
            .map(|fields| fields.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        bail!("unknown configuration key '{key}' (expected one of: {names})");
    }

    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.into()));
    let mut fields = Map::new();
    fields.insert(key.to_string(), value);
    serde_json::from_value(Value::Object(fields))
        .with_context(|| format!("invalid value '{raw}' for {key}"))
}
