//! Command-line host for the day-cycle sync engine.

pub mod commands;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daycycle_ipc::{EngineConfig, TimezoneMode};

/// Initialize logging.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "daycycle={level},daycycle_lib={level},daycycle_engine={level},daycycle_delivery={level},daycycle_clock={level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Read an `EngineConfig` from a JSON file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("Invalid config {}", path.display()))
}

pub fn parse_config(text: &str) -> Result<EngineConfig> {
    let config: EngineConfig = serde_json::from_str(text)?;
    Ok(config)
}

/// Parse `local` or a fixed UTC offset written `+HH:MM` / `-HH:MM`.
pub fn parse_timezone(value: &str) -> Result<TimezoneMode, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("local") {
        return Ok(TimezoneMode::Local);
    }

    let (sign, rest) = if let Some(rest) = value.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = value.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(format!("expected `local` or +HH:MM, got `{value}`"));
    };
    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| format!("expected +HH:MM, got `{value}`"))?;
    let hours: i32 = hours
        .parse()
        .map_err(|_| format!("invalid hours in `{value}`"))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| format!("invalid minutes in `{value}`"))?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(format!("offset out of range: `{value}`"));
    }

    Ok(TimezoneMode::FixedReference {
        offset_seconds: sign * (hours * 3600 + minutes * 60),
    })
}
