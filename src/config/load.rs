use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use toml::{Table, Value};
use tracing::debug;

use super::core::Config;

/// Resolve a [`Config`] from defaults, TOML files applied in order (later
/// files override earlier ones table by table) and `section.key=value`
/// overrides applied last.
pub fn load_config<P, S>(paths: &[P], overrides: &[S]) -> Result<Config>
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let mut merged =
        Value::try_from(Config::default()).context("failed to serialize default config")?;

    for path in paths {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let table = contents
            .parse::<Table>()
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        debug!("applying config file {}", path.display());
        merge_value(&mut merged, Value::Table(table));
    }

    for assignment in overrides {
        apply_override(&mut merged, assignment.as_ref())?;
    }

    merged
        .try_into::<Config>()
        .context("invalid configuration")
}

impl Config {
    /// Apply a single `section.key=value` override in place.
    pub fn set(&mut self, assignment: &str) -> Result<()> {
        let mut value = Value::try_from(&*self).context("failed to serialize config")?;
        apply_override(&mut value, assignment)?;
        *self = value
            .try_into::<Config>()
            .with_context(|| format!("invalid override `{assignment}`"))?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config as toml")
    }
}

fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base), Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_override(root: &mut Value, assignment: &str) -> Result<()> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("override `{assignment}` must look like section.key=value"))?;
    let key = key.trim();
    let path: Vec<&str> = key.split('.').collect();
    if path.len() < 2 || path.iter().any(|segment| segment.is_empty()) {
        bail!("override key `{key}` must look like section.key");
    }

    let (field, sections) = path
        .split_last()
        .ok_or_else(|| anyhow!("empty override key"))?;
    let mut cursor = root;
    for section in sections {
        cursor = cursor
            .as_table_mut()
            .and_then(|table| table.get_mut(*section))
            .ok_or_else(|| anyhow!("unknown config section `{section}` in `{key}`"))?;
    }

    let table = cursor
        .as_table_mut()
        .ok_or_else(|| anyhow!("`{key}` does not name a config field"))?;
    let raw = raw.trim();
    let value = match (table.get(*field), parse_scalar(raw)) {
        (None, _) => bail!("unknown config field `{key}`"),
        // string fields take the text as written, even if it reads as a date or bool
        (Some(Value::String(_)), parsed) if !parsed.is_str() => Value::String(raw.to_string()),
        (Some(_), parsed) => parsed,
    };
    debug!("override {key} = {raw}");
    table.insert((*field).to_string(), value);
    Ok(())
}

/// Parse an override value as a TOML literal, falling back to a bare string.
fn parse_scalar(raw: &str) -> Value {
    format!("value = {raw}")
        .parse::<Table>()
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}
