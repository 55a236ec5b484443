use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::schema::{InstanceConfig, LecternConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "lectern.toml",
    "lectern.yaml",
    "lectern.yml",
    "lectern.json",
];

/// Environment variable that relocates the config directory.
pub const CONFIG_DIR_ENV: &str = "LECTERN_CONFIG_DIR";

static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Override the config directory for the rest of the process (`--config-dir`).
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .write()
        .unwrap_or_else(|e| e.into_inner()) = Some(path);
}

/// Returns the user config directory.
///
/// Resolution order:
/// 1. programmatic override (`set_config_dir`)
/// 2. `LECTERN_CONFIG_DIR`
/// 3. `~/.config/lectern` (platform equivalent)
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
    {
        return Some(dir);
    }
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "lectern").map(|d| d.config_dir().to_path_buf())
}

/// Directory holding encrypted token files (`<config-dir>/tokens`).
///
/// Fails when no config directory can be determined, rather than writing
/// tokens relative to the working directory.
pub fn tokens_dir() -> anyhow::Result<PathBuf> {
    config_dir().map(|dir| dir.join("tokens")).ok_or_else(|| {
        anyhow::anyhow!(
            "cannot determine the config directory; set {CONFIG_DIR_ENV} or pass --config-dir"
        )
    })
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<LecternConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./lectern.{toml,yaml,yml,json}` (project-local)
/// 2. `<config-dir>/lectern.{toml,yaml,yml,json}` (user-global)
///
/// Returns `LecternConfig::default()` if no config file is found.
pub fn discover_and_load() -> LecternConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    LecternConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Pick an instance by name (or the default) and apply env overrides.
///
/// Falls back to the only configured instance when no name and no
/// `default_instance` are set. An instance that exists only in the
/// environment (`LECTERN_<NAME>_BASE_URL` etc.) is also accepted.
pub fn resolve_instance(config: &LecternConfig, name: Option<&str>) -> anyhow::Result<InstanceConfig> {
    resolve_instance_with(config, name, |key| std::env::var(key).ok())
}

fn resolve_instance_with(
    config: &LecternConfig,
    name: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<InstanceConfig> {
    let name = match name.or(config.default_instance.as_deref()) {
        Some(n) => n.to_string(),
        None => match config.instances.keys().collect::<Vec<_>>().as_slice() {
            [only] => (*only).clone(),
            [] => anyhow::bail!("no instance configured; add one under [instances.<name>]"),
            _ => anyhow::bail!("several instances configured; pass --instance or set default_instance"),
        },
    };

    let mut instance = config.instances.get(&name).cloned().unwrap_or_default();
    instance.name = name.clone();

    let prefix = format!(
        "LECTERN_{}_",
        name.to_uppercase().replace(['-', '.', ' '], "_")
    );
    if let Some(v) = lookup(&format!("{prefix}BASE_URL")) {
        instance.base_url = v;
    }
    if let Some(v) = lookup(&format!("{prefix}CLIENT_ID")) {
        instance.client_id = v;
    }
    if let Some(v) = lookup(&format!("{prefix}CLIENT_SECRET")) {
        instance.client_secret = Some(Secret::new(v));
    }

    if instance.base_url.is_empty() && !config.instances.contains_key(&name) {
        anyhow::bail!("unknown instance: {name}");
    }
    instance.base_url = instance.base_url.trim_end_matches('/').to_string();
    Ok(instance)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<LecternConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
