//! Configuration loading for logical databases
//!
//! Each logical database (e.g. `cache`, `sessions`) is a top-level section in
//! a `databases.*` file. Sources are layered, highest priority last:
//!
//! 1. `config/databases.{toml,yaml,json}`
//! 2. `config/{env}/databases.{toml,yaml,json}` where `env` is `DBKIT_ENV`
//!    (default `development`)
//! 3. `config/local/databases.{toml,yaml,json}` (not committed)
//! 4. Environment variables `DBKIT_<SECTION>__<FIELD>`, e.g. `DBKIT_CACHE__PORT=6380`
//!
//! A section that no source mentions resolves to `T::default()`.

use errors::{DbkitError, DbkitResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

/// Default configuration directory, relative to the working directory
pub const CONFIG_DIR: &str = "config";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "DBKIT_";

/// Environment variable selecting the environment-specific layer
pub const ENV_SELECTOR: &str = "DBKIT_ENV";

const FILE_STEM: &str = "databases";

/// Current environment name (`DBKIT_ENV`, default `development`)
pub fn environment() -> String {
    std::env::var(ENV_SELECTOR).unwrap_or_else(|_| "development".to_string())
}

fn merge_stem(figment: Figment, dir: &Path) -> Figment {
    figment
        .merge(Toml::file(dir.join(format!("{}.toml", FILE_STEM))))
        .merge(Yaml::file(dir.join(format!("{}.yaml", FILE_STEM))))
        .merge(Yaml::file(dir.join(format!("{}.yml", FILE_STEM))))
        .merge(Json::file(dir.join(format!("{}.json", FILE_STEM))))
}

/// Build the layered figment rooted at `dir`
pub fn layered_figment(dir: impl AsRef<Path>) -> Figment {
    let dir = dir.as_ref();
    let figment = merge_stem(Figment::new(), dir);
    let figment = merge_stem(figment, &dir.join(environment()));
    let figment = merge_stem(figment, &dir.join("local"));
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

fn extract_section<T>(layers: Figment, name: &str) -> DbkitResult<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    Figment::from(Serialized::defaults(T::default()))
        .merge(layers.focus(name))
        .extract()
        .map_err(|e| {
            DbkitError::Configuration(format!(
                "Failed to load configuration section '{}': {}",
                name, e
            ))
        })
}

/// Load one logical database section from the default `config/` directory
pub fn load_section<T>(name: &str) -> DbkitResult<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    load_section_from_dir(CONFIG_DIR, name)
}

/// Load one logical database section from the given configuration directory
pub fn load_section_from_dir<T>(dir: impl AsRef<Path>, name: &str) -> DbkitResult<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    if name.trim().is_empty() {
        return Err(DbkitError::MissingConfig("database name".to_string()));
    }
    extract_section(layered_figment(dir), name)
}

/// Load one section from a specific file, environment overrides still applied
pub fn load_section_from_file<T, P>(path: P, name: &str) -> DbkitResult<T>
where
    T: DeserializeOwned + Serialize + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(DbkitError::MissingConfig(format!(
            "configuration file {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DbkitError::Configuration("Config file must have an extension".into()))?;

    let figment = match extension {
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        "json" => Figment::new().merge(Json::file(path)),
        _ => {
            return Err(DbkitError::Configuration(format!(
                "Unsupported config file format: {}",
                extension
            )))
        },
    };

    extract_section(figment.merge(Env::prefixed(ENV_PREFIX).split("__")), name)
}
