// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static NovaRocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from("novarocks.toml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_CONFIG or create ./novarocks.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_remote=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub remote: RemoteConfig,
}

impl NovaRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: NovaRocksConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Filter expression handed to the logging layer.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for NovaRocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            remote: RemoteConfig::default(),
        }
    }
}

/// Defaults for remote source pipes built without explicit flags.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteConfig {
    /// Read remote replies through the descriptor-driven non-blocking path.
    #[serde(default = "default_async_read")]
    pub async_read: bool,
    #[serde(default)]
    pub add_aggregation_info: bool,
    #[serde(default)]
    pub add_totals: bool,
    #[serde(default)]
    pub add_extremes: bool,
}

fn default_async_read() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            async_read: default_async_read(),
            add_aggregation_info: false,
            add_totals: false,
            add_extremes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = NovaRocksConfig::parse("").expect("parse empty config");
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.remote.async_read);
        assert!(!cfg.remote.add_totals);
        assert_eq!(cfg.effective_log_filter(), "info");
    }

    #[test]
    fn remote_section_overrides_defaults() {
        let cfg = NovaRocksConfig::parse(
            r#"
log_level = "warn"
log_filter = "novarocks_remote=debug"

[remote]
async_read = false
add_totals = true
add_extremes = true
"#,
        )
        .expect("parse config");
        assert!(!cfg.remote.async_read);
        assert!(cfg.remote.add_totals);
        assert!(cfg.remote.add_extremes);
        assert!(!cfg.remote.add_aggregation_info);
        assert_eq!(cfg.effective_log_filter(), "novarocks_remote=debug");
    }

    #[test]
    fn invalid_type_is_reported() {
        let err = NovaRocksConfig::parse("[remote]\nasync_read = \"yes\"\n")
            .expect_err("string is not a bool");
        assert!(err.to_string().contains("async_read"), "err={err}");
    }
}
