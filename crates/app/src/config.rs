// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Layered application configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. the embedded `config/default.toml`
//! 2. the file given with `--config`, if any
//! 3. environment variables such as `SPOOL__STORAGE__CONTAINER=audit`

use std::path::Path;

use config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Whatever, ensure_whatever};
use spool_common_telemetry::logging::LoggingOptions;
use spool_core::{ContainerAccess, SpoolConfig, normalize_identifier};
use validator::Validate;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

pub const ENV_PREFIX: &str = "SPOOL";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingOptions,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[validate(nested)]
    pub source:  SourceConfig,
    #[serde(default)]
    pub spool:   SpoolConfig,
}

/// Where partition objects are written.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// Root directory of the filesystem backend.
    #[validate(length(min = 1))]
    pub connection:    String,
    /// Container (directory) name below `connection`, normalized before use.
    #[validate(length(min = 1))]
    pub container:     String,
    /// Create new containers world-readable.
    #[serde(default)]
    pub public_access: bool,
}

impl StorageConfig {
    #[must_use]
    pub const fn access(&self) -> ContainerAccess {
        if self.public_access {
            ContainerAccess::Public
        } else {
            ContainerAccess::Private
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// One record per line read from standard input.
    Stdin,
    /// One record per length-delimited frame received over TCP.
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    pub kind:             SourceKind,
    /// Bind address of the TCP source.
    #[validate(length(min = 1))]
    pub listen_addr:      String,
    /// Largest line or frame accepted from a source.
    #[validate(range(min = 1))]
    pub max_frame_length: usize,
}

impl AppConfig {
    /// Load the configuration from all layers and validate it.
    pub fn load(path: Option<&Path>) -> Result<Self, Whatever> { Self::load_with_env(path, None) }

    /// Like [`load`](Self::load), reading environment overrides from `env`
    /// instead of the process environment when it is given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, Whatever> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(path) = path {
            ensure_whatever!(path.exists(), "Config file {} does not exist", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .source(env),
        );

        let config: Self = builder
            .build()
            .whatever_context("Failed to assemble configuration")?
            .try_deserialize()
            .whatever_context("Failed to parse configuration")?;

        config
            .validate()
            .whatever_context("Invalid configuration")?;
        ensure_whatever!(
            normalize_identifier(&config.storage.container)
                .chars()
                .any(|c| c.is_ascii_alphanumeric()),
            "Container name {:?} has no letters or digits",
            config.storage.container
        );
        Ok(config)
    }
}
