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

//! Global `tracing` setup shared by the spool binaries and tests.
//!
//! ```text
//! Registry
//!  ├── Targets                      # level filter
//!  ├── stdout layer                 # text or JSON, if append_stdout
//!  ├── {dir}/spool.*                # rolling file, if dir is set
//!  └── {dir}/spool-err.*            # ERROR only, if dir is set
//! ```

use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once},
};

use bon::Builder;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, registry::LookupSpan,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// Lets configuration files and environment variables write `""` to mean
/// "use the default" for enum-valued fields.
///
/// # Errors
/// Returns an error if the non-empty string does not parse into `T`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Prefix of the rolling log files. The error-only file appends `-err`.
pub const LOG_FILE_PREFIX: &str = "spool";

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rolling log files. Empty disables file logging.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Level filter such as `"info"` or `"info,spool_core=debug"`. Falls
    /// back to `RUST_LOG`, then to `"info"`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub rotation: LogRotation,

    /// Rotated files kept per log file prefix.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, including the current span list.
    Json,
    #[default]
    Text,
}

/// How often the rolling file appenders start a new file.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Minutely,
    #[default]
    Hourly,
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Self::MINUTELY,
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

/// Initialize logging for unit and integration tests.
///
/// Logs go to files below `UNITTEST_LOG_DIR` (default
/// `/tmp/__unittest_logs`) at `UNITTEST_LOG_LEVEL` (default `debug`). Safe to
/// call from every test; only the first call has an effect.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD.as_ref().lock().unwrap();

        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,tokio=info,runtime=info".to_string());

        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            append_stdout: false,
            ..Default::default()
        };
        *g = Some(init_global_logging("unittest", &opts));

        tracing::info!("logs dir = {}", dir);
    });
}

/// Keeps the unit test writer guards alive for the whole test binary.
static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

const DEFAULT_LOG_TARGETS: &str = "info";

/// Install the global subscriber described by `opts`.
///
/// The returned guards flush the non-blocking writers when dropped and must
/// be held until the process exits. Only the first call installs anything;
/// later calls return no guards.
///
/// # Panics
///
/// Panics if the log directory cannot be used or the level string does not
/// parse, so misconfigured logging is caught at startup.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = opts.append_stdout.then(|| {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            fmt_layer(writer, opts.log_format, std::io::stdout().is_terminal())
        });

        let file_logging_layer = (!opts.dir.is_empty()).then(|| {
            let (writer, guard) = rolling_writer(opts, LOG_FILE_PREFIX);
            guards.push(guard);
            fmt_layer(writer, opts.log_format, false)
        });

        let err_file_logging_layer = (!opts.dir.is_empty()).then(|| {
            let (writer, guard) = rolling_writer(opts, &format!("{LOG_FILE_PREFIX}-err"));
            guards.push(guard);
            fmt_layer(writer, opts.log_format, false)
                .with_filter(filter::LevelFilter::ERROR)
                .boxed()
        });

        let filter = level_targets(opts, env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .expect("error parsing log level string");

        let subscriber = Registry::default()
            .with(filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");

        tracing::info!(
            app = app_name,
            version = env!("CARGO_PKG_VERSION"),
            pid = std::process::id(),
            "Logging initialized"
        );
    });

    guards
}

/// Level filter from `opts.level`, else `env_level`, else `info`. Fixed for
/// the lifetime of the process.
fn level_targets(
    opts: &LoggingOptions,
    env_level: Option<&str>,
) -> Result<filter::Targets, filter::ParseError> {
    opts.level
        .as_deref()
        .or(env_level)
        .unwrap_or(DEFAULT_LOG_TARGETS)
        .parse()
}

fn rolling_writer(opts: &LoggingOptions, prefix: &str) -> (NonBlocking, WorkerGuard) {
    let rolling_appender = RollingFileAppender::builder()
        .rotation(opts.rotation.into())
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .unwrap_or_else(|e| {
            panic!(
                "initializing rolling file appender at {} failed: {}",
                &opts.dir, e
            )
        });
    tracing_appender::non_blocking(rolling_appender)
}

fn fmt_layer<S>(writer: NonBlocking, format: LogFormat, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = LoggingOptions::default();
        assert!(opts.dir.is_empty());
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.rotation, LogRotation::Hourly);
        assert_eq!(opts.max_log_files, 720);
        assert!(opts.append_stdout);
    }

    #[test]
    fn test_builder_matches_defaults() {
        let built = LoggingOptions::builder().build();
        assert_eq!(built, LoggingOptions::default());

        let json = LoggingOptions::builder()
            .dir("/var/log/spool".to_string())
            .log_format(LogFormat::Json)
            .build();
        assert_eq!(json.dir, "/var/log/spool");
        assert_eq!(json.log_format, LogFormat::Json);
    }

    #[test]
    fn test_level_targets_precedence() {
        use tracing::Level;

        let opts = LoggingOptions::builder()
            .level("warn,spool_core=debug".to_string())
            .build();
        let targets = level_targets(&opts, Some("trace")).unwrap();
        assert!(targets.would_enable("spool_core::writer", &Level::DEBUG));
        assert!(!targets.would_enable("spool_app", &Level::INFO));
        assert!(targets.would_enable("spool_app", &Level::WARN));

        let from_env = level_targets(&LoggingOptions::default(), Some("error")).unwrap();
        assert!(!from_env.would_enable("spool_app", &Level::WARN));

        let fallback = level_targets(&LoggingOptions::default(), None).unwrap();
        assert!(fallback.would_enable("spool_app", &Level::INFO));
        assert!(!fallback.would_enable("spool_app", &Level::DEBUG));

        let bad = LoggingOptions::builder().level("spool=loud".to_string()).build();
        assert!(level_targets(&bad, None).is_err());
    }

    #[test]
    fn test_empty_format_falls_back_to_default() {
        let opts: LoggingOptions =
            serde_json::from_str(r#"{"log_format": "", "rotation": "daily"}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.rotation, LogRotation::Daily);

        let json: LoggingOptions = serde_json::from_str(r#"{"log_format": "json"}"#).unwrap();
        assert_eq!(json.log_format, LogFormat::Json);
        assert!(serde_json::from_str::<LoggingOptions>(r#"{"log_format": "xml"}"#).is_err());
    }
}
