// SPDX-License-Identifier: Apache-2.0

use crate::exporters::debug_file::{DebugFileConfig, DebugFileExporter};
use crate::exporters::http::{HttpExporter, HttpExporterConfig};
use crate::exporters::log::{LogExporter, LogExporterConfig};
use crate::processors::ProcessorError;
use crate::processors::k8s::{K8sMetadataConfig, K8sMetadataProcessor};
use crate::processors::multiline::{MultilineConfig, MultilineProcessor};
use crate::processors::transform::{TransformConfig, TransformProcessor};
use crate::receivers::file_tail::{FileTailConfig, FileTailReceiver};
use crate::receivers::scrape::{ScrapeConfig, ScrapeReceiver};
use crate::topology::pipeline::{DEFAULT_STOP_TIMEOUT, PipelineConfig};
use crate::topology::registry::{ComponentError, ComponentRegistry};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower::BoxError;

pub const ENV_PREFIX: &str = "TELEMETER_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(Box<figment::Error>),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error("failed to build {kind} `{name}`: {error}")]
    Build {
        kind: &'static str,
        name: String,
        error: BoxError,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Parse(Box::new(e))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReceiversConfig {
    pub file_tail: Vec<FileTailConfig>,
    pub scrape: Vec<ScrapeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    pub multiline: Vec<MultilineConfig>,
    pub transform: Vec<TransformConfig>,
    pub k8s_metadata: Vec<K8sMetadataConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportersConfig {
    pub http: Vec<HttpExporterConfig>,
    pub debug_file: Vec<DebugFileConfig>,
    pub log: Vec<LogExporterConfig>,
}

/// Top level configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    pub receivers: ReceiversConfig,
    pub processors: ProcessorsConfig,
    pub exporters: ExportersConfig,
    pub pipelines: Vec<PipelineConfig>,
    /// How long a pipeline may take to stop before its tasks are aborted
    #[serde(with = "crate::init::parse::humantime_duration_opt")]
    pub stop_timeout: Option<Duration>,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            receivers: ReceiversConfig::default(),
            processors: ProcessorsConfig::default(),
            exporters: ExportersConfig::default(),
            pipelines: Vec::new(),
            stop_timeout: Some(DEFAULT_STOP_TIMEOUT),
        }
    }
}

/// Loads the TOML file at `path`, with `TELEMETER_` prefixed environment
/// variables layered on top. Nested keys are separated by `__`, for example
/// `TELEMETER_STOP_TIMEOUT=5s`.
pub fn load_config(path: &Path) -> Result<MeteringConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let figment = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    Ok(figment.extract()?)
}

/// Parses configuration from a TOML string without consulting the
/// environment.
pub fn parse_config(toml: &str) -> Result<MeteringConfig, ConfigError> {
    Ok(Figment::new().merge(Toml::string(toml)).extract()?)
}

fn build_err<E>(kind: &'static str, name: &str) -> impl FnOnce(E) -> ConfigError
where
    E: Into<BoxError>,
{
    let name = name.to_string();
    move |e| ConfigError::Build {
        kind,
        name,
        error: e.into(),
    }
}

fn processor_err(name: &str) -> impl FnOnce(ProcessorError) -> ConfigError {
    build_err("processor", name)
}

/// Instantiates every declared component. A `log` exporter is always
/// available unless the file declares one with that name.
pub fn build_registry(config: &MeteringConfig) -> Result<ComponentRegistry, ConfigError> {
    let mut registry = ComponentRegistry::new();

    for c in &config.receivers.file_tail {
        let r = FileTailReceiver::new(c.clone()).map_err(build_err("receiver", &c.name))?;
        registry.register_receiver(Arc::new(r))?;
    }
    for c in &config.receivers.scrape {
        let r = ScrapeReceiver::new(c.clone()).map_err(build_err("receiver", &c.name))?;
        registry.register_receiver(Arc::new(r))?;
    }

    for c in &config.processors.multiline {
        let p = MultilineProcessor::new(c.clone()).map_err(processor_err(&c.name))?;
        registry.register_processor(Arc::new(p))?;
    }
    for c in &config.processors.transform {
        let p = TransformProcessor::new(c.clone()).map_err(processor_err(&c.name))?;
        registry.register_processor(Arc::new(p))?;
    }
    for c in &config.processors.k8s_metadata {
        registry.register_processor(Arc::new(K8sMetadataProcessor::new(c.clone())))?;
    }

    for c in &config.exporters.http {
        let e = HttpExporter::new(c.clone()).map_err(build_err("exporter", &c.name))?;
        registry.register_exporter(Arc::new(e))?;
    }
    for c in &config.exporters.debug_file {
        registry.register_exporter(Arc::new(DebugFileExporter::new(c.clone())))?;
    }
    for c in &config.exporters.log {
        registry.register_exporter(Arc::new(LogExporter::new(c.clone())))?;
    }
    let default_log = LogExporterConfig::default();
    if registry.exporter(&default_log.name).is_none() {
        registry.register_exporter(Arc::new(LogExporter::new(default_log)))?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::DropPolicy;
    use crate::exporters::http::Protocol;
    use std::io::Write;

    const SAMPLE: &str = r#"
stop_timeout = "3s"

[[receivers.file_tail]]
name = "app-log"
file_path = "/var/log/app.log"
poll_interval = "100ms"

[[receivers.scrape]]
name = "dapr"
enabled = true
scrape_interval = 30

[[processors.multiline]]
name = "stack"

[[processors.transform]]
name = "mask"
field_pattern = 'user=(?P<user>\w+)'

[[processors.transform.mask_rules]]
pattern = 'password=\S+'
replacement = "password=***"

[[exporters.http]]
name = "otel"
protocol = "Grpc"
endpoint = "https://collector:4318/v1/metrics"
timeout = "2s"
headers = { "x-api-key" = "abc" }

[[exporters.debug_file]]
name = "debug"
path = "/tmp/debug.log"

[[pipelines]]
name = "logs"
receiver = "app-log"
processors = ["stack", "mask"]
exporters = ["debug", "otel"]

[pipelines.backpressure]
channel_capacity = 10
batch_size = 5
flush_interval = "2s"
drop_policy = "drop_oldest"

[[pipelines]]
name = "metrics"
receiver = "dapr"
exporters = ["log"]
enabled = false
"#;

    #[test]
    fn parses_full_file() {
        let cfg = parse_config(SAMPLE).unwrap();
        assert_eq!(Some(Duration::from_secs(3)), cfg.stop_timeout);

        let tail = &cfg.receivers.file_tail[0];
        assert_eq!(Duration::from_millis(100), tail.poll_interval);
        assert_eq!(Duration::from_secs(30), cfg.receivers.scrape[0].scrape_interval);

        let mask = &cfg.processors.transform[0];
        assert_eq!("password=***", mask.mask_rules[0].replacement);
        assert!(mask.mask_rules[0].target_fields.is_empty());

        let http = &cfg.exporters.http[0];
        assert_eq!(Protocol::Grpc, http.protocol);
        assert_eq!(Some(&"abc".to_string()), http.headers.get("x-api-key"));

        assert_eq!(2, cfg.pipelines.len());
        let logs = &cfg.pipelines[0];
        assert_eq!(vec!["stack", "mask"], logs.processors);
        assert_eq!(5, logs.backpressure.batch_size);
        assert_eq!(DropPolicy::DropOldest, logs.backpressure.drop_policy);
        assert!(logs.enabled);
        assert!(!cfg.pipelines[1].enabled);
        assert_eq!(256, cfg.pipelines[1].backpressure.batch_size);
    }

    #[test]
    fn stop_timeout_defaults_when_omitted() {
        let cfg = parse_config("").unwrap();
        assert_eq!(Some(Duration::from_secs(10)), cfg.stop_timeout);
        assert_eq!(MeteringConfig::default(), cfg);
    }

    #[test]
    fn builds_registry() {
        let cfg = parse_config(SAMPLE).unwrap();
        let registry = build_registry(&cfg).unwrap();

        assert!(registry.receiver("APP-LOG").is_some());
        assert!(registry.receiver("dapr").is_some());
        assert!(registry.processor("stack").is_some());
        assert!(registry.processor("mask").is_some());
        assert!(registry.exporter("otel").is_some());
        assert!(registry.exporter("debug").is_some());
        assert!(registry.exporter("log").is_some());
        assert_eq!(7, registry.len());
    }

    #[test]
    fn duplicate_names_rejected() {
        let cfg = parse_config(
            r#"
[[exporters.log]]
name = "out"
[[exporters.debug_file]]
name = "OUT"
"#,
        )
        .unwrap();
        assert!(matches!(
            build_registry(&cfg),
            Err(ConfigError::Component(ComponentError::Duplicate { .. }))
        ));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let cfg = parse_config(
            r#"
[[processors.multiline]]
name = "bad"
start_pattern = "("
"#,
        )
        .unwrap();
        assert!(matches!(
            build_registry(&cfg),
            Err(ConfigError::Build { kind: "processor", .. })
        ));
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(2, cfg.pipelines.len());

        assert!(matches!(
            load_config(Path::new("/nonexistent/telemeter.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn unparsable_file() {
        assert!(matches!(
            parse_config("[[pipelines]]\nname = 5"),
            Err(ConfigError::Parse(_))
        ));
    }
}
