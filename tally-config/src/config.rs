use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_log::LogConfig;
use tally_metrics::AggregatorServiceConfig;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => write!(f, " (file {})", file_name.display()),
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self {
            inner: Some(inner.into()),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .as_deref()
            .map(|inner| inner as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Basename of the configuration file within the config folder.
const CONFIG_FILE_NAME: &str = "config.yml";

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The port to bind for statsd datagrams.
    pub udp_port: Option<String>,
    /// The port to bind for the HTTP query API.
    pub http_port: Option<String>,
    /// The key required by the HTTP query API.
    pub api_key: Option<String>,
    /// Host of the downstream Graphite sink.
    pub sink_host: Option<String>,
    /// Port of the downstream Graphite sink.
    pub sink_port: Option<String>,
    /// The log level of Tally's own crates.
    pub log_level: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Statsd ingestion settings.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Udp {
    /// The host the UDP listener binds to.
    host: IpAddr,
    /// The port the UDP listener binds to.
    port: u16,
    /// Logs every raw datagram at debug level.
    dump_messages: bool,
}

impl Default for Udp {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 8125,
            dump_messages: false,
        }
    }
}

/// HTTP query API settings.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Http {
    /// The host the HTTP server binds to.
    host: IpAddr,
    /// The port the HTTP server binds to.
    port: u16,
    /// The key clients must present on all endpoints except `/sys/info`.
    api_key: Option<String>,
    /// Name of the header carrying the API key.
    api_key_header: String,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 8080,
            api_key: None,
            api_key_header: "x-tally-statsapikey".to_owned(),
        }
    }
}

/// Downstream Graphite sink.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Sink {
    /// Host of the sink. Reports are not pushed when unset.
    host: Option<String>,
    /// Port of the sink's plaintext listener.
    port: u16,
}

impl Default for Sink {
    fn default() -> Self {
        Self {
            host: None,
            port: 2003,
        }
    }
}

/// Controls internal limits.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Limits {
    /// The maximum number of seconds to wait for pending work after a graceful shutdown signal.
    shutdown_timeout: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            shutdown_timeout: 10,
        }
    }
}

/// Self-instrumentation settings.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Address of a statsd server for Tally's own metrics. Disabled when unset.
    statsd: Option<String>,
    /// Prefix of all of Tally's own metrics.
    prefix: String,
    /// Tags added to all of Tally's own metrics.
    default_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "tally".to_owned(),
            default_tags: BTreeMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    udp: Udp,
    #[serde(default)]
    http: Http,
    #[serde(default)]
    sink: Sink,
    #[serde(default)]
    collector: AggregatorServiceConfig,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
}

impl ConfigValues {
    fn path(base: &Path) -> PathBuf {
        base.join(CONFIG_FILE_NAME)
    }

    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a YAML string.
    ///
    /// This is mostly useful for tests.
    pub fn from_yaml(yaml: &str) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_yaml::from_str(yaml)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        if let Some(port) = overrides.udp_port {
            self.values.udp.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "udp_port"))?;
        }

        let http = &mut self.values.http;
        if let Some(port) = overrides.http_port {
            http.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "http_port"))?;
        }

        if let Some(api_key) = overrides.api_key {
            http.api_key = Some(api_key).filter(|key| !key.is_empty());
        }

        let sink = &mut self.values.sink;
        if let Some(host) = overrides.sink_host {
            sink.host = Some(host).filter(|host| !host.is_empty());
        }

        if let Some(port) = overrides.sink_port {
            sink.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "sink_port"))?;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        Ok(self)
    }

    /// Returns the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the socket address of the UDP listener.
    pub fn udp_addr(&self) -> SocketAddr {
        (self.values.udp.host, self.values.udp.port).into()
    }

    /// Returns `true` if every raw datagram should be logged.
    pub fn dump_messages(&self) -> bool {
        self.values.udp.dump_messages
    }

    /// Returns the socket address of the HTTP query API.
    pub fn http_addr(&self) -> SocketAddr {
        (self.values.http.host, self.values.http.port).into()
    }

    /// Returns the key required by the HTTP query API.
    pub fn api_key(&self) -> Option<&str> {
        self.values.http.api_key.as_deref()
    }

    /// Returns the name of the header carrying the API key.
    pub fn api_key_header(&self) -> &str {
        &self.values.http.api_key_header
    }

    /// Returns host and port of the downstream sink, if configured.
    pub fn sink_addr(&self) -> Option<(&str, u16)> {
        let sink = &self.values.sink;
        sink.host.as_deref().map(|host| (host, sink.port))
    }

    /// Returns the configuration of the aggregator.
    pub fn collector(&self) -> &AggregatorServiceConfig {
        &self.values.collector
    }

    /// Returns the maximum time to wait for pending work on a graceful shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server for Tally's own metrics.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of Tally's own metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the tags added to all of Tally's own metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }
}

#[cfg(test)]
mod tests {
    use tally_log::Level;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("{}").unwrap();

        assert_eq!(config.udp_addr(), "0.0.0.0:8125".parse().unwrap());
        assert_eq!(config.http_addr(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.api_key(), None);
        assert_eq!(config.api_key_header(), "x-tally-statsapikey");
        assert_eq!(config.sink_addr(), None);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.metrics_prefix(), "tally");

        let collector = config.collector();
        assert_eq!(collector.flush_interval, 10_000);
        assert_eq!(collector.percent_threshold, vec![90.0]);
        assert_eq!(collector.history_len, 360);
        assert_eq!(collector.key_flush.interval(), None);
        assert_eq!(collector.snapshot.path, None);
    }

    #[test]
    fn test_sections() {
        let yaml = r###"
udp:
  port: 9125
  dump_messages: true
http:
  api_key: secret
sink:
  host: graphite.internal
collector:
  flush_interval: 5000
  percent_threshold: 95
  key_flush:
    interval: 60000
    percent: 10
    log: /var/log/tally-keys.log
logging:
  level: debug
"###;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.udp_addr().port(), 9125);
        assert!(config.dump_messages());
        assert_eq!(config.api_key(), Some("secret"));
        assert_eq!(config.sink_addr(), Some(("graphite.internal", 2003)));
        assert_eq!(config.logging().level, Level::Debug);

        let collector = config.collector();
        assert_eq!(collector.flush_interval, 5000);
        assert_eq!(collector.percent_threshold, vec![95.0]);
        assert_eq!(collector.key_flush.percent, 10.0);
        assert_eq!(
            collector.key_flush.interval(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_bad_yaml() {
        let error = Config::from_yaml("udp: [").unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.source().is_some());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                udp_port: Some("8126".to_owned()),
                api_key: Some("from-env".to_owned()),
                sink_host: Some("localhost".to_owned()),
                sink_port: Some("2004".to_owned()),
                log_level: Some("trace".to_owned()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.udp_addr().port(), 8126);
        assert_eq!(config.api_key(), Some("from-env"));
        assert_eq!(config.sink_addr(), Some(("localhost", 2004)));
        assert_eq!(config.logging().level, Level::Trace);
    }

    #[test]
    fn test_override_invalid_port() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                http_port: Some("http".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        insta::assert_snapshot!(error.to_string(), @"invalid config value (field http_port)");
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();

        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
        assert!(error.to_string().contains("config.yml"));

        fs::write(dir.path().join("config.yml"), "http:\n  api_key: abc\n").unwrap();

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.api_key(), Some("abc"));
        assert_eq!(config.path(), dir.path());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::from_yaml("collector:\n  percent_threshold: [50, 99.9]\n").unwrap();
        let yaml = config.to_yaml_string().unwrap();
        assert!(yaml.contains("flush_interval: 10000"));

        let reparsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(reparsed.collector().percent_threshold, vec![50.0, 99.9]);
        assert_eq!(reparsed.api_key_header(), "x-tally-statsapikey");
    }
}
