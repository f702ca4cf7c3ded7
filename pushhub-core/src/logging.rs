use std::str::FromStr;
use std::sync::Arc;

use tracing::{Level, Span};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with the enclosing span fields
    Json,
    /// Multi-line human readable output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(anyhow::anyhow!("Invalid log format: {s}")),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` wins over the configured level. Events recorded inside
/// [`node_span`] carry the node name, and hub tasks add their instance id.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;
    let format: LogFormat = config.format.parse()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string().to_lowercase()));

    tracing_subscriber::registry()
        .with(output_layer(format, make_writer(config.file_path.as_deref())?))
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Root span of a node process
pub fn node_span(node: &str) -> Span {
    tracing::info_span!("pushhub", node = %node)
}

fn output_layer(
    format: LogFormat,
    writer: BoxMakeWriter,
) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_line_number(true)
            .with_file(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Standard output, or `path` opened for appending
fn make_writer(path: Option<&str>) -> anyhow::Result<BoxMakeWriter> {
    Ok(match path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    })
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_rejects_invalid_settings() {
        let bad_level = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&bad_level).is_err());

        let bad_format = LoggingConfig {
            format: "xml".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&bad_format).is_err());
    }

    #[test]
    fn test_file_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pushhub.log");
        std::fs::write(&path, "first\n").unwrap();

        let writer = make_writer(path.to_str()).unwrap();
        writer.make_writer().write_all(b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_node_span_records_into_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.log");
        let writer = make_writer(path.to_str()).unwrap();
        let subscriber = tracing_subscriber::registry().with(output_layer(LogFormat::Json, writer));

        tracing::subscriber::with_default(subscriber, || {
            let _node = node_span("edge-1").entered();
            tracing::info!(connection_id = "3_abc", "Connection registered");
        });

        let line = std::fs::read_to_string(&path).unwrap();
        let event: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(event["fields"]["message"], "Connection registered");
        assert_eq!(event["span"]["node"], "edge-1");
        assert_eq!(event["spans"][0]["name"], "pushhub");
    }
}
