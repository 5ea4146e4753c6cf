use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::config::LoggingConfig;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl LogLevel {
    pub const ALLOWED_VALUES: &'static str = "error, warn, info, debug, verbose";

    pub fn from_config_value(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "verbose" | "trace" => Some(Self::Verbose),
            _ => None,
        }
    }

    fn label(self, colored: bool) -> &'static str {
        match (self, colored) {
            (Self::Error, false) => "ERROR",
            (Self::Warn, false) => "WARN",
            (Self::Info, false) => "INFO",
            (Self::Debug, false) => "DEBUG",
            (Self::Verbose, false) => "VERBOSE",
            (Self::Error, true) => "\x1b[31mERROR\x1b[0m",
            (Self::Warn, true) => "\x1b[33mWARN\x1b[0m",
            (Self::Info, true) => "\x1b[32mINFO\x1b[0m",
            (Self::Debug, true) => "\x1b[36mDEBUG\x1b[0m",
            (Self::Verbose, true) => "\x1b[35mVERBOSE\x1b[0m",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub human_friendly: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            human_friendly: false,
        }
    }
}

impl LoggerConfig {
    /// Returns `None` when `logging.level` is not one of [`LogLevel::ALLOWED_VALUES`].
    pub fn from_app_config(config: &LoggingConfig) -> Option<Self> {
        Some(Self {
            min_level: LogLevel::from_config_value(&config.level)?,
            human_friendly: config.human_friendly,
        })
    }
}

pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

#[derive(Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }
}

/// Thread-safe levelled logger; pools share one instance behind an `Arc`.
pub struct Logger {
    config: LoggerConfig,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    pub fn error(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Error, context, message, None);
    }

    pub fn warn(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Warn, context, message, None);
    }

    pub fn info(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Info, context, message, None);
    }

    pub fn debug(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Debug, context, message, None);
    }

    pub fn verbose(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Verbose, context, message, None);
    }

    pub fn log(&self, level: LogLevel, context: Option<&str>, message: &str, payload: Option<Value>) {
        if !self.enabled(level) {
            return;
        }

        self.sink
            .write_line(&self.render(level, context, message, payload.as_ref()));
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.config.min_level
    }

    fn render(
        &self,
        level: LogLevel,
        context: Option<&str>,
        message: &str,
        payload: Option<&Value>,
    ) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let level = level.label(self.config.human_friendly);
        let mut line = format!("{timestamp} [{level}]");

        if let Some(ctx) = context.filter(|ctx| !ctx.is_empty()) {
            line.push_str(&format!(" [{ctx}]"));
        }
        line.push(' ');
        line.push_str(message);
        if let Some(payload) = payload {
            line.push_str(&format!(" payload={payload}"));
        }
        line
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("config", &self.config)
            .field("sink", &"<dyn LogSink>")
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::{LogLevel, LogSink, Logger, LoggerConfig};

    /// Captures rendered lines so tests can assert on log output.
    #[derive(Default)]
    pub(crate) struct MemorySink {
        lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().expect("memory sink mutex poisoned").clone()
        }
    }

    impl LogSink for MemorySink {
        fn write_line(&self, line: &str) {
            self.lines
                .lock()
                .expect("memory sink mutex poisoned")
                .push(line.to_owned());
        }
    }

    pub(crate) fn capturing_logger(min_level: LogLevel) -> (Arc<Logger>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::with_sink(
            LoggerConfig {
                min_level,
                human_friendly: false,
            },
            sink.clone(),
        );
        (Arc::new(logger), sink)
    }

    pub(crate) fn quiet_logger() -> Arc<Logger> {
        capturing_logger(LogLevel::Error).0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::LoggingConfig;

    use super::testing::capturing_logger;
    use super::{LogLevel, LoggerConfig};

    #[test]
    fn parses_config_levels_case_insensitively() {
        assert_eq!(LogLevel::from_config_value("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_config_value(" warn "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_config_value("trace"), Some(LogLevel::Verbose));
        assert_eq!(LogLevel::from_config_value("loud"), None);
    }

    #[test]
    fn logger_config_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "chatty".to_owned(),
            human_friendly: true,
        };
        assert!(LoggerConfig::from_app_config(&config).is_none());

        let config = LoggingConfig {
            level: "verbose".to_owned(),
            human_friendly: true,
        };
        let parsed = LoggerConfig::from_app_config(&config).expect("verbose is a valid level");
        assert_eq!(parsed.min_level, LogLevel::Verbose);
        assert!(parsed.human_friendly);
    }

    #[test]
    fn info_threshold_drops_debug_lines() {
        let (logger, sink) = capturing_logger(LogLevel::Info);

        logger.info(Some("tests::logger"), "worker pool started");
        logger.debug(Some("tests::logger"), "task popped");

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[INFO]"));
        assert!(lines[0].ends_with("worker pool started"));
    }

    #[test]
    fn payload_and_context_are_rendered() {
        let (logger, sink) = capturing_logger(LogLevel::Debug);

        logger.log(
            LogLevel::Warn,
            Some("pools::worker"),
            "reply dropped",
            Some(json!({"connection_id": 7})),
        );

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("20"));
        assert!(lines[0].contains("[WARN] [pools::worker] reply dropped"));
        assert!(lines[0].contains("payload={\"connection_id\":7}"));
    }

    #[test]
    fn empty_context_is_omitted() {
        let (logger, sink) = capturing_logger(LogLevel::Error);
        logger.error(Some(""), "bind failed");

        let lines = sink.lines();
        assert!(lines[0].contains("[ERROR] bind failed"));
    }
}
