//! Log capture for tests: a tracing layer that records events in memory,
//! plus assertion macros over what was captured.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

static LOG_STORAGE: OnceLock<Arc<Mutex<LogStorage>>> = OnceLock::new();

/// Ring buffer of captured entries.
#[derive(Default)]
pub struct LogStorage {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl LogStorage {
    #[must_use]
    pub const fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    #[must_use]
    pub const fn entries(&self) -> &VecDeque<LogEntry> {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn contains_message(&self, message: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(message))
    }

    #[must_use]
    pub fn contains_level(&self, level: Level) -> bool {
        self.entries.iter().any(|e| e.level == level)
    }

    /// Entries carrying `key = value` among their fields.
    #[must_use]
    pub fn with_field(&self, key: &str, value: &str) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.field(key) == Some(value))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub timestamp: Instant,
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: Level, target: &str, message: &str) -> Self {
        Self {
            level,
            target: target.to_string(),
            message: message.to_string(),
            timestamp: Instant::now(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let fields: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.as_str())))
            .collect();
        serde_json::json!({
            "level": self.level.to_string(),
            "target": self.target,
            "message": self.message,
            "fields": fields,
        })
    }
}

pub fn get_log_storage() -> Arc<Mutex<LogStorage>> {
    LOG_STORAGE
        .get_or_init(|| Arc::new(Mutex::new(LogStorage::new(1000))))
        .clone()
}

pub fn clear_logs() {
    get_log_storage().lock().clear();
}

#[must_use]
pub fn get_logs() -> Vec<LogEntry> {
    get_log_storage().lock().entries().iter().cloned().collect()
}

#[must_use]
pub fn logs_contain(message: &str) -> bool {
    get_log_storage().lock().contains_message(message)
}

#[must_use]
pub fn logs_have_errors() -> bool {
    get_log_storage().lock().contains_level(Level::ERROR)
}

/// Format logs for display on test failure.
#[must_use]
pub fn format_logs_for_display() -> String {
    let logs = get_logs();
    if logs.is_empty() {
        return String::from("No logs captured");
    }

    let mut output = String::new();
    let _ = writeln!(output, "Captured {} log entries:", logs.len());
    for entry in logs {
        let _ = writeln!(output, "[{}] {}: {}", entry.level, entry.target, entry.message);
        for (key, value) in &entry.fields {
            let _ = writeln!(output, "    {key} = {value}");
        }
    }
    output
}

/// Layer that copies every event into a [`LogStorage`].
pub struct TestLogLayer {
    storage: Arc<Mutex<LogStorage>>,
}

impl TestLogLayer {
    pub const fn new(storage: Arc<Mutex<LogStorage>>) -> Self {
        Self { storage }
    }
}

struct FieldVisitor<'a> {
    message: &'a mut String,
    fields: &'a mut Vec<(String, String)>,
}

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            *self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            *self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl<S> tracing_subscriber::Layer<S> for TestLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let mut message = String::new();
        let mut fields = Vec::new();
        event.record(&mut FieldVisitor {
            message: &mut message,
            fields: &mut fields,
        });

        let mut entry = LogEntry::new(*metadata.level(), metadata.target(), &message);
        entry.fields = fields;
        self.storage.lock().push(entry);
    }
}

/// Install the capture layer as the global subscriber and clear old logs.
///
/// The global subscriber can only be set once per process; later calls just
/// clear the buffer. Tests that assert on logs share one buffer, so they
/// should match on fields unique to their own fixture.
#[must_use]
pub fn init_test_logging(level: &str) -> TestLoggingGuard {
    let storage = get_log_storage();
    storage.lock().clear();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(TestLogLayer::new(storage));
    let _ = tracing::subscriber::set_global_default(subscriber);

    TestLoggingGuard {
        start_time: Instant::now(),
    }
}

/// Prints captured logs when dropped during a panic.
pub struct TestLoggingGuard {
    start_time: Instant,
}

impl Drop for TestLoggingGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            eprintln!("\nTEST FAILED after {:?}", self.start_time.elapsed());
            eprintln!("{}", format_logs_for_display());
        }
    }
}

/// Assert that a log entry with the specified level and message exists.
#[macro_export]
macro_rules! assert_log_contains {
    ($level:expr, $message:expr) => {{
        let logs = $crate::test_utils::logging::get_logs();
        let found = logs
            .iter()
            .any(|e| e.level == $level && e.message.contains($message));
        assert!(
            found,
            "Expected log with level {} containing '{}'\nCaptured logs:\n{}",
            $level,
            $message,
            $crate::test_utils::logging::format_logs_for_display()
        );
    }};
}

/// Assert that no error logs were recorded.
#[macro_export]
macro_rules! assert_no_errors {
    () => {{
        assert!(
            !$crate::test_utils::logging::logs_have_errors(),
            "Expected no errors but found some:\n{}",
            $crate::test_utils::logging::format_logs_for_display()
        );
    }};
}
