//! Script logging module for Rhai scripts.
//!
//! Provides a `log` global object to Rhai scripts with `info`, `warn`, and
//! `error` methods. Messages are routed to the `log` facade under the
//! `blendquery::script` target. Each evaluation gets its own logger, so the
//! message cap applies per evaluation even when several run concurrently.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Log target for messages emitted by scripts.
pub const SCRIPT_LOG_TARGET: &str = "blendquery::script";

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Emit a log message at the given level.
pub fn emit_log(level: LogLevel, message: &str) {
    log::log!(target: SCRIPT_LOG_TARGET, level.as_log_level(), "{}", message);
}

/// Convert a Rhai Dynamic value to a string safely.
/// Never panics, handles all types gracefully.
pub fn stringify_dynamic(value: &rhai::Dynamic) -> String {
    // Try to get string directly first
    if let Ok(s) = value.clone().into_string() {
        return s;
    }

    // For arrays, stringify each element
    if value.is_array() {
        if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
            let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
            return parts.join(" ");
        }
    }

    // For maps, format as key-value pairs
    if value.is_map() {
        if let Some(map) = value.clone().try_cast::<rhai::Map>() {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
                .collect();
            return format!("{{{}}}", parts.join(", "));
        }
    }

    if let Ok(i) = value.as_int() {
        return i.to_string();
    }

    if let Ok(f) = value.as_float() {
        return format!("{}", f);
    }

    if let Ok(b) = value.as_bool() {
        return b.to_string();
    }

    if value.is_unit() {
        return "()".to_string();
    }

    // Kernel values and other custom types
    value.to_string()
}

/// Logger type that gets registered with Rhai.
///
/// Clones share the same counter, so the copy living in the script scope and
/// the one captured by the engine's print hooks draw from one budget.
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    limit: u32,
    count: Arc<AtomicU32>,
    warned: Arc<AtomicBool>,
}

impl ScriptLogger {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            count: Arc::new(AtomicU32::new(0)),
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if we can log another message in this evaluation.
    fn can_log(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::Relaxed);
        if count >= self.limit {
            // Only warn once about exceeding the limit
            if !self.warned.swap(true, Ordering::Relaxed) {
                emit_log(
                    LogLevel::Warn,
                    &format!(
                        "Script log limit exceeded ({} messages). Further logs dropped.",
                        self.limit
                    ),
                );
            }
            false
        } else {
            true
        }
    }

    /// Log a message, respecting the per-evaluation limit.
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.can_log() {
            emit_log(level, message);
        }
    }

    /// Number of messages the script attempted to log.
    pub fn attempted(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn info(&self, value: rhai::Dynamic) {
        self.log(LogLevel::Info, &stringify_dynamic(&value));
    }

    pub fn warn(&self, value: rhai::Dynamic) {
        self.log(LogLevel::Warn, &stringify_dynamic(&value));
    }

    pub fn error(&self, value: rhai::Dynamic) {
        self.log(LogLevel::Error, &stringify_dynamic(&value));
    }
}

/// Register the logger type and route `print`/`debug` through `logger`.
pub fn register_log_api(engine: &mut rhai::Engine, logger: &ScriptLogger) {
    engine.register_type_with_name::<ScriptLogger>("Log");
    engine
        .register_fn("info", |l: &mut ScriptLogger, value: rhai::Dynamic| l.info(value))
        .register_fn("warn", |l: &mut ScriptLogger, value: rhai::Dynamic| l.warn(value))
        .register_fn("error", |l: &mut ScriptLogger, value: rhai::Dynamic| l.error(value));

    let print_logger = logger.clone();
    engine.on_print(move |text| print_logger.log(LogLevel::Info, text));

    let debug_logger = logger.clone();
    engine.on_debug(move |text, _source, pos| {
        debug_logger.log(LogLevel::Debug, &format!("{} @ {}", text, pos));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_string() {
        let value = rhai::Dynamic::from("hello");
        assert_eq!(stringify_dynamic(&value), "hello");
    }

    #[test]
    fn test_stringify_int() {
        let value = rhai::Dynamic::from(42_i64);
        assert_eq!(stringify_dynamic(&value), "42");
    }

    #[test]
    fn test_stringify_float() {
        let value = rhai::Dynamic::from(3.25_f64);
        assert_eq!(stringify_dynamic(&value), "3.25");
    }

    #[test]
    fn test_stringify_bool() {
        let value = rhai::Dynamic::from(true);
        assert_eq!(stringify_dynamic(&value), "true");
    }

    #[test]
    fn test_stringify_array() {
        let mut arr = rhai::Array::new();
        arr.push(rhai::Dynamic::from("width"));
        arr.push(rhai::Dynamic::from(0.5_f64));
        let value = rhai::Dynamic::from(arr);
        assert_eq!(stringify_dynamic(&value), "width 0.5");
    }

    #[test]
    fn test_log_limit_is_per_logger() {
        let logger = ScriptLogger::new(3);
        for _ in 0..3 {
            assert!(logger.can_log());
        }
        assert!(!logger.can_log());

        // Clones share the budget
        assert!(!logger.clone().can_log());

        // A fresh evaluation gets a fresh budget
        assert!(ScriptLogger::new(3).can_log());
    }

    #[test]
    fn test_script_print_counts_against_limit() {
        let logger = ScriptLogger::new(10);
        let mut engine = rhai::Engine::new();
        register_log_api(&mut engine, &logger);

        let mut scope = rhai::Scope::new();
        scope.push("log", logger.clone());
        engine
            .run_with_scope(&mut scope, r#"print("a"); log.info(1); log.warn([1, 2]);"#)
            .unwrap();
        assert_eq!(logger.attempted(), 3);
    }
}
