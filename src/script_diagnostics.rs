//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions. BlendQuery
//! wraps those into a stable, JSON-serializable diagnostic plus a formatted
//! trace. The trace lists evaluator frames first, then the frames inside the
//! user script; [`extract_script_trace`] cuts out the script-local part so the
//! user is not shown evaluator internals.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Marker used for frames that point into the user script.
pub const SCRIPT_MARKER: &str = "<script>";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script attempted to use the kernel API incorrectly (missing members, wrong types, etc).
    HostApiMisuse,
    /// The script hit an engine safety limit (operations, call depth).
    LimitExceeded,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    Evaluate,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number in the user script.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// One frame of a script trace.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TraceFrame {
    /// Script function the frame is inside, if not top level.
    pub function: Option<String>,
    pub location: Option<ScriptLocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Frames from the outermost call to the raise site.
    #[serde(default)]
    pub frames: Vec<TraceFrame>,
    /// Raw engine error string (useful for bug reports).
    #[serde(default)]
    pub raw: Option<String>,
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    // Rhai error strings are fairly stable; this provides a pragmatic
    // classification without depending on Rhai's internal enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("too many operations")
        || lower.contains("stack overflow")
        || lower.contains("too deeply nested")
        || lower.contains("exceeds maximum")
    {
        return ScriptDiagnosticKind::LimitExceeded;
    }

    if lower.contains("property not found")
        || lower.contains("variable not found")
        || lower.contains("function not found")
        || lower.contains("mismatched types")
        || lower.contains("expects")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    if line == 0 {
        return None;
    }
    Some(ScriptLocation {
        line,
        column: pos.position().unwrap_or(1).max(1) as u32,
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    let raw = err.to_string();
    let location = location_of(err.position());

    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        message: raw.clone(),
        frames: vec![TraceFrame {
            function: None,
            location: location.clone(),
        }],
        location,
        raw: Some(raw),
    }
}

pub fn from_eval_error(err: &rhai::EvalAltResult) -> ScriptDiagnostic {
    let raw = err.to_string();

    // Unwind nested function calls: each level records where the call was
    // made from, the innermost error records the raise site.
    let mut frames = Vec::new();
    let mut current = err;
    let mut function: Option<String> = None;
    while let rhai::EvalAltResult::ErrorInFunctionCall(name, _, inner, pos) = current {
        frames.push(TraceFrame {
            function: function.take(),
            location: location_of(*pos),
        });
        function = Some(name.clone());
        current = inner.as_ref();
    }
    let location = location_of(current.position());
    frames.push(TraceFrame {
        function,
        location: location.clone(),
    });

    let message = current.to_string();

    ScriptDiagnostic {
        kind: classify_message(&message),
        phase: ScriptPhase::Evaluate,
        message,
        location,
        frames,
        raw: Some(raw),
    }
}

/// Render a full trace: evaluator frames, then script frames with the
/// offending source lines, then the error itself.
pub fn format_trace(diagnostic: &ScriptDiagnostic, source: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::from("Script evaluation failed\n");
    out.push_str(&format!(
        "  in ScriptEvaluator::evaluate ({:?} phase)\n",
        diagnostic.phase
    ));

    for frame in &diagnostic.frames {
        let Some(location) = &frame.location else {
            continue;
        };
        out.push_str(&format!(
            "  at {}:{}:{}",
            SCRIPT_MARKER, location.line, location.column
        ));
        if let Some(function) = &frame.function {
            out.push_str(&format!(" in fn {}", function));
        }
        out.push('\n');
        if let Some(text) = lines.get(location.line as usize - 1) {
            out.push_str(&format!("      {}\n", text.trim()));
        }
    }

    out.push_str(&diagnostic.message);
    out
}

fn script_trace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Everything from the first script frame to the end of the trace.
        Regex::new(r"(?s)at <script>:.*").expect("static pattern")
    })
}

/// Cut the script-local part out of a formatted trace.
pub fn extract_script_trace(trace: &str) -> Option<String> {
    script_trace_pattern()
        .find(trace)
        .map(|m| m.as_str().to_string())
}
