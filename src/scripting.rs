//! Rhai scripting integration for BlendQuery.
//!
//! A script is plain Rhai. Its top-level `let`/`const` declarations become the
//! result bindings; anything built with the kernel API is rendered, and any
//! primitive is surfaced as an overridable attribute.
//!
//! Available API:
//! - `kernel` / `cq` - the geometry kernel (see `kernel_rhai`)
//! - `log.info(value)`, `log.warn(value)`, `log.error(value)` - script logging
//! - `print(value)`, `debug(value)` - routed to the same logger
//!
//! Names starting with `_` are private to the script and never surfaced.
//!
//! Each call to [`ScriptEvaluator::evaluate`] builds a fresh engine and scope,
//! so evaluations share no state and can run on any thread.

use regex::{NoExpand, Regex};
use rhai::{Dynamic, Engine, Scope};

use crate::attributes::AttributeRecord;
use crate::config::PipelineConfig;
use crate::error::Failure;
use crate::kernel::ParametricObject;
use crate::kernel_rhai::{parametric_object, register_kernel_api, Kernel, KERNEL_ALIASES};
use crate::script_diagnostics::{
    extract_script_trace, format_trace, from_eval_error, from_parse_error, ScriptDiagnostic,
};
use crate::script_log::{register_log_api, ScriptLogger};

/// An evaluated top-level value, detached from the script engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Unit,
    Object(ParametricObject),
    /// Anything else (arrays, maps, kernel values with no geometry, ...).
    Other { type_name: String },
}

impl Value {
    pub fn type_name(&self) -> &str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "i64",
            Value::Float(_) => "f64",
            Value::Str(_) => "string",
            Value::Unit => "()",
            Value::Object(obj) => obj.type_name(),
            Value::Other { type_name } => type_name,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
        )
    }

    fn from_dynamic(engine: &Engine, value: &Dynamic) -> Self {
        if value.is_unit() {
            return Value::Unit;
        }
        if let Ok(b) = value.as_bool() {
            return Value::Bool(b);
        }
        if let Ok(i) = value.as_int() {
            return Value::Int(i);
        }
        if let Ok(f) = value.as_float() {
            return Value::Float(f);
        }
        if value.is_string() {
            if let Ok(s) = value.clone().into_string() {
                return Value::Str(s);
            }
        }
        if let Some(obj) = parametric_object(value) {
            return Value::Object(obj);
        }
        Value::Other {
            type_name: engine.map_type_name(value.type_name()).to_string(),
        }
    }
}

/// Top-level names produced by a script, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameBindings {
    entries: Vec<(String, Value)>,
}

impl NameBindings {
    /// Add a binding. A re-declared name replaces the earlier value in place.
    pub fn insert(&mut self, name: String, value: Value) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether a name is private to the script.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('_')
}

/// Rewrite `key = "..."` assignments for every defined override.
///
/// This is a textual, best-effort substitution: only assignments of a quoted
/// literal are matched, whatever the record's kind. A numeric or boolean
/// attribute is only overridden where the script assigns it a quoted literal.
pub fn apply_overrides(source: &str, overrides: &[AttributeRecord]) -> String {
    let mut text = source.to_string();

    for record in overrides.iter().filter(|r| r.defined) {
        let pattern = format!(
            r#"\b{}\s*=\s*"((?:[^"\\]|\\.)*)""#,
            regex::escape(&record.key)
        );
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                log::warn!("Skipping override for '{}': {}", record.key, e);
                continue;
            }
        };
        if !re.is_match(&text) {
            log::warn!(
                "Override for '{}' not applied: the script does not assign it a quoted literal",
                record.key
            );
            continue;
        }
        let replacement = format!("{} = {}", record.key, record.value.to_literal());
        text = re.replace_all(&text, NoExpand(&replacement)).into_owned();
    }

    text
}

/// Runs parametric scripts and collects their top-level bindings.
#[derive(Debug, Clone)]
pub struct ScriptEvaluator {
    max_operations: u64,
    max_script_logs: u32,
}

impl ScriptEvaluator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_operations: config.max_operations,
            max_script_logs: config.max_script_logs,
        }
    }

    /// Create an engine with the kernel and logging registered.
    fn create_engine(&self, logger: &ScriptLogger) -> Engine {
        let mut engine = Engine::new();

        // Limits stop runaway loops; they are not a sandbox.
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        engine.set_max_operations(self.max_operations);

        register_log_api(&mut engine, logger);
        register_kernel_api(&mut engine);

        engine
    }

    /// Evaluate `source` with `overrides` applied.
    pub fn evaluate(
        &self,
        source: &str,
        overrides: &[AttributeRecord],
    ) -> Result<NameBindings, Failure> {
        let source = apply_overrides(source, overrides);

        let logger = ScriptLogger::new(self.max_script_logs);
        let engine = self.create_engine(&logger);

        let mut scope = Scope::new();
        for alias in KERNEL_ALIASES {
            scope.push(*alias, Kernel);
        }
        scope.push("log", logger);
        let preset = scope.len();

        let ast = engine
            .compile(&source)
            .map_err(|e| parse_failure(from_parse_error(&e), &source))?;

        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| parse_failure(from_eval_error(&e), &source))?;

        let mut bindings = NameBindings::default();
        for (name, _constant, value) in scope.iter().skip(preset) {
            if is_hidden(name) {
                continue;
            }
            bindings.insert(name.to_string(), Value::from_dynamic(&engine, &value));
        }

        log::debug!(
            "Script evaluated: {} bindings ({})",
            bindings.len(),
            bindings.names().collect::<Vec<_>>().join(", ")
        );

        Ok(bindings)
    }
}

fn parse_failure(diagnostic: ScriptDiagnostic, source: &str) -> Failure {
    let trace = format_trace(&diagnostic, source);
    let script_trace = extract_script_trace(&trace);
    Failure::Parse {
        diagnostic,
        trace,
        script_trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeValue;
    use crate::script_diagnostics::ScriptDiagnosticKind;

    fn evaluator() -> ScriptEvaluator {
        ScriptEvaluator::new(&PipelineConfig::default())
    }

    #[test]
    fn test_box_binding() {
        let bindings = evaluator()
            .evaluate("let result = kernel.box(1, 1, 1);", &[])
            .unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(matches!(
            bindings.get("result"),
            Some(Value::Object(ParametricObject::Shape(_)))
        ));
    }

    #[test]
    fn test_cq_alias() {
        let bindings = evaluator()
            .evaluate("let part = cq.workplane().box(1, 2, 3);", &[])
            .unwrap();
        assert_eq!(bindings.get("part").unwrap().type_name(), "Workplane");
    }

    #[test]
    fn test_hidden_and_preset_names_are_excluded() {
        let bindings = evaluator()
            .evaluate("let _tmp = 1; let shown = 2;", &[])
            .unwrap();
        assert_eq!(bindings.names().collect::<Vec<_>>(), vec!["shown"]);
        assert!(bindings.get("kernel").is_none());
        assert!(bindings.get("log").is_none());
    }

    #[test]
    fn test_redeclaration_replaces_in_place() {
        let bindings = evaluator()
            .evaluate("let a = 1; let b = 2; let a = \"x\";", &[])
            .unwrap();
        assert_eq!(bindings.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(bindings.get("a"), Some(&Value::Str("x".into())));
    }

    #[test]
    fn test_value_kinds() {
        let bindings = evaluator()
            .evaluate(
                "let b = true; let i = 3; let f = 1.5; let s = \"s\"; let u = (); let v = kernel.vec(1, 2, 3); let arr = [1];",
                &[],
            )
            .unwrap();
        assert_eq!(bindings.get("b"), Some(&Value::Bool(true)));
        assert_eq!(bindings.get("i"), Some(&Value::Int(3)));
        assert_eq!(bindings.get("f"), Some(&Value::Float(1.5)));
        assert_eq!(bindings.get("s"), Some(&Value::Str("s".into())));
        assert_eq!(bindings.get("u"), Some(&Value::Unit));
        assert_eq!(bindings.get("v").unwrap().type_name(), "Vector");
        assert!(matches!(bindings.get("arr"), Some(Value::Other { .. })));
    }

    #[test]
    fn test_compile_error_is_parse_failure() {
        let failure = evaluator().evaluate("let x = ;", &[]).unwrap_err();
        match failure {
            Failure::Parse { diagnostic, .. } => {
                assert_eq!(diagnostic.kind, ScriptDiagnosticKind::ParseError)
            }
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_error_trace_contains_offending_line() {
        let source = "let a = kernel.box(1, 1, 1);\nlet b = kernel.box(1, -1, 1);\nlet c = 3;";
        let failure = evaluator().evaluate(source, &[]).unwrap_err();
        assert!(failure.is_parse());

        let text = failure.user_text();
        assert!(text.starts_with("at <script>:2"));
        assert!(text.contains("let b = kernel.box(1, -1, 1);"));
        assert!(!text.contains("ScriptEvaluator"));
    }

    #[test]
    fn test_runaway_loop_is_stopped() {
        let config = PipelineConfig {
            max_operations: 10_000,
            ..Default::default()
        };
        let failure = ScriptEvaluator::new(&config)
            .evaluate("let i = 0; loop { i += 1; }", &[])
            .unwrap_err();
        match failure {
            Failure::Parse { diagnostic, .. } => {
                assert_eq!(diagnostic.kind, ScriptDiagnosticKind::LimitExceeded)
            }
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_string_override_is_substituted() {
        let mut record = AttributeRecord::new("width", AttributeValue::Str("10".into()));
        record.value = AttributeValue::Str("25".into());

        let bindings = evaluator()
            .evaluate("let width = \"10\";", &[record])
            .unwrap();
        assert_eq!(bindings.get("width"), Some(&Value::Str("25".into())));
    }

    #[test]
    fn test_undefined_override_is_not_applied() {
        let mut record = AttributeRecord::new("width", AttributeValue::Str("25".into()));
        record.defined = false;
        assert_eq!(apply_overrides("let width = \"10\";", &[record]), "let width = \"10\";");
    }

    #[test]
    fn test_numeric_override_only_matches_quoted_literal() {
        let record = AttributeRecord::new("count", AttributeValue::Int(5));

        // Unquoted literal: untouched
        assert_eq!(apply_overrides("let count = 3;", &[record.clone()]), "let count = 3;");

        // Quoted literal: replaced with the typed literal
        assert_eq!(apply_overrides("let count = \"3\";", &[record]), "let count = 5;");
    }

    #[test]
    fn test_unquoted_assignment_keeps_script_value() {
        let record = AttributeRecord::new("count", AttributeValue::Int(5));
        let bindings = evaluator()
            .evaluate("let count = 3;", &[record])
            .unwrap();
        assert_eq!(bindings.get("count"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_override_replaces_literal_with_escaped_quote() {
        let record = AttributeRecord::new("label", AttributeValue::Str("x".into()));
        let source = r#"let label = "say \"hi\""; let other = "y";"#;
        assert_eq!(
            apply_overrides(source, &[record.clone()]),
            r#"let label = "x"; let other = "y";"#
        );

        let bindings = evaluator().evaluate(source, &[record]).unwrap();
        assert_eq!(bindings.get("label"), Some(&Value::Str("x".into())));
        assert_eq!(bindings.get("other"), Some(&Value::Str("y".into())));
    }

    #[test]
    fn test_override_respects_word_boundary() {
        let record = AttributeRecord::new("width", AttributeValue::Str("7".into()));
        let source = "let inner_width = \"1\";\nlet width = \"2\";";
        assert_eq!(
            apply_overrides(source, &[record]),
            "let inner_width = \"1\";\nlet width = \"7\";"
        );
    }

    #[test]
    fn test_override_value_with_dollar_is_literal() {
        let record = AttributeRecord::new("label", AttributeValue::Str("$1 off".into()));
        assert_eq!(
            apply_overrides("let label = \"x\";", &[record]),
            "let label = \"$1 off\";"
        );
    }
}
