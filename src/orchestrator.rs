//! Regeneration orchestrator.
//!
//! Owns every root's binding and drives its regeneration state machine:
//!
//! ```text
//! Idle -> Evaluating -> Building -> Idle
//!                    \-> Failed
//! ```
//!
//! Triggers come from the initial load, from debounced text changes and from
//! direct user requests. Evaluation and lowering run as a job, on a worker
//! thread when `offload` is set. The result is handed back over a channel and
//! applied to the scene by [`Orchestrator::tick`] on the host thread.
//!
//! At most one job runs per root. A trigger that arrives while a job is in
//! flight marks the root pending; once the result has been applied exactly
//! one follow-up job starts, reading the latest script text.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::attributes::{reconcile, AttributeRecord};
use crate::binding::{PersistedBinding, ScriptBinding};
use crate::change_detector::{Debouncer, TextWatcher, WatchHandle};
use crate::config::PipelineConfig;
use crate::error::{BindingError, Failure};
use crate::geometry::{instantiate, lower, teardown, ParametricNode};
use crate::report::{script_digest, BuildReport, Reporter, INSTALL_FAILED, REGENERATE_FAILED};
use crate::scene_graph::{HostScene, ObjectId};
use crate::scripting::{NameBindings, ScriptEvaluator};
use crate::text_source::{SourceId, TextLibrary};

/// Hook that makes the geometry kernel available.
pub trait KernelImport {
    fn import(&mut self) -> Result<(), String>;
}

/// The kernel compiled into this crate; importing it cannot fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinKernel;

impl KernelImport for BuiltinKernel {
    fn import(&mut self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationState {
    Idle,
    Evaluating,
    Building,
    /// The last regeneration failed; prior objects were left standing.
    Failed,
}

/// Regeneration progress across all roots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub in_flight: usize,
    pub fraction: f64,
}

/// Everything a job needs, detached from host state.
struct JobInput {
    source: String,
    overrides: Vec<AttributeRecord>,
    evaluator: ScriptEvaluator,
    tolerance: f64,
    angular_tolerance: f64,
}

/// A successful evaluation and the lowering of its bindings.
struct Evaluated {
    bindings: NameBindings,
    lowered: Result<Vec<ParametricNode>, Failure>,
}

struct JobOutput {
    digest: String,
    started_at: DateTime<Utc>,
    started: Instant,
    result: Result<Evaluated, Failure>,
}

fn run_job(input: JobInput) -> JobOutput {
    let started = Instant::now();
    let started_at = Utc::now();
    let digest = script_digest(&input.source);

    let result = input
        .evaluator
        .evaluate(&input.source, &input.overrides)
        .map(|bindings| {
            let lowered = lower(&bindings, input.tolerance, input.angular_tolerance);
            Evaluated { bindings, lowered }
        });

    JobOutput {
        digest,
        started_at,
        started,
        result,
    }
}

/// Per-root runtime state that is not persisted.
struct RootState {
    state: RegenerationState,
    job: Option<Receiver<JobOutput>>,
    pending: bool,
    debouncer: Debouncer,
    watch: Option<WatchHandle>,
    last_report: Option<BuildReport>,
}

impl RootState {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            state: RegenerationState::Idle,
            job: None,
            pending: false,
            debouncer: Debouncer::new(config.debounce()),
            watch: None,
            last_report: None,
        }
    }

    fn dispose_watch(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.dispose();
        }
        self.debouncer.cancel();
    }
}

/// Drives regeneration for every bound root.
pub struct Orchestrator {
    config: PipelineConfig,
    evaluator: ScriptEvaluator,
    texts: TextLibrary,
    bindings: BTreeMap<ObjectId, ScriptBinding>,
    roots: BTreeMap<ObjectId, RootState>,
    watcher: TextWatcher,
    /// Roots whose text changed, filled by watch callbacks.
    changed: Rc<RefCell<Vec<ObjectId>>>,
    reporter: Box<dyn Reporter>,
    enabled: bool,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, texts: TextLibrary, reporter: Box<dyn Reporter>) -> Self {
        Self {
            evaluator: ScriptEvaluator::new(&config),
            config,
            texts,
            bindings: BTreeMap::new(),
            roots: BTreeMap::new(),
            watcher: TextWatcher::new(),
            changed: Rc::new(RefCell::new(Vec::new())),
            reporter,
            enabled: false,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn texts(&self) -> &TextLibrary {
        &self.texts
    }

    pub fn texts_mut(&mut self) -> &mut TextLibrary {
        &mut self.texts
    }

    /// Whether the kernel was imported and the pipeline is running.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Import the kernel, then regenerate every bound root present in the
    /// scene. Returns false (and reports) if the kernel is unavailable.
    pub fn initialise<S: HostScene + ?Sized>(
        &mut self,
        scene: &S,
        kernel: &mut dyn KernelImport,
    ) -> bool {
        if let Err(reason) = kernel.import() {
            let failure = Failure::Install(reason);
            self.enabled = false;
            self.reporter
                .warn(&format!("{}: {}", INSTALL_FAILED, failure.user_text()));
            self.reporter.request_redraw();
            return false;
        }
        self.enabled = true;

        let roots: Vec<ObjectId> = self.bindings.keys().copied().collect();
        log::info!("Initialising {} bound roots", roots.len());
        for root in roots {
            if !scene.contains(root) {
                continue;
            }
            self.sync_watch(root);
            self.regenerate(root);
        }
        true
    }

    /// Attach `source` to `root` and regenerate it.
    pub fn bind<S: HostScene + ?Sized>(
        &mut self,
        root: ObjectId,
        source: SourceId,
        scene: &mut S,
    ) -> Result<(), BindingError> {
        if !scene.contains(root) {
            return Err(BindingError::UnknownRoot(root));
        }
        self.set_script(root, Some(source), scene)
    }

    /// Change (or clear) a root's script. Clearing detaches the root.
    pub fn set_script<S: HostScene + ?Sized>(
        &mut self,
        root: ObjectId,
        script: Option<SourceId>,
        scene: &mut S,
    ) -> Result<(), BindingError> {
        let Some(source) = script else {
            self.remove_root(root, scene);
            return Ok(());
        };
        if !self.texts.contains(source) {
            return Err(BindingError::UnknownScript(source));
        }

        self.bindings
            .entry(root)
            .or_insert_with(|| ScriptBinding::new(None))
            .script = Some(source);
        self.roots
            .entry(root)
            .or_insert_with(|| RootState::new(&self.config))
            .dispose_watch();

        log::info!("Bound {:?} to text {:?}", root, source);
        self.sync_watch(root);
        self.regenerate(root);
        Ok(())
    }

    /// Turn live regeneration on or off. Turning it off keeps the generated
    /// objects; turning it on regenerates immediately.
    pub fn set_auto_regenerate(
        &mut self,
        root: ObjectId,
        enabled: bool,
    ) -> Result<(), BindingError> {
        let binding = self
            .bindings
            .get_mut(&root)
            .ok_or(BindingError::NotBound(root))?;
        binding.auto_regenerate = enabled;

        if let Some(state) = self.roots.get_mut(&root) {
            state.dispose_watch();
        }
        if enabled {
            self.sync_watch(root);
            self.regenerate(root);
        }
        Ok(())
    }

    /// Start watching a root's text if it is set to auto-regenerate.
    fn sync_watch(&mut self, root: ObjectId) {
        let Some(binding) = self.bindings.get(&root) else {
            return;
        };
        let state = self
            .roots
            .entry(root)
            .or_insert_with(|| RootState::new(&self.config));

        if !binding.auto_regenerate || state.watch.is_some() {
            return;
        }
        let Some(text) = binding.script.and_then(|id| self.texts.get(id)) else {
            return;
        };

        let queue = self.changed.clone();
        state.watch = Some(self.watcher.watch(
            text,
            self.config.poll_interval(),
            move || queue.borrow_mut().push(root),
        ));
    }

    /// Request a regeneration of `root`. Returns whether a job was started;
    /// a request during an in-flight job marks the root pending instead.
    pub fn regenerate(&mut self, root: ObjectId) -> bool {
        if !self.enabled {
            log::debug!("Ignoring regeneration of {:?}: pipeline disabled", root);
            return false;
        }
        if !self.bindings.contains_key(&root) {
            return false;
        }

        let state = self
            .roots
            .entry(root)
            .or_insert_with(|| RootState::new(&self.config));
        if state.job.is_some() {
            log::debug!("Regeneration of {:?} already in flight; queued", root);
            state.pending = true;
            return false;
        }

        self.dispatch(root)
    }

    fn dispatch(&mut self, root: ObjectId) -> bool {
        let Some(binding) = self.bindings.get(&root) else {
            return false;
        };
        let Some(text) = binding.script.and_then(|id| self.texts.get(id)) else {
            log::warn!("Text for {:?} is no longer available", root);
            return false;
        };

        let input = JobInput {
            source: text.borrow().content().to_string(),
            overrides: binding.attributes.clone(),
            evaluator: self.evaluator.clone(),
            tolerance: self.config.tolerance,
            angular_tolerance: self.config.angular_tolerance,
        };

        let (tx, rx) = mpsc::channel();
        if self.config.offload {
            std::thread::spawn(move || {
                // The receiver is gone if the root was detached meanwhile.
                let _ = tx.send(run_job(input));
            });
        } else {
            let _ = tx.send(run_job(input));
        }

        if let Some(state) = self.roots.get_mut(&root) {
            state.job = Some(rx);
            state.state = RegenerationState::Evaluating;
        }
        log::info!("Regenerating {:?}", root);
        true
    }

    /// Advance the pipeline. Called from the host's timer on the host thread.
    pub fn tick<S: HostScene + ?Sized>(&mut self, scene: &mut S, now: Instant) {
        if !self.enabled {
            return;
        }

        // Roots deleted by the user are detached.
        let vanished: Vec<ObjectId> = self
            .bindings
            .keys()
            .copied()
            .filter(|root| !scene.contains(*root))
            .collect();
        for root in vanished {
            log::info!("Root {:?} left the scene; detaching", root);
            self.remove_root(root, scene);
        }

        self.watcher.poll(now);

        let changed: Vec<ObjectId> = self.changed.borrow_mut().drain(..).collect();
        for root in changed {
            if let Some(state) = self.roots.get_mut(&root) {
                state.debouncer.call(now);
            }
        }

        let due: Vec<ObjectId> = self
            .roots
            .iter_mut()
            .filter_map(|(root, state)| state.debouncer.poll(now).then_some(*root))
            .collect();
        for root in due {
            self.regenerate(root);
        }

        let roots: Vec<ObjectId> = self.roots.keys().copied().collect();
        for root in roots {
            self.poll_job(root, scene);
        }
    }

    fn poll_job<S: HostScene + ?Sized>(&mut self, root: ObjectId, scene: &mut S) {
        let Some(state) = self.roots.get_mut(&root) else {
            return;
        };
        let Some(rx) = &state.job else {
            return;
        };

        let output = match rx.try_recv() {
            Ok(output) => output,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                state.job = None;
                state.state = RegenerationState::Failed;
                self.report(&Failure::build(
                    format!("{:?}", root),
                    "worker exited without a result",
                ));
                self.start_pending(root);
                return;
            }
        };
        state.job = None;
        state.state = RegenerationState::Building;

        self.apply(root, output, scene);
        self.start_pending(root);
    }

    fn start_pending(&mut self, root: ObjectId) {
        let Some(state) = self.roots.get_mut(&root) else {
            return;
        };
        if std::mem::take(&mut state.pending) {
            self.dispatch(root);
        }
    }

    fn apply<S: HostScene + ?Sized>(&mut self, root: ObjectId, output: JobOutput, scene: &mut S) {
        let Some(binding) = self.bindings.get_mut(&root) else {
            return;
        };

        let failure = match output.result {
            Ok(evaluated) => {
                reconcile(&evaluated.bindings, &mut binding.attributes);
                match evaluated.lowered {
                    Ok(nodes) => {
                        let (refs, failure) =
                            instantiate(scene, root, &nodes, &mut binding.generated);
                        binding.generated = refs;
                        failure
                    }
                    Err(failure) => Some(failure),
                }
            }
            Err(failure) => Some(failure),
        };

        let object_count = binding.generated.len();
        let report = BuildReport::new(
            output.digest,
            output.started_at,
            output.started.elapsed(),
            object_count,
            failure.as_ref().map(Failure::user_text),
        );

        match &failure {
            None => log::info!(
                "Regenerated {:?}: {} objects in {}ms",
                root,
                object_count,
                report.duration_ms
            ),
            Some(failure) => self.report(failure),
        }

        if let Some(state) = self.roots.get_mut(&root) {
            state.state = if failure.is_some() {
                RegenerationState::Failed
            } else {
                RegenerationState::Idle
            };
            state.last_report = Some(report);
        }
    }

    fn report(&mut self, failure: &Failure) {
        self.reporter
            .warn(&format!("{}: {}", REGENERATE_FAILED, failure.user_text()));
        self.reporter.request_redraw();
    }

    /// Detach a root: stop its watch and destroy its generated objects.
    pub fn remove_root<S: HostScene + ?Sized>(&mut self, root: ObjectId, scene: &mut S) {
        if let Some(mut state) = self.roots.remove(&root) {
            state.dispose_watch();
        }
        if let Some(mut binding) = self.bindings.remove(&root) {
            teardown(scene, &mut binding.generated);
            log::info!("Detached {:?}", root);
        }
        self.changed.borrow_mut().retain(|r| *r != root);
    }

    pub fn state(&self, root: ObjectId) -> Option<RegenerationState> {
        if !self.bindings.contains_key(&root) {
            return None;
        }
        Some(
            self.roots
                .get(&root)
                .map_or(RegenerationState::Idle, |s| s.state),
        )
    }

    pub fn is_pending(&self, root: ObjectId) -> bool {
        self.roots.get(&root).is_some_and(|s| s.pending)
    }

    pub fn binding(&self, root: ObjectId) -> Option<&ScriptBinding> {
        self.bindings.get(&root)
    }

    /// Attribute records for user edits. Edits apply on the next regeneration.
    pub fn attributes_mut(&mut self, root: ObjectId) -> Option<&mut Vec<AttributeRecord>> {
        self.bindings.get_mut(&root).map(|b| &mut b.attributes)
    }

    /// Forget every attribute record of a root.
    pub fn reset_attributes(&mut self, root: ObjectId) {
        if let Some(binding) = self.bindings.get_mut(&root) {
            binding.attributes.clear();
        }
    }

    pub fn last_report(&self, root: ObjectId) -> Option<&BuildReport> {
        self.roots.get(&root).and_then(|s| s.last_report.as_ref())
    }

    pub fn progress(&self) -> Progress {
        let in_flight = self.roots.values().filter(|s| s.job.is_some()).count();
        Progress {
            in_flight,
            fraction: 1.0 / (in_flight as f64 + 1.0),
        }
    }

    pub fn is_regenerating(&self) -> bool {
        self.progress().in_flight > 0
    }

    /// Bindings in document form.
    pub fn bindings(&self) -> Vec<PersistedBinding> {
        self.bindings
            .iter()
            .map(|(root, binding)| PersistedBinding {
                root: *root,
                binding: binding.clone(),
            })
            .collect()
    }

    /// Replace all bindings with ones loaded from a document. Call
    /// [`Orchestrator::initialise`] afterwards to regenerate them.
    pub fn load_bindings(&mut self, stored: Vec<PersistedBinding>) {
        for state in self.roots.values_mut() {
            state.dispose_watch();
        }
        self.roots.clear();
        self.changed.borrow_mut().clear();
        self.bindings = stored.into_iter().map(|p| (p.root, p.binding)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene_graph::SceneGraph;
    use crate::text_source::TextBuffer;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Recorder {
        warnings: Rc<RefCell<Vec<String>>>,
        redraws: Rc<RefCell<usize>>,
    }

    impl Reporter for Recorder {
        fn warn(&mut self, message: &str) {
            self.warnings.borrow_mut().push(message.to_string());
        }

        fn request_redraw(&mut self) {
            *self.redraws.borrow_mut() += 1;
        }
    }

    struct Broken;

    impl KernelImport for Broken {
        fn import(&mut self) -> Result<(), String> {
            Err("kernel missing".to_string())
        }
    }

    fn inline_config() -> PipelineConfig {
        PipelineConfig {
            offload: false,
            ..Default::default()
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        scene: SceneGraph,
        root: ObjectId,
        source: SourceId,
        recorder: Recorder,
        now: Instant,
    }

    impl Fixture {
        fn new(config: PipelineConfig, script: &str) -> Self {
            let mut texts = TextLibrary::new();
            let source = texts.insert(TextBuffer::in_memory("part.rhai", script));
            let recorder = Recorder::default();
            let mut orchestrator = Orchestrator::new(config, texts, Box::new(recorder.clone()));

            let mut scene = SceneGraph::new();
            let root = scene.create_object("root", None);
            let now = Instant::now();
            assert!(orchestrator.initialise(&scene, &mut BuiltinKernel));

            Self {
                orchestrator,
                scene,
                root,
                source,
                recorder,
                now,
            }
        }

        fn bind(&mut self) {
            self.orchestrator
                .bind(self.root, self.source, &mut self.scene)
                .unwrap();
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
            self.orchestrator.tick(&mut self.scene, self.now);
        }

        fn edit(&self, script: &str) {
            let text = self.orchestrator.texts().get(self.source).unwrap();
            text.borrow_mut().set_content(script);
        }

        fn children(&self) -> usize {
            self.scene.children(self.root).len()
        }
    }

    #[test]
    fn test_bind_builds_on_next_tick() {
        let mut f = Fixture::new(inline_config(), "let result = kernel.box(1, 1, 1);");
        f.bind();
        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Evaluating));
        assert!(f.orchestrator.is_regenerating());
        assert_eq!(f.orchestrator.progress().fraction, 0.5);

        f.advance(Duration::from_millis(10));
        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Idle));
        assert_eq!(f.children(), 1);
        assert!(f.orchestrator.last_report(f.root).unwrap().succeeded());
        assert_eq!(f.orchestrator.progress().fraction, 1.0);
    }

    #[test]
    fn test_edit_is_debounced_into_one_regeneration() {
        let mut f = Fixture::new(inline_config(), "let a = kernel.box(1, 1, 1);");
        f.bind();
        f.advance(Duration::from_millis(10));
        let first = f.orchestrator.last_report(f.root).unwrap().clone();

        // A burst of edits, each well inside the debounce window
        for i in 0..5 {
            f.edit(&format!("let a = kernel.box({}, 1, 1);", i + 2));
            f.advance(Duration::from_millis(200));
            assert_eq!(f.orchestrator.last_report(f.root), Some(&first));
        }

        // One second after the last change detection the build fires; the
        // inline job is applied in the same tick
        f.advance(Duration::from_millis(999));
        assert_eq!(f.orchestrator.last_report(f.root), Some(&first));
        f.advance(Duration::from_millis(1));
        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Idle));
        let second = f.orchestrator.last_report(f.root).unwrap();
        assert_ne!(second.script_digest, first.script_digest);
        assert_eq!(f.children(), 1);
    }

    #[test]
    fn test_trigger_during_job_runs_exactly_one_follow_up() {
        let mut f = Fixture::new(inline_config(), "let a = kernel.box(1, 1, 1);");
        f.bind();

        assert!(!f.orchestrator.regenerate(f.root));
        assert!(!f.orchestrator.regenerate(f.root));
        assert!(f.orchestrator.is_pending(f.root));

        f.edit("let a = kernel.box(1, 1, 1); let b = kernel.sphere(1);");
        f.advance(Duration::from_millis(10));

        // First result applied, follow-up dispatched with the latest text
        assert_eq!(f.children(), 1);
        assert!(!f.orchestrator.is_pending(f.root));
        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Evaluating));

        f.advance(Duration::from_millis(10));
        assert_eq!(f.children(), 2);
        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Idle));

        // Nothing else queued
        f.advance(Duration::from_millis(10));
        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Idle));
    }

    #[test]
    fn test_failure_leaves_objects_and_reports_once() {
        let mut f = Fixture::new(inline_config(), "let a = kernel.box(1, 1, 1);");
        f.bind();
        f.advance(Duration::from_millis(10));
        let before = f.scene.tree(f.root);

        f.edit("let a = kernel.box(1, 1, 1);\nlet b = kernel.box(0, 1, 1);");
        f.orchestrator.regenerate(f.root);
        f.advance(Duration::from_millis(10));

        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Failed));
        assert_eq!(f.scene.tree(f.root), before);

        let warnings = f.recorder.warnings.borrow();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Failed to regenerate BlendQuery object: at <script>:2"));
        assert!(warnings[0].contains("let b = kernel.box(0, 1, 1);"));
        assert_eq!(*f.recorder.redraws.borrow(), 1);
        assert!(!f.orchestrator.last_report(f.root).unwrap().succeeded());
    }

    #[test]
    fn test_attribute_override_survives_and_applies() {
        let mut f = Fixture::new(
            inline_config(),
            "let width = \"10\";\nlet a = kernel.box(parse_float(width), 1, 1);",
        );
        f.bind();
        f.advance(Duration::from_millis(10));

        let records = f.orchestrator.attributes_mut(f.root).unwrap();
        assert_eq!(records.len(), 1);
        records[0].value = crate::attributes::AttributeValue::Str("4".into());

        f.orchestrator.regenerate(f.root);
        f.advance(Duration::from_millis(10));

        let leaf = f.scene.children(f.root)[0];
        let mesh = f.scene.get(leaf).unwrap().mesh.as_ref().unwrap();
        assert_eq!(mesh.bounds().size()[0], 4.0);

        // Script error: record stays as the user left it
        f.edit("let width = ;");
        f.orchestrator.regenerate(f.root);
        f.advance(Duration::from_millis(10));
        let record = &f.orchestrator.binding(f.root).unwrap().attributes[0];
        assert!(record.defined);
        assert_eq!(record.value, crate::attributes::AttributeValue::Str("4".into()));

        f.orchestrator.reset_attributes(f.root);
        assert!(f.orchestrator.binding(f.root).unwrap().attributes.is_empty());
    }

    #[test]
    fn test_auto_regenerate_off_stops_watch_but_keeps_objects() {
        let mut f = Fixture::new(inline_config(), "let a = kernel.box(1, 1, 1);");
        f.bind();
        f.advance(Duration::from_millis(10));

        f.orchestrator
            .set_auto_regenerate(f.root, false)
            .unwrap();
        f.edit("let a = kernel.box(1, 1, 1); let b = kernel.sphere(1);");
        f.advance(Duration::from_millis(200));
        f.advance(Duration::from_millis(2000));
        assert_eq!(f.children(), 1);

        // Turning it back on regenerates right away
        f.orchestrator
            .set_auto_regenerate(f.root, true)
            .unwrap();
        f.advance(Duration::from_millis(10));
        assert_eq!(f.children(), 2);
    }

    #[test]
    fn test_clearing_script_detaches() {
        let mut f = Fixture::new(inline_config(), "let a = kernel.box(1, 1, 1);");
        f.bind();
        f.advance(Duration::from_millis(10));
        assert_eq!(f.children(), 1);

        f.orchestrator
            .set_script(f.root, None, &mut f.scene)
            .unwrap();
        assert_eq!(f.children(), 0);
        assert!(f.orchestrator.binding(f.root).is_none());
        assert_eq!(f.orchestrator.state(f.root), None);
    }

    #[test]
    fn test_deleted_root_is_detached_on_tick() {
        let mut f = Fixture::new(inline_config(), "let a = kernel.box(1, 1, 1);");
        f.bind();
        f.advance(Duration::from_millis(10));
        let generated = f.orchestrator.binding(f.root).unwrap().generated[0].object;

        f.scene.destroy_object(f.root).unwrap();
        f.advance(Duration::from_millis(10));

        assert!(f.orchestrator.binding(f.root).is_none());
        assert!(!f.scene.contains(generated));
    }

    #[test]
    fn test_unknown_script_is_rejected() {
        let mut f = Fixture::new(inline_config(), "");
        let err = f
            .orchestrator
            .bind(f.root, SourceId(u64::MAX), &mut f.scene)
            .unwrap_err();
        assert_eq!(err, BindingError::UnknownScript(SourceId(u64::MAX)));

        let err = f
            .orchestrator
            .bind(ObjectId(u64::MAX), f.source, &mut f.scene)
            .unwrap_err();
        assert_eq!(err, BindingError::UnknownRoot(ObjectId(u64::MAX)));
    }

    #[test]
    fn test_install_failure_disables_pipeline() {
        let mut texts = TextLibrary::new();
        let source = texts.insert(TextBuffer::in_memory("a", "let a = kernel.box(1, 1, 1);"));
        let recorder = Recorder::default();
        let mut orchestrator = Orchestrator::new(inline_config(), texts, Box::new(recorder.clone()));
        let mut scene = SceneGraph::new();
        let root = scene.create_object("root", None);
        let now = Instant::now();

        assert!(!orchestrator.initialise(&scene, &mut Broken));
        assert!(!orchestrator.is_enabled());
        assert_eq!(
            recorder.warnings.borrow().as_slice(),
            ["Failed to import BlendQuery dependencies: kernel missing".to_string()]
        );

        orchestrator.bind(root, source, &mut scene).unwrap();
        orchestrator.tick(&mut scene, now + Duration::from_secs(1));
        assert!(scene.children(root).is_empty());
    }

    #[test]
    fn test_initialise_regenerates_loaded_bindings() {
        let mut f = Fixture::new(inline_config(), "let a = kernel.box(1, 1, 1);");
        f.bind();
        f.advance(Duration::from_millis(10));
        let stored = f.orchestrator.bindings();

        // Reopen the document: stale refs are replaced on the initial pass
        f.orchestrator.load_bindings(stored);
        assert!(f.orchestrator.initialise(&f.scene, &mut BuiltinKernel));
        f.advance(Duration::from_millis(10));
        assert_eq!(f.children(), 1);
    }

    #[test]
    fn test_offloaded_job_is_polled_to_completion() {
        let mut f = Fixture::new(
            PipelineConfig::default(),
            "let a = kernel.sphere(1); let b = kernel.workplane().box(1, 2, 3);",
        );
        f.bind();

        for _ in 0..500 {
            if f.orchestrator.state(f.root) == Some(RegenerationState::Idle) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
            f.advance(Duration::from_millis(10));
        }
        assert_eq!(f.orchestrator.state(f.root), Some(RegenerationState::Idle));
        assert_eq!(f.children(), 2);
    }
}
