use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::attributes::{find_mut, AttributeValue};
use crate::config::PipelineConfig;
use crate::orchestrator::{BuiltinKernel, Orchestrator, RegenerationState};
use crate::report::LogReporter;
use crate::scene_graph::{HostScene, ObjectId, SceneGraph};
use crate::text_source::{TextBuffer, TextLibrary};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a script once and print the generated object tree
    Build {
        /// Script file
        script: PathBuf,

        /// Override a script attribute, e.g. `--set width=12`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Write the object tree to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Pipeline configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Regenerate whenever the script file changes
    Watch {
        /// Script file
        script: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            script,
            overrides,
            out,
            config,
        } => build(&script, &overrides, out.as_deref(), config.as_deref()),
        Commands::Watch { script, config } => watch(&script, config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

/// A headless host: one root object bound to one script file.
struct Session {
    orchestrator: Orchestrator,
    scene: SceneGraph,
    root: ObjectId,
}

impl Session {
    fn open(script: &Path, config: PipelineConfig) -> Result<Self> {
        let text = TextBuffer::external(script)
            .with_context(|| format!("Failed to read script {}", script.display()))?;

        let mut texts = TextLibrary::new();
        let source = texts.insert(text);
        let mut orchestrator = Orchestrator::new(config, texts, Box::new(LogReporter));

        let mut scene = SceneGraph::new();
        let root = scene.create_object("BlendQuery", None);
        scene.link_into_scene(root)?;

        if !orchestrator.initialise(&scene, &mut BuiltinKernel) {
            bail!("Geometry kernel is unavailable");
        }
        orchestrator.bind(root, source, &mut scene)?;

        Ok(Self {
            orchestrator,
            scene,
            root,
        })
    }

    fn tick(&mut self) {
        self.orchestrator.tick(&mut self.scene, Instant::now());
    }

    /// Tick until no job is in flight.
    fn settle(&mut self) {
        let interval = self.orchestrator.config().worker_poll_interval();
        loop {
            self.tick();
            if !self.orchestrator.is_regenerating() {
                break;
            }
            std::thread::sleep(interval);
        }
    }

    fn apply_overrides(&mut self, overrides: &[String]) -> Result<()> {
        let records = self
            .orchestrator
            .attributes_mut(self.root)
            .ok_or_else(|| anyhow!("Script is not bound"))?;

        for entry in overrides {
            let (key, text) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", entry))?;
            let key = key.trim();
            // Prefer the record the last evaluation defined.
            let kind = records
                .iter()
                .filter(|r| r.key == key)
                .max_by_key(|r| r.defined)
                .map(|r| r.kind())
                .ok_or_else(|| anyhow!("Script has no attribute '{}'", key))?;
            let value = AttributeValue::parse(kind, text).map_err(|e| anyhow!(e))?;
            let record = find_mut(records, key, kind)
                .ok_or_else(|| anyhow!("Script has no attribute '{}'", key))?;
            record.set_value(value).map_err(|e| anyhow!(e))?;
            log::info!("Override {} = {}", key, record.value);
        }
        Ok(())
    }
}

fn build(
    script: &Path,
    overrides: &[String],
    out: Option<&Path>,
    config: Option<&Path>,
) -> Result<()> {
    let mut session = Session::open(script, load_config(config)?)?;
    session.settle();

    // Attributes only exist after a first evaluation.
    if !overrides.is_empty() {
        session.apply_overrides(overrides)?;
        session.orchestrator.regenerate(session.root);
        session.settle();
    }

    if let Some(report) = session.orchestrator.last_report(session.root) {
        if let Some(failure) = &report.failure {
            bail!("Failed to regenerate {}:\n{}", script.display(), failure);
        }
        log::info!("{}", serde_json::to_string(report)?);
    }

    let tree = session
        .scene
        .tree(session.root)
        .ok_or_else(|| anyhow!("Root object disappeared"))?;
    let json = serde_json::to_string_pretty(&tree)?;

    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn watch(script: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let interval = config.worker_poll_interval();
    let mut session = Session::open(script, config)?;

    println!("Watching {} (Ctrl+C to stop)", script.display());
    let mut last_state = None;
    loop {
        session.tick();

        let state = session.orchestrator.state(session.root);
        if state != last_state {
            if state == Some(RegenerationState::Idle) {
                if let Some(report) = session.orchestrator.last_report(session.root) {
                    println!(
                        "Regenerated {} objects in {}ms",
                        report.object_count, report.duration_ms
                    );
                }
            }
            last_state = state;
        }

        std::thread::sleep(interval);
    }
}
