pub mod config;
pub mod error;
pub mod report;

// Host model
pub mod mesh;
pub mod scene_graph;
pub mod text_source;
pub mod change_detector;

// Geometry kernel
pub mod kernel;
pub mod kernel_rhai;
pub mod tessellate;

// Script evaluation
pub mod scripting;
pub mod script_diagnostics;
pub mod script_log;
pub mod attributes;

// Regeneration pipeline
pub mod binding;
pub mod geometry;
pub mod orchestrator;

pub mod cli;
