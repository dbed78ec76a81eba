//! Raw ingestion DTOs: the shape `serde_json`/`serde_yaml` deserialize
//! straight off the wire, before the preprocessor normalizes input
//! descriptors and the lowering pass turns node graphs into `Block`s.
//!
//! Field names and optionality mirror the ingestion format's dict shape
//! (`interface.inputs`/`outputs`, `nodes: {id: Node}`, `isReporter`) rather
//! than inventing a Rust-ier schema, so `serde(rename)` carries the exact
//! wire vocabulary through untouched.

use std::collections::HashMap;

use serde::Deserialize;

fn default_false() -> bool {
    false
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramDto {
    pub workflows: Vec<WorkflowDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDto {
    pub name: String,
    #[serde(default)]
    pub trigger: Option<serde_json::Value>,
    #[serde(default)]
    pub interface: InterfaceDto,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    pub nodes: HashMap<String, NodeDto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceDto {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeDto {
    pub opcode: String,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    #[serde(default = "default_false", alias = "isReporter")]
    pub is_reporter: bool,
}
