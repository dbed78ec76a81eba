//! The immutable program model produced by lowering
//!
//! Grounded on `bpmn-lite-core/src/types.rs`'s `CompiledProgram`/`Instr`
//! (an immutable compiler artifact consumed by the VM) and
//! `compiler/ir.rs`'s `IRNode`/`IREdge` (the pre-lowering graph shape).

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// A node-graph id, stable across the lowering pass for diagnostics and
/// `NODE(id)` resolution.
pub type NodeId = String;

/// A tagged reference to a value source.
#[derive(Clone, Debug)]
pub enum Input {
    Literal(Value),
    Variable(String),
    /// Re-evaluated at use site via the workflow's reporter map.
    Node(NodeId),
    /// A nested Block, handed to control-flow opcodes unevaluated.
    Branch(Block),
    WorkflowCall(String),
}

/// An effect instruction: opcode name, resolved-or-unresolved inputs, and
/// its node-graph origin for diagnostics.
#[derive(Clone, Debug)]
pub struct Statement {
    pub opcode: String,
    pub inputs: HashMap<String, Input>,
    pub node_id: NodeId,
}

impl Statement {
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }
}

/// An ordered sequence of Statements — the linear form of a (sub)graph.
#[derive(Clone, Debug, Default)]
pub struct Block(pub Vec<Statement>);

impl Block {
    pub fn new(statements: Vec<Statement>) -> Self {
        Block(statements)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Statement> {
        self.0.iter()
    }
}

/// Node id → Statement, scoped per workflow (see DESIGN.md's Open Question
/// resolution: ingestion-format node ids are only unique within one
/// workflow's `nodes` map).
pub type ReporterMap = HashMap<NodeId, Statement>;

/// A named, directed graph of nodes, already lowered to its linear `body`.
#[derive(Clone, Debug)]
pub struct Workflow {
    pub name: String,
    pub params: Vec<String>,
    pub locals: HashMap<String, Value>,
    pub body: Block,
    pub reporters: ReporterMap,
    /// Opaque pass-through, interpreted only by the (out-of-scope) HTTP
    /// trigger router.
    pub trigger: Option<serde_json::Value>,
    /// Descriptive only — not enforced against the actual `workflow_return`
    /// value.
    pub declared_outputs: Vec<String>,
}

/// An immutable bundle: the entry workflow plus every workflow it (or its
/// callees) may invoke via `WORKFLOW_CALL`.
#[derive(Clone, Debug)]
pub struct Program {
    pub main: Arc<Workflow>,
    pub externals: HashMap<String, Arc<Workflow>>,
}

impl Program {
    /// Resolve a `WORKFLOW_CALL` target against `externals ∪ {main}`.
    pub fn resolve(&self, name: &str) -> Option<Arc<Workflow>> {
        if name == self.main.name {
            Some(self.main.clone())
        } else {
            self.externals.get(name).cloned()
        }
    }
}
