//! Walks a lowered Block, dispatching opcodes and threading Flow signals
//!
//!
//! Grounded on `bpmn-lite-core/src/vm.rs`'s `Vm::tick_fiber` / `TickOutcome`
//! (a PC-driven instruction loop returning a structured outcome enum),
//! generalized from one flat bytecode array to a (possibly nested) `Block`
//! walked by direct recursion instead of a PC, since branch targets here are
//! materialized sub-Blocks rather than jump offsets.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::{ErrorContext, LexFlowError, Result};
use crate::metrics::Metrics;
use crate::opcodes::registry::OpcodeRegistry;
use crate::program::{Block, Input, Statement};
use crate::runtime::ExecCtx;
use crate::value::Value;

/// Structured unwind signal a Block walk returns to its caller. Mirrors
/// `TickOutcome` in spirit: the caller inspects it instead of the walk
/// mutating a shared "should I keep going" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Break,
    ContinueLoop,
    Return,
}

/// What a control opcode needs to recurse into nested Blocks and resolve
/// non-branch inputs, without depending on `Executor` directly (that would
/// make `opcodes::registry` depend on `executor`, which already depends on
/// `opcodes::registry` for dispatch).
#[async_trait]
pub trait BlockRunner: Send + Sync {
    async fn run_block(&self, block: &Block, ctx: &mut ExecCtx) -> Result<(Flow, Option<Value>)>;
    async fn eval_input(&self, input: &Input, ctx: &mut ExecCtx) -> Result<Value>;
}

/// Drives one Runtime's statement-by-statement walk of a Block.
///
/// Holds a `Weak` handle to itself so control opcodes that need to hand an
/// *owned*, `'static` `Arc<dyn BlockRunner>` to `TaskManager::spawn` (e.g.
/// `control_spawn`) can get one without every recursive call threading an
/// `Arc<Executor>` through by hand.
pub struct Executor {
    pub registry: Arc<OpcodeRegistry>,
    pub metrics: Arc<Metrics>,
    self_ref: Weak<Executor>,
}

impl Executor {
    pub fn new(registry: Arc<OpcodeRegistry>, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Executor {
            registry,
            metrics,
            self_ref: self_ref.clone(),
        })
    }

    /// An owned, `'static` handle to this Executor as a `BlockRunner`.
    pub fn as_runner(&self) -> Arc<dyn BlockRunner> {
        self.self_ref
            .upgrade()
            .expect("Executor is always held by an Arc for its own lifetime")
    }

    /// Resolve a Statement's declared inputs into the registry's declared
    /// parameter order, recursively evaluating each via `eval_input`.
    async fn resolve_args(&self, statement: &Statement, ctx: &mut ExecCtx) -> Result<Vec<Value>> {
        let mut resolved: HashMap<String, Value> = HashMap::new();
        for (name, input) in &statement.inputs {
            let value = self.eval_input(input, ctx).await?;
            resolved.insert(name.clone(), value);
        }
        self.registry.order_and_check(&statement.opcode, resolved)
    }

    async fn exec_statement(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
    ) -> Result<Flow> {
        let start = std::time::Instant::now();
        let outcome = self.exec_statement_inner(statement, ctx).await;
        self.metrics
            .record(&statement.opcode, start.elapsed(), outcome.is_ok());
        outcome
    }

    async fn exec_statement_inner(&self, statement: &Statement, ctx: &mut ExecCtx) -> Result<Flow> {
        if !self.registry.get_interface(&statement.opcode).is_some() {
            return Err(LexFlowError::UnknownOpcode {
                name: statement.opcode.clone(),
                context: ErrorContext::new().node(statement.node_id.clone()),
            });
        }

        if self.registry.is_control(&statement.opcode) {
            let runner = self.as_runner();
            let (flow, value) = self
                .registry
                .call_control(statement, ctx, &runner)
                .await
                .map_err(|e| attach_node(e, &statement.node_id))?;
            if let Some(v) = value {
                ctx.push_value(v);
            }
            return Ok(flow);
        }

        let args = self
            .resolve_args(statement, ctx)
            .await
            .map_err(|e| attach_node(e, &statement.node_id))?;
        let is_reporter = self
            .registry
            .get_interface(&statement.opcode)
            .map(|i| i.is_reporter)
            .unwrap_or(false);
        let result = self
            .registry
            .call_simple(&statement.opcode, args, ctx)
            .await
            .map_err(|e| attach_node(e, &statement.node_id))?;
        if is_reporter {
            ctx.push_value(result);
        }
        Ok(Flow::Continue)
    }

    /// Resolve a single `Input` descriptor to a `Value`
    pub fn eval_input_inner<'a>(
        &'a self,
        input: &'a Input,
        ctx: &'a mut ExecCtx,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            match input {
                Input::Literal(v) => Ok(v.clone()),
                Input::Variable(name) => ctx.require_var(name).await,
                Input::Node(node_id) => self.eval_node(node_id, ctx).await,
                Input::Branch(_) => Err(LexFlowError::runtime(
                    "BRANCH inputs must be consumed by a control opcode, not the evaluator",
                )),
                Input::WorkflowCall(name) => Ok(Value::Str(name.clone())),
            }
        })
    }

    async fn eval_node(&self, node_id: &str, ctx: &mut ExecCtx) -> Result<Value> {
        let workflow_name = ctx.current_frame().workflow_name.clone();
        let workflow = ctx
            .program
            .resolve(&workflow_name)
            .ok_or_else(|| LexFlowError::WorkflowNotFound {
                name: workflow_name.clone(),
                context: ErrorContext::new(),
            })?;
        let statement = workflow
            .reporters
            .get(node_id)
            .cloned()
            .ok_or_else(|| LexFlowError::validation(format!(
                "NODE({node_id}) does not resolve in the reporter map for workflow {workflow_name}"
            )))?;

        let args = self.resolve_args(&statement, ctx).await?;
        self.registry.call_simple(&statement.opcode, args, ctx).await
    }

    /// Run a Block top-to-bottom; returns the Flow signal the last
    /// statement produced (`Continue` if the Block ran to completion) and,
    /// on `Return`, the value popped from the value stack.
    pub fn run_block_inner<'a>(
        &'a self,
        block: &'a Block,
        ctx: &'a mut ExecCtx,
    ) -> Pin<Box<dyn Future<Output = Result<(Flow, Option<Value>)>> + Send + 'a>> {
        Box::pin(async move {
            for statement in block.iter() {
                let flow = self.exec_statement(statement, ctx).await?;
                match flow {
                    Flow::Continue => continue,
                    Flow::Return => return Ok((Flow::Return, ctx.pop_value())),
                    Flow::Break | Flow::ContinueLoop => return Ok((flow, None)),
                }
            }
            Ok((Flow::Continue, None))
        })
    }
}

#[async_trait]
impl BlockRunner for Executor {
    async fn run_block(&self, block: &Block, ctx: &mut ExecCtx) -> Result<(Flow, Option<Value>)> {
        self.run_block_inner(block, ctx).await
    }

    async fn eval_input(&self, input: &Input, ctx: &mut ExecCtx) -> Result<Value> {
        self.eval_input_inner(input, ctx).await
    }
}

fn attach_node(err: LexFlowError, node_id: &str) -> LexFlowError {
    match err {
        LexFlowError::Opcode {
            opcode,
            source,
            mut context,
        } => {
            if context.node_id.is_none() {
                context.node_id = Some(node_id.to_string());
            }
            LexFlowError::Opcode {
                opcode,
                source,
                context,
            }
        }
        other => other,
    }
}
