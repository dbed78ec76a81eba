//! Top-level façade: wires Program + OpcodeRegistry + Metrics + output sink
//! together, runs `main`, and tears the Runtime down on every exit path.
//!
//! Grounded on `bpmn-lite-core/src/engine.rs`'s `BpmnLiteEngine` (a facade
//! struct wrapping the store and exposing `compile`/`start`/`run_instance`),
//! generalized from its persistent-instance model to one-shot `run()`
//! calls, since programs here are not sandboxed across invocations and
//! Runtimes are created and torn down per call.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use crate::error::{ErrorContext, LexFlowError, Result};
use crate::executor::{BlockRunner, Executor, Flow};
use crate::metrics::Metrics;
use crate::opcodes::registry::{default_registry, OpcodeRegistry};
use crate::output::{NullOutput, OutputSink};
use crate::program::Program;
use crate::runtime::ExecCtx;
use crate::tasks::TaskManager;
use crate::value::Value;

/// Plain-struct configuration, in place of hardcoded constants — mirrors
/// how worker tuning (batch sizes, retry counts) is passed as a config
/// struct rather than scattered module-level constants.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_call_depth: usize,
    pub metrics_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: 1024,
            metrics_enabled: true,
        }
    }
}

pub struct Engine {
    program: Arc<Program>,
    registry: Arc<OpcodeRegistry>,
    metrics: Arc<Metrics>,
    output: Arc<dyn OutputSink>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(program: Arc<Program>) -> Self {
        Self::with_config(program, EngineConfig::default())
    }

    pub fn with_config(program: Arc<Program>, config: EngineConfig) -> Self {
        let metrics = if config.metrics_enabled {
            Metrics::new()
        } else {
            Metrics::disabled()
        };
        Engine {
            program,
            registry: default_registry(),
            metrics: Arc::new(metrics),
            output: Arc::new(NullOutput),
            config,
        }
    }

    pub fn with_opcodes(mut self, registry: Arc<OpcodeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<OpcodeRegistry> {
        &self.registry
    }

    /// Run `main` to completion, binding `inputs` against its declared
    /// parameters the same way `workflow_call` binds a callee's. Every
    /// still-running task spawned during the run is cancelled and every
    /// channel it owns goes out of scope (dropped) once this returns,
    /// regardless of success or failure.
    #[instrument(skip(self, inputs), fields(workflow = %self.program.main.name))]
    pub async fn run(&self, inputs: Option<HashMap<String, Value>>) -> Result<Option<Value>> {
        let tasks = Arc::new(TaskManager::new());
        let executor = Executor::new(self.registry.clone(), self.metrics.clone());
        let mut ctx = ExecCtx::new(self.program.clone(), tasks.clone(), self.config.max_call_depth);

        let bind_result = bind_entry_inputs(&ctx, &self.program, inputs).await;
        let run_result = match bind_result {
            Ok(()) => {
                let runner: Arc<dyn BlockRunner> = executor.as_runner();
                runner.run_block(&self.program.main.body, &mut ctx).await
            }
            Err(e) => Err(e),
        };

        tasks.cleanup().await;

        match run_result? {
            (Flow::Return, value) => Ok(value),
            _ => Ok(None),
        }
    }

    pub fn output(&self) -> &Arc<dyn OutputSink> {
        &self.output
    }
}

async fn bind_entry_inputs(
    ctx: &ExecCtx,
    program: &Program,
    inputs: Option<HashMap<String, Value>>,
) -> Result<()> {
    // Seed the `variables:` block first, exactly as `call_workflow` seeds a
    // callee's scope from `workflow.locals` before overlaying actuals —
    // `main` is otherwise no different from a called workflow.
    for (name, value) in &program.main.locals {
        ctx.set_var(name, value.clone()).await;
    }

    let mut actuals = inputs.unwrap_or_default();
    for param in &program.main.params {
        if let Some(value) = actuals.remove(param) {
            ctx.set_var(param, value).await;
        } else if ctx.get_var(param).await.is_none() {
            return Err(LexFlowError::MissingParam {
                name: param.clone(),
                opcode: "engine_run".to_string(),
                context: ErrorContext::new().workflow(program.main.name.clone()),
            });
        }
    }
    if let Some((leftover, _)) = actuals.into_iter().next() {
        return Err(LexFlowError::UnknownParam {
            name: leftover,
            opcode: "engine_run".to_string(),
            context: ErrorContext::new().workflow(program.main.name.clone()),
        });
    }
    Ok(())
}
