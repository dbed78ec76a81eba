//! The built-in opcode library: the core control-flow, data, task, and
//! channel opcodes the interpreter ships with.
//!
//! Grounded name-for-name on the fixture workflows in
//! `original_source/tests/integration/async_features/*.py` (opcode names,
//! parameter names like `A`/`B`, `VARIABLE`/`VALUE`, `TASK`, `CHANNEL`) and
//! on `bpmn-lite-core/src/vm.rs`'s instruction handlers for the control-flow
//! shape (loop/branch/return as explicit match arms over a small enum).
//!
//! Domain opcodes (HTTP, LLM, and similar integrations) are an external
//! collaborator's concern, not this crate's — only the opcodes the
//! interpreter's own contract and test scenarios need are built in here.

use std::sync::Arc;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{ErrorContext, LexFlowError, Result};
use crate::executor::{BlockRunner, Flow};
use crate::opcodes::registry::{Interface, OpcodeRegistry, ParamSpec, SimpleOpcode, ControlOpcode};
use crate::program::{Input, Statement};
use crate::runtime::{new_channel, ExecCtx};
use crate::value::{SemanticTag, Value};

pub fn register_all(registry: &OpcodeRegistry) {
    register_simple_opcodes(registry);
    register_control_opcodes(registry);
}

// ---------------------------------------------------------------------
// Simple (non-control) opcodes
// ---------------------------------------------------------------------

struct Noop;
#[async_trait]
impl SimpleOpcode for Noop {
    async fn call(&self, _args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        Ok(Value::Null)
    }
}

struct DataSetVariableTo;
#[async_trait]
impl SimpleOpcode for DataSetVariableTo {
    async fn call(&self, mut args: Vec<Value>, ctx: &mut ExecCtx) -> Result<Value> {
        let value = args.pop().unwrap();
        let name = args.pop().unwrap();
        let name = name.as_str().ok_or_else(|| {
            LexFlowError::runtime("VARIABLE must resolve to a string")
        })?;
        ctx.set_var(name, value).await;
        Ok(Value::Null)
    }
}

struct OperatorAdd;
#[async_trait]
impl SimpleOpcode for OperatorAdd {
    async fn call(&self, args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let (a, b) = (&args[0], &args[1]);
        Ok(numeric_add(a, b))
    }
}

fn numeric_add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
        _ => Value::Float(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
    }
}

struct OperatorGreaterThan;
#[async_trait]
impl SimpleOpcode for OperatorGreaterThan {
    async fn call(&self, args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let a = args[0].as_f64().unwrap_or(f64::NAN);
        let b = args[1].as_f64().unwrap_or(f64::NAN);
        Ok(Value::Bool(a > b))
    }
}

struct ListAppend;
#[async_trait]
impl SimpleOpcode for ListAppend {
    async fn call(&self, mut args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let value = args.pop().unwrap();
        let list = args.pop().unwrap();
        let mut items = match list {
            Value::List(items) => items,
            other => return Err(LexFlowError::runtime(format!(
                "list_append: LIST must be a list, got {}",
                other.type_name()
            ))),
        };
        items.push(value);
        Ok(Value::List(items))
    }
}

struct TaskSleep;
#[async_trait]
impl SimpleOpcode for TaskSleep {
    async fn call(&self, args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let seconds = args[0].as_f64().unwrap_or(0.0).max(0.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
        Ok(Value::Null)
    }
}

struct TaskIsDone;
#[async_trait]
impl SimpleOpcode for TaskIsDone {
    async fn call(&self, args: Vec<Value>, ctx: &mut ExecCtx) -> Result<Value> {
        let id = args[0]
            .as_task()
            .ok_or_else(|| LexFlowError::runtime("TASK must be a task handle"))?;
        Ok(Value::Bool(ctx.tasks.is_done(id).await))
    }
}

struct TaskAwait;
#[async_trait]
impl SimpleOpcode for TaskAwait {
    async fn call(&self, args: Vec<Value>, ctx: &mut ExecCtx) -> Result<Value> {
        let id = args[0]
            .as_task()
            .ok_or_else(|| LexFlowError::runtime("TASK must be a task handle"))?;
        ctx.tasks.wait(id, None).await
    }
}

struct ChannelCreate;
#[async_trait]
impl SimpleOpcode for ChannelCreate {
    async fn call(&self, args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let size = args[0].as_int().unwrap_or(0).max(0) as usize;
        Ok(new_channel(size))
    }
}

struct ChannelSend;
#[async_trait]
impl SimpleOpcode for ChannelSend {
    async fn call(&self, args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let channel = args[0]
            .as_channel()
            .ok_or_else(|| LexFlowError::runtime("CHANNEL must be a channel handle"))?
            .clone();
        channel.send(args[1].clone()).await?;
        Ok(Value::Null)
    }
}

struct ChannelReceive;
#[async_trait]
impl SimpleOpcode for ChannelReceive {
    async fn call(&self, args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let channel = args[0]
            .as_channel()
            .ok_or_else(|| LexFlowError::runtime("CHANNEL must be a channel handle"))?
            .clone();
        Ok(channel.receive().await?.unwrap_or(Value::Null))
    }
}

struct ChannelClose;
#[async_trait]
impl SimpleOpcode for ChannelClose {
    async fn call(&self, args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
        let channel = args[0]
            .as_channel()
            .ok_or_else(|| LexFlowError::runtime("CHANNEL must be a channel handle"))?
            .clone();
        channel.close().await;
        Ok(Value::Null)
    }
}

fn register_simple_opcodes(registry: &OpcodeRegistry) {
    registry.register_simple(
        Interface {
            name: "workflow_start".to_string(),
            params: vec![],
            return_type: None,
            doc: "marks the entry point of a workflow's body".to_string(),
            is_reporter: false,
            is_control: false,
            privileged: false,
        },
        Arc::new(Noop),
    );
    registry.register_simple(
        Interface {
            name: "noop".to_string(),
            params: vec![],
            return_type: None,
            doc: "does nothing".to_string(),
            is_reporter: false,
            is_control: false,
            privileged: false,
        },
        Arc::new(Noop),
    );
    registry.register_simple(
        Interface {
            name: "data_set_variable_to".to_string(),
            params: vec![
                ParamSpec::required("VARIABLE", SemanticTag::String),
                ParamSpec::required("VALUE", SemanticTag::Any),
            ],
            return_type: None,
            doc: "binds VARIABLE to VALUE in the current scope".to_string(),
            is_reporter: false,
            is_control: false,
            privileged: false,
        },
        Arc::new(DataSetVariableTo),
    );
    registry.register_simple(
        Interface {
            name: "operator_add".to_string(),
            params: vec![
                ParamSpec::required("A", SemanticTag::Float),
                ParamSpec::required("B", SemanticTag::Float),
            ],
            return_type: Some(SemanticTag::Float),
            doc: "A + B, integer if both operands are integers".to_string(),
            is_reporter: true,
            is_control: false,
            privileged: false,
        },
        Arc::new(OperatorAdd),
    );
    registry.register_simple(
        Interface {
            name: "operator_greater_than".to_string(),
            params: vec![
                ParamSpec::required("A", SemanticTag::Float),
                ParamSpec::required("B", SemanticTag::Float),
            ],
            return_type: Some(SemanticTag::Bool),
            doc: "A > B".to_string(),
            is_reporter: true,
            is_control: false,
            privileged: false,
        },
        Arc::new(OperatorGreaterThan),
    );
    registry.register_simple(
        Interface {
            name: "list_append".to_string(),
            params: vec![
                ParamSpec::required("LIST", SemanticTag::List),
                ParamSpec::required("VALUE", SemanticTag::Any),
            ],
            return_type: Some(SemanticTag::List),
            doc: "returns a new list with VALUE appended".to_string(),
            is_reporter: true,
            is_control: false,
            privileged: false,
        },
        Arc::new(ListAppend),
    );
    registry.register_simple(
        Interface {
            name: "task_sleep".to_string(),
            params: vec![ParamSpec::required("SECONDS", SemanticTag::Float)],
            return_type: None,
            doc: "suspends the current task for SECONDS".to_string(),
            is_reporter: false,
            is_control: false,
            privileged: false,
        },
        Arc::new(TaskSleep),
    );
    registry.register_simple(
        Interface {
            name: "task_is_done".to_string(),
            params: vec![ParamSpec::required("TASK", SemanticTag::Task)],
            return_type: Some(SemanticTag::Bool),
            doc: "true if TASK has finished or been cancelled".to_string(),
            is_reporter: true,
            is_control: false,
            privileged: false,
        },
        Arc::new(TaskIsDone),
    );
    registry.register_simple(
        Interface {
            name: "task_await".to_string(),
            params: vec![ParamSpec::required("TASK", SemanticTag::Task)],
            return_type: Some(SemanticTag::Any),
            doc: "awaits TASK and returns its result".to_string(),
            is_reporter: true,
            is_control: false,
            privileged: false,
        },
        Arc::new(TaskAwait),
    );
    registry.register_simple(
        Interface {
            name: "channel_create".to_string(),
            params: vec![ParamSpec::optional("SIZE", SemanticTag::Int, Value::Int(0))],
            return_type: Some(SemanticTag::Channel),
            doc: "creates a bounded channel; SIZE=0 is an unbuffered rendezvous channel".to_string(),
            is_reporter: true,
            is_control: false,
            privileged: false,
        },
        Arc::new(ChannelCreate),
    );
    registry.register_simple(
        Interface {
            name: "channel_send".to_string(),
            params: vec![
                ParamSpec::required("CHANNEL", SemanticTag::Channel),
                ParamSpec::required("VALUE", SemanticTag::Any),
            ],
            return_type: None,
            doc: "sends VALUE on CHANNEL, suspending for capacity if needed".to_string(),
            is_reporter: false,
            is_control: false,
            privileged: false,
        },
        Arc::new(ChannelSend),
    );
    registry.register_simple(
        Interface {
            name: "channel_receive".to_string(),
            params: vec![ParamSpec::required("CHANNEL", SemanticTag::Channel)],
            return_type: Some(SemanticTag::Any),
            doc: "receives the next value from CHANNEL, or null once drained and closed".to_string(),
            is_reporter: true,
            is_control: false,
            privileged: false,
        },
        Arc::new(ChannelReceive),
    );
    registry.register_simple(
        Interface {
            name: "channel_close".to_string(),
            params: vec![ParamSpec::required("CHANNEL", SemanticTag::Channel)],
            return_type: None,
            doc: "closes CHANNEL; queued values remain receivable".to_string(),
            is_reporter: false,
            is_control: false,
            privileged: false,
        },
        Arc::new(ChannelClose),
    );
}

// ---------------------------------------------------------------------
// Control-flow opcodes
// ---------------------------------------------------------------------

fn get_branch<'a>(statement: &'a Statement, name: &str) -> Result<&'a crate::program::Block> {
    match statement.inputs.get(name) {
        Some(Input::Branch(block)) => Ok(block),
        Some(_) => Err(LexFlowError::runtime(format!(
            "{name} must be a BRANCH input for {}",
            statement.opcode
        ))),
        None => Err(LexFlowError::MissingParam {
            name: name.to_string(),
            opcode: statement.opcode.clone(),
            context: ErrorContext::new(),
        }),
    }
}

fn get_branch_opt<'a>(statement: &'a Statement, name: &str) -> Option<&'a crate::program::Block> {
    match statement.inputs.get(name) {
        Some(Input::Branch(block)) => Some(block),
        _ => None,
    }
}

async fn eval_named(
    runner: &Arc<dyn BlockRunner>,
    statement: &Statement,
    ctx: &mut ExecCtx,
    name: &str,
) -> Result<Value> {
    let input = statement.inputs.get(name).ok_or_else(|| LexFlowError::MissingParam {
        name: name.to_string(),
        opcode: statement.opcode.clone(),
        context: ErrorContext::new(),
    })?;
    runner.eval_input(input, ctx).await
}

async fn eval_named_opt(
    runner: &Arc<dyn BlockRunner>,
    statement: &Statement,
    ctx: &mut ExecCtx,
    name: &str,
) -> Result<Option<Value>> {
    match statement.inputs.get(name) {
        Some(input) => Ok(Some(runner.eval_input(input, ctx).await?)),
        None => Ok(None),
    }
}

struct WorkflowReturn;
#[async_trait]
impl ControlOpcode for WorkflowReturn {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let value = eval_named_opt(runner, statement, ctx, "VALUE").await?;
        Ok((Flow::Return, value))
    }
}

struct ControlIf;
#[async_trait]
impl ControlOpcode for ControlIf {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let condition = eval_named(runner, statement, ctx, "CONDITION").await?;
        if condition.is_truthy() {
            let then_block = get_branch(statement, "THEN")?;
            runner.run_block(then_block, ctx).await
        } else if let Some(else_block) = get_branch_opt(statement, "ELSE") {
            runner.run_block(else_block, ctx).await
        } else {
            Ok((Flow::Continue, None))
        }
    }
}

struct ControlWhile;
#[async_trait]
impl ControlOpcode for ControlWhile {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let body = get_branch(statement, "BODY")?;
        loop {
            let condition = eval_named(runner, statement, ctx, "CONDITION").await?;
            if !condition.is_truthy() {
                return Ok((Flow::Continue, None));
            }
            match runner.run_block(body, ctx).await? {
                (Flow::Continue, _) | (Flow::ContinueLoop, _) => continue,
                (Flow::Break, _) => return Ok((Flow::Continue, None)),
                (Flow::Return, v) => return Ok((Flow::Return, v)),
            }
        }
    }
}

struct ControlFor;
#[async_trait]
impl ControlOpcode for ControlFor {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let body = get_branch(statement, "BODY")?;
        let var_name = eval_named(runner, statement, ctx, "VAR")
            .await?
            .as_str()
            .ok_or_else(|| LexFlowError::runtime("VAR must be a string"))?
            .to_string();
        let start = eval_named(runner, statement, ctx, "START").await?.as_int().unwrap_or(0);
        let end = eval_named(runner, statement, ctx, "END").await?.as_int().unwrap_or(0);
        let step = match eval_named_opt(runner, statement, ctx, "STEP").await? {
            Some(v) => v.as_int().unwrap_or(1),
            None => 1,
        };
        if step == 0 {
            return Err(LexFlowError::validation("control_for STEP must not be zero"));
        }

        ctx.push_scope();
        let mut i = start;
        let outcome = loop {
            if !((step > 0 && i < end) || (step < 0 && i > end)) {
                break Ok((Flow::Continue, None));
            }
            ctx.declare_var(&var_name, Value::Int(i)).await;
            match runner.run_block(body, ctx).await {
                Ok((Flow::Continue, _)) | Ok((Flow::ContinueLoop, _)) => {}
                Ok((Flow::Break, _)) => break Ok((Flow::Continue, None)),
                Ok((Flow::Return, v)) => break Ok((Flow::Return, v)),
                Err(e) => break Err(e),
            }
            i += step;
        };
        ctx.pop_scope();
        outcome
    }
}

async fn foreach_items(
    runner: &Arc<dyn BlockRunner>,
    statement: &Statement,
    ctx: &mut ExecCtx,
) -> Result<(String, Vec<Value>)> {
    let var_name = eval_named(runner, statement, ctx, "VAR")
        .await?
        .as_str()
        .ok_or_else(|| LexFlowError::runtime("VAR must be a string"))?
        .to_string();
    let iterable = eval_named(runner, statement, ctx, "ITERABLE").await?;
    let items = iterable.iter_items().ok_or_else(|| {
        LexFlowError::TypeMismatch {
            opcode: statement.opcode.clone(),
            param: "ITERABLE".to_string(),
            expected: "list or dict".to_string(),
            got: iterable.type_name().to_string(),
            context: ErrorContext::new(),
        }
    })?;
    Ok((var_name, items))
}

struct ControlForeach {
    yield_between_iterations: bool,
}
#[async_trait]
impl ControlOpcode for ControlForeach {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let body = get_branch(statement, "BODY")?;
        let (var_name, items) = foreach_items(runner, statement, ctx).await?;

        ctx.push_scope();
        let mut outcome = Ok((Flow::Continue, None));
        for item in items {
            ctx.declare_var(&var_name, item).await;
            match runner.run_block(body, ctx).await {
                Ok((Flow::Continue, _)) | Ok((Flow::ContinueLoop, _)) => {}
                Ok((Flow::Break, _)) => break,
                Ok((Flow::Return, v)) => {
                    outcome = Ok((Flow::Return, v));
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
            if self.yield_between_iterations {
                tokio::task::yield_now().await;
            }
        }
        ctx.pop_scope();
        outcome
    }
}

struct ControlSpawn;
#[async_trait]
impl ControlOpcode for ControlSpawn {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let body = get_branch(statement, "BODY")?.clone();
        let name = match eval_named_opt(runner, statement, ctx, "VAR").await? {
            Some(v) => v.as_str().map(|s| s.to_string()),
            None => None,
        };

        let mut task_ctx = ctx.fork();
        let task_runner = runner.clone();
        let fut = async move {
            match task_runner.run_block(&body, &mut task_ctx).await? {
                (Flow::Return, Some(v)) => Ok(v),
                _ => Ok(Value::Null),
            }
        };
        let handle = ctx.tasks.spawn(Box::pin(fut), name.clone()).await;

        if let Some(var_name) = name {
            ctx.set_var(&var_name, Value::Task(handle.id)).await;
        }
        Ok((Flow::Continue, None))
    }
}

struct ControlFork;
#[async_trait]
impl ControlOpcode for ControlFork {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let mut branch_names: Vec<&String> = statement
            .inputs
            .keys()
            .filter(|k| k.starts_with("BRANCH"))
            .collect();
        branch_names.sort_by_key(|k| k[6..].parse::<u32>().unwrap_or(u32::MAX));
        if branch_names.is_empty() {
            return Err(LexFlowError::validation(
                "control_fork requires at least one BRANCH input",
            ));
        }

        let mut handles = Vec::new();
        for key in branch_names {
            let block = get_branch(statement, key)?.clone();
            let mut branch_ctx = ctx.fork();
            let branch_runner = runner.clone();
            handles.push(tokio::spawn(async move {
                branch_runner.run_block(&block, &mut branch_ctx).await
            }));
        }

        // join-on-all, cancel-on-any-failure: as soon as one branch errors or
        // exits via anything but Continue, abort every sibling still running
        // instead of waiting for it to finish on its own.
        let mut first_error: Option<LexFlowError> = None;
        let mut pending = handles;
        while !pending.is_empty() {
            let (result, _index, remaining) = futures::future::select_all(pending).await;
            pending = remaining;
            match result {
                Ok(Ok((Flow::Continue, _))) => {}
                Ok(Ok((other, _))) => {
                    first_error = Some(LexFlowError::runtime(format!(
                        "control_fork branch exited via {other:?}, which is not permitted inside a fork"
                    )));
                }
                Ok(Err(e)) => first_error = Some(e),
                Err(join_err) => first_error = Some(LexFlowError::runtime(join_err.to_string())),
            }
            if first_error.is_some() {
                for handle in &pending {
                    handle.abort();
                }
                break;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok((Flow::Continue, None)),
        }
    }
}

struct AsyncTimeout;
#[async_trait]
impl ControlOpcode for AsyncTimeout {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let seconds = eval_named(runner, statement, ctx, "TIMEOUT")
            .await?
            .as_f64()
            .unwrap_or(0.0);
        let body = get_branch(statement, "BODY")?;
        let duration = std::time::Duration::from_secs_f64(seconds.max(0.0));

        match tokio::time::timeout(duration, runner.run_block(body, ctx)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                if let Some(on_timeout) = get_branch_opt(statement, "ON_TIMEOUT") {
                    runner.run_block(on_timeout, ctx).await
                } else {
                    Err(LexFlowError::TimeoutExceeded {
                        seconds,
                        context: ErrorContext::new(),
                    })
                }
            }
        }
    }
}

struct WorkflowCall;
#[async_trait]
impl ControlOpcode for WorkflowCall {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let target_name = match statement.inputs.get("WORKFLOW") {
            Some(Input::WorkflowCall(name)) => name.clone(),
            Some(input) => runner
                .eval_input(input, ctx)
                .await?
                .as_str()
                .ok_or_else(|| LexFlowError::runtime("WORKFLOW must resolve to a string name"))?
                .to_string(),
            None => {
                return Err(LexFlowError::MissingParam {
                    name: "WORKFLOW".to_string(),
                    opcode: statement.opcode.clone(),
                    context: ErrorContext::new(),
                })
            }
        };

        let mut actuals = HashMap::new();
        if let Some(input @ (Input::Literal(_) | Input::Variable(_) | Input::Node(_))) =
            statement.inputs.get("INPUTS")
        {
            if let Value::Dict(entries) = runner.eval_input(input, ctx).await? {
                for (k, v) in entries {
                    actuals.insert(k, v);
                }
            }
        }

        let result = call_workflow(&target_name, actuals, ctx, runner).await?;
        Ok((Flow::Continue, Some(result)))
    }
}

/// Invokes `target_name` as a subroutine: binds `actuals` over the callee's
/// declared params (falling back to its `locals` defaults), pushes a fresh
/// call frame, runs its body, and unwinds on `workflow_return` or fall-off.
async fn call_workflow(
    target_name: &str,
    mut actuals: HashMap<String, Value>,
    ctx: &mut ExecCtx,
    runner: &Arc<dyn BlockRunner>,
) -> Result<Value> {
    let workflow = ctx
        .program
        .resolve(target_name)
        .ok_or_else(|| LexFlowError::WorkflowNotFound {
            name: target_name.to_string(),
            context: ErrorContext::new(),
        })?;

    let mut bindings = workflow.locals.clone();
    for param in &workflow.params {
        if let Some(value) = actuals.remove(param) {
            bindings.insert(param.clone(), value);
        } else if !bindings.contains_key(param) {
            return Err(LexFlowError::MissingParam {
                name: param.clone(),
                opcode: "workflow_call".to_string(),
                context: ErrorContext::new().workflow(target_name.to_string()),
            });
        }
    }
    if let Some((leftover, _)) = actuals.into_iter().next() {
        return Err(LexFlowError::UnknownParam {
            name: leftover,
            opcode: "workflow_call".to_string(),
            context: ErrorContext::new().workflow(target_name.to_string()),
        });
    }

    let scope = crate::runtime::new_scope();
    *scope.lock().await = bindings;

    ctx.push_call(target_name, scope)?;
    let outcome = runner.run_block(&workflow.body, ctx).await;
    ctx.pop_call();

    match outcome? {
        (Flow::Return, value) => Ok(value.unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn register_control_opcodes(registry: &OpcodeRegistry) {
    registry.register_control(
        Interface {
            name: "workflow_return".to_string(),
            params: vec![ParamSpec::optional("VALUE", SemanticTag::Any, Value::Null)],
            return_type: None,
            doc: "unwinds to the workflow call boundary with an optional return value".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(WorkflowReturn),
    );
    registry.register_control(
        Interface {
            name: "control_if".to_string(),
            params: vec![
                ParamSpec::required("CONDITION", SemanticTag::Any),
                ParamSpec::required("THEN", SemanticTag::Block),
                ParamSpec::optional("ELSE", SemanticTag::Block, Value::Null),
            ],
            return_type: None,
            doc: "executes THEN if CONDITION is truthy, else ELSE if present".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(ControlIf),
    );
    registry.register_control(
        Interface {
            name: "control_while".to_string(),
            params: vec![
                ParamSpec::required("CONDITION", SemanticTag::Any),
                ParamSpec::required("BODY", SemanticTag::Block),
            ],
            return_type: None,
            doc: "re-evaluates CONDITION each iteration".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(ControlWhile),
    );
    registry.register_control(
        Interface {
            name: "control_for".to_string(),
            params: vec![
                ParamSpec::required("VAR", SemanticTag::String),
                ParamSpec::required("START", SemanticTag::Int),
                ParamSpec::required("END", SemanticTag::Int),
                ParamSpec::required("BODY", SemanticTag::Block),
                ParamSpec::optional("STEP", SemanticTag::Int, Value::Int(1)),
            ],
            return_type: None,
            doc: "integer range [START, END) stepping by STEP, binding VAR".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(ControlFor),
    );
    registry.register_control(
        Interface {
            name: "control_foreach".to_string(),
            params: vec![
                ParamSpec::required("VAR", SemanticTag::String),
                ParamSpec::required("ITERABLE", SemanticTag::Any),
                ParamSpec::required("BODY", SemanticTag::Block),
            ],
            return_type: None,
            doc: "iterates a list's elements or a dict's keys, binding VAR".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(ControlForeach {
            yield_between_iterations: false,
        }),
    );
    registry.register_control(
        Interface {
            name: "control_async_foreach".to_string(),
            params: vec![
                ParamSpec::required("VAR", SemanticTag::String),
                ParamSpec::required("ITERABLE", SemanticTag::Any),
                ParamSpec::required("BODY", SemanticTag::Block),
            ],
            return_type: None,
            doc: "like control_foreach, but yields to the scheduler between iterations".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(ControlForeach {
            yield_between_iterations: true,
        }),
    );
    registry.register_control(
        Interface {
            name: "control_spawn".to_string(),
            params: vec![
                ParamSpec::required("BODY", SemanticTag::Block),
                ParamSpec::optional("VAR", SemanticTag::String, Value::Null),
            ],
            return_type: None,
            doc: "schedules BODY as a background task owned by the current Runtime".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(ControlSpawn),
    );
    registry.register_control(
        Interface {
            name: "control_fork".to_string(),
            params: vec![
                ParamSpec::required("BRANCH1", SemanticTag::Block),
                ParamSpec::optional("BRANCH2", SemanticTag::Block, Value::Null),
            ],
            return_type: None,
            doc: "runs BRANCH1..BRANCHn concurrently; cancel-on-first-failure".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(ControlFork),
    );
    registry.register_control(
        Interface {
            name: "async_timeout".to_string(),
            params: vec![
                ParamSpec::required("TIMEOUT", SemanticTag::Float),
                ParamSpec::required("BODY", SemanticTag::Block),
                ParamSpec::optional("ON_TIMEOUT", SemanticTag::Block, Value::Null),
            ],
            return_type: None,
            doc: "runs BODY with a deadline; falls back to ON_TIMEOUT on expiry".to_string(),
            is_reporter: false,
            is_control: true,
            privileged: false,
        },
        Arc::new(AsyncTimeout),
    );
    registry.register_control(
        Interface {
            name: "workflow_call".to_string(),
            params: vec![
                ParamSpec::required("WORKFLOW", SemanticTag::String),
                ParamSpec::optional("INPUTS", SemanticTag::Dict, Value::Null),
            ],
            return_type: Some(SemanticTag::Any),
            doc: "invokes another workflow as a subroutine and yields its return value".to_string(),
            is_reporter: true,
            is_control: true,
            privileged: false,
        },
        Arc::new(WorkflowCall),
    );
}
