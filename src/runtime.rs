//! Scope chain, call frames, and the per-task evaluation stack
//!
//! Grounded on `bpmn-lite-core/src/vm.rs`'s `Fiber` (per-fiber `stack` +
//! `pc`) generalized from one flat register file to a chain of scopes —
//! see DESIGN.md's Open Question #4 for why `NODE(id)` resolution bypasses
//! this stack in favor of direct recursive calls, while top-level
//! reporter statements and `workflow_return` still go through it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::channel::Channel;
use crate::error::{ErrorContext, LexFlowError, Result};
use crate::program::Program;
use crate::tasks::TaskManager;
use crate::value::Value;

/// A single workflow's local variables, shared by reference across every
/// task forked or spawned from it (DESIGN.md's Open Question #3: cooperative
/// concurrency means siblings observe each other's writes, not private
/// copies).
pub type ScopeFrame = Arc<Mutex<HashMap<String, Value>>>;

pub fn new_scope() -> ScopeFrame {
    Arc::new(Mutex::new(HashMap::new()))
}

/// One entry in the call stack: which workflow is executing, its scope
/// chain (bottom is the workflow-level scope; control-flow opcodes push
/// inner frames on top for loop variables and the like), and where control
/// returns to.
#[derive(Clone)]
pub struct CallFrame {
    pub workflow_name: String,
    /// Innermost scope last. Name resolution walks this from the end
    /// backwards (inner -> outer); a frame always has at least one entry.
    pub scopes: Vec<ScopeFrame>,
}

/// Everything a single logical task (the main flow, or a forked/spawned
/// branch of it) needs while walking a `Block`.
pub struct ExecCtx {
    pub call_stack: Vec<CallFrame>,
    /// Holds values produced by top-level reporter statements and
    /// `workflow_return`; `NODE(id)` resolution does not use this.
    pub value_stack: Vec<Value>,
    pub tasks: Arc<TaskManager>,
    pub max_call_depth: usize,
    /// Immutable for the lifetime of a run; shared so `workflow_call` can
    /// resolve cross-workflow targets without a separate plumbing path.
    pub program: Arc<Program>,
}

impl ExecCtx {
    pub fn new(program: Arc<Program>, tasks: Arc<TaskManager>, max_call_depth: usize) -> Self {
        let entry_workflow = program.main.name.clone();
        ExecCtx {
            call_stack: vec![CallFrame {
                workflow_name: entry_workflow,
                scopes: vec![new_scope()],
            }],
            value_stack: Vec::new(),
            tasks,
            max_call_depth,
            program,
        }
    }

    /// A child context for a forked/spawned sibling, sharing the calling
    /// frame's scope chain by reference (each level's map is an `Arc`) and
    /// the same task manager, but with a fresh, independent value stack and
    /// its own scope-stack depth — pushing/popping an inner scope in one
    /// sibling does not resize another's.
    pub fn fork(&self) -> ExecCtx {
        ExecCtx {
            call_stack: self.call_stack.clone(),
            value_stack: Vec::new(),
            tasks: self.tasks.clone(),
            max_call_depth: self.max_call_depth,
            program: self.program.clone(),
        }
    }

    pub fn current_frame(&self) -> &CallFrame {
        self.call_stack
            .last()
            .expect("call_stack is never empty while a task is running")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.call_stack
            .last_mut()
            .expect("call_stack is never empty while a task is running")
    }

    /// Walks the current frame's scope chain innermost -> outer.
    pub async fn get_var(&self, name: &str) -> Option<Value> {
        for scope in self.current_frame().scopes.iter().rev() {
            if let Some(value) = scope.lock().await.get(name) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Assigns `name`: writes into the innermost frame that already defines
    /// it, or the current innermost frame if none does.
    pub async fn set_var(&self, name: &str, value: Value) {
        for scope in self.current_frame().scopes.iter().rev() {
            let mut guard = scope.lock().await;
            if guard.contains_key(name) {
                guard.insert(name.to_string(), value);
                return;
            }
        }
        self.innermost_scope()
            .lock()
            .await
            .insert(name.to_string(), value);
    }

    /// Binds `name` directly in the current innermost scope frame,
    /// bypassing `set_var`'s outer-frame search — used for loop variables
    /// right after `push_scope`, so a same-named outer binding is shadowed
    /// rather than overwritten.
    pub async fn declare_var(&self, name: &str, value: Value) {
        self.innermost_scope()
            .lock()
            .await
            .insert(name.to_string(), value);
    }

    fn innermost_scope(&self) -> &ScopeFrame {
        self.current_frame()
            .scopes
            .last()
            .expect("a call frame always has at least one scope")
    }

    /// Pushes a fresh, empty scope frame for a loop/block body to bind its
    /// own variables into without touching the enclosing scope.
    pub fn push_scope(&mut self) {
        self.current_frame_mut().scopes.push(new_scope());
    }

    /// Pops the innermost scope frame, restoring whatever it shadowed. A
    /// no-op if only the workflow-level frame remains.
    pub fn pop_scope(&mut self) {
        let frame = self.current_frame_mut();
        if frame.scopes.len() > 1 {
            frame.scopes.pop();
        }
    }

    pub async fn require_var(&self, name: &str) -> Result<Value> {
        self.get_var(name).await.ok_or_else(|| LexFlowError::UnboundVariable {
            name: name.to_string(),
            context: ErrorContext::new().workflow(self.current_frame().workflow_name.clone()),
        })
    }

    /// Push a new call frame for a `WORKFLOW_CALL`, enforcing the configured
    /// recursion limit.
    pub fn push_call(&mut self, workflow_name: &str, scope: ScopeFrame) -> Result<()> {
        if self.call_stack.len() >= self.max_call_depth {
            return Err(LexFlowError::StackOverflow {
                limit: self.max_call_depth,
                context: ErrorContext::new().workflow(workflow_name.to_string()),
            });
        }
        self.call_stack.push(CallFrame {
            workflow_name: workflow_name.to_string(),
            scopes: vec![scope],
        });
        Ok(())
    }

    pub fn pop_call(&mut self) {
        self.call_stack.pop();
    }

    pub fn push_value(&mut self, value: Value) {
        self.value_stack.push(value);
    }

    pub fn pop_value(&mut self) -> Option<Value> {
        self.value_stack.pop()
    }
}

/// A channel variable's storage is just a `Value::Channel`, but opcodes
/// that need to materialize a brand-new channel go through this helper so
/// the `maxsize` convention (`0` = rendezvous) lives in one place.
pub fn new_channel(maxsize: usize) -> Value {
    Value::Channel(Arc::new(Channel::new(maxsize)))
}
