//! Opcode registry: name → handler, with introspectable interfaces and
//! privileged-slot injection
//!
//! Grounded on `bpmn-lite-core/src/store.rs`'s `ProcessStore` trait-object
//! indirection (an `Arc<dyn Trait>` map the engine is constructed around)
//! and on the `privileged`/`inject` discipline from
//! `original_source/tests/unit/test_privileged_opcodes.py`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{ErrorContext, LexFlowError, Result};
use crate::executor::{BlockRunner, Flow};
use crate::program::Statement;
use crate::runtime::ExecCtx;
use crate::value::{SemanticTag, Value};

/// One declared parameter of an opcode interface.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub tag: SemanticTag,
    pub optional: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, tag: SemanticTag) -> Self {
        ParamSpec {
            name: name.into(),
            tag,
            optional: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, tag: SemanticTag, default: Value) -> Self {
        ParamSpec {
            name: name.into(),
            tag,
            optional: true,
            default: Some(default),
        }
    }
}

/// The structured signature surfaced by introspection (`get_interface`).
#[derive(Clone, Debug)]
pub struct Interface {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub return_type: Option<SemanticTag>,
    pub doc: String,
    pub is_reporter: bool,
    pub is_control: bool,
    pub privileged: bool,
}

impl Interface {
    pub fn is_private(&self) -> bool {
        self.name.starts_with('_')
    }

    fn required_count(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }
}

/// A non-control opcode: receives its inputs already resolved, in the
/// interface's declared parameter order.
#[async_trait]
pub trait SimpleOpcode: Send + Sync {
    async fn call(&self, args: Vec<Value>, ctx: &mut ExecCtx) -> Result<Value>;
}

/// A control-flow opcode: receives the raw `Statement` (so it can inspect
/// `BRANCH` inputs unevaluated) plus a `BlockRunner` to recurse into nested
/// Blocks and to resolve non-branch inputs on demand.
#[async_trait]
pub trait ControlOpcode: Send + Sync {
    async fn call(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)>;
}

#[derive(Clone)]
enum HandlerSlot {
    Simple(Arc<dyn SimpleOpcode>),
    Control(Arc<dyn ControlOpcode>),
    /// A privileged opcode awaiting `inject`.
    Unfilled,
}

struct Registration {
    interface: Interface,
    handler: HandlerSlot,
}

/// Name → handler map. Privileged slots are registered with `register_privileged`
/// and start `Unfilled`; `inject` swaps in the host's implementation.
pub struct OpcodeRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl Default for OpcodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        OpcodeRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_simple(&self, interface: Interface, handler: Arc<dyn SimpleOpcode>) {
        assert!(!interface.is_control, "simple opcode cannot be is_control");
        let privileged = interface.privileged;
        let name = interface.name.clone();
        let slot = if privileged {
            HandlerSlot::Unfilled
        } else {
            HandlerSlot::Simple(handler)
        };
        self.entries.write().unwrap().insert(
            name,
            Registration {
                interface,
                handler: slot,
            },
        );
    }

    pub fn register_control(&self, interface: Interface, handler: Arc<dyn ControlOpcode>) {
        assert!(interface.is_control, "control opcode must set is_control");
        let name = interface.name.clone();
        self.entries.write().unwrap().insert(
            name,
            Registration {
                interface,
                handler: HandlerSlot::Control(handler),
            },
        );
    }

    /// Declare a privileged slot with no implementation; calling it before
    /// `inject` fails with `PrivilegedNotInjected`.
    pub fn register_privileged_placeholder(&self, interface: Interface) {
        assert!(interface.privileged, "placeholder must be privileged");
        let name = interface.name.clone();
        self.entries.write().unwrap().insert(
            name,
            Registration {
                interface,
                handler: HandlerSlot::Unfilled,
            },
        );
    }

    pub fn inject(&self, name: &str, handler: Arc<dyn SimpleOpcode>) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        let reg = entries
            .get_mut(name)
            .ok_or_else(|| LexFlowError::UnknownOpcode {
                name: name.to_string(),
                context: ErrorContext::new(),
            })?;
        if !reg.interface.privileged {
            return Err(LexFlowError::validation(format!(
                "opcode {name} is not privileged; only privileged slots may be injected"
            )));
        }
        reg.handler = HandlerSlot::Simple(handler);
        Ok(())
    }

    pub fn clear_injection(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        let reg = entries
            .get_mut(name)
            .ok_or_else(|| LexFlowError::UnknownOpcode {
                name: name.to_string(),
                context: ErrorContext::new(),
            })?;
        if !reg.interface.privileged {
            return Err(LexFlowError::validation(format!(
                "opcode {name} is not privileged"
            )));
        }
        reg.handler = HandlerSlot::Unfilled;
        Ok(())
    }

    pub fn get_interface(&self, name: &str) -> Option<Interface> {
        self.entries.read().unwrap().get(name).map(|r| r.interface.clone())
    }

    pub fn list_opcodes(&self, include_private: bool) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        let mut names: Vec<String> = entries
            .values()
            .filter(|r| include_private || !r.interface.is_private())
            .map(|r| r.interface.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_control(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap()
            .get(name)
            .map(|r| r.interface.is_control)
            .unwrap_or(false)
    }

    /// Order a resolved name→value map per the interface's declared
    /// parameter order, filling defaults for omitted optionals and checking
    /// arity/type.
    pub fn order_and_check(
        &self,
        name: &str,
        mut resolved: HashMap<String, Value>,
    ) -> Result<Vec<Value>> {
        let entries = self.entries.read().unwrap();
        let reg = entries
            .get(name)
            .ok_or_else(|| LexFlowError::UnknownOpcode {
                name: name.to_string(),
                context: ErrorContext::new(),
            })?;

        let got = resolved.len();
        let required = reg.interface.required_count();
        if got < required {
            return Err(LexFlowError::Arity {
                opcode: name.to_string(),
                expected: required,
                got,
                context: ErrorContext::new(),
            });
        }

        let mut ordered = Vec::with_capacity(reg.interface.params.len());
        for param in &reg.interface.params {
            let value = match resolved.remove(&param.name) {
                Some(v) => v,
                None if param.optional => param
                    .default
                    .clone()
                    .unwrap_or(Value::Null),
                None => {
                    return Err(LexFlowError::MissingParam {
                        name: param.name.clone(),
                        opcode: name.to_string(),
                        context: ErrorContext::new(),
                    })
                }
            };
            if !param.tag.accepts(&value) {
                return Err(LexFlowError::TypeMismatch {
                    opcode: name.to_string(),
                    param: param.name.clone(),
                    expected: param.tag.name().to_string(),
                    got: value.type_name().to_string(),
                    context: ErrorContext::new(),
                });
            }
            ordered.push(value);
        }

        if let Some((leftover, _)) = resolved.into_iter().next() {
            return Err(LexFlowError::UnknownParam {
                name: leftover,
                opcode: name.to_string(),
                context: ErrorContext::new(),
            });
        }

        Ok(ordered)
    }

    pub async fn call_simple(&self, name: &str, args: Vec<Value>, ctx: &mut ExecCtx) -> Result<Value> {
        let handler = {
            let entries = self.entries.read().unwrap();
            let reg = entries
                .get(name)
                .ok_or_else(|| LexFlowError::UnknownOpcode {
                    name: name.to_string(),
                    context: ErrorContext::new(),
                })?;
            match &reg.handler {
                HandlerSlot::Simple(h) => h.clone(),
                HandlerSlot::Unfilled => {
                    return Err(LexFlowError::PrivilegedNotInjected {
                        name: name.to_string(),
                        context: ErrorContext::new(),
                    })
                }
                HandlerSlot::Control(_) => {
                    return Err(LexFlowError::runtime(format!(
                        "opcode {name} is a control opcode; dispatch via call_control"
                    )))
                }
            }
        };
        handler.call(args, ctx).await.map_err(|e| LexFlowError::Opcode {
            opcode: name.to_string(),
            source: Box::new(e),
            context: ErrorContext::new(),
        })
    }

    pub async fn call_control(
        &self,
        statement: &Statement,
        ctx: &mut ExecCtx,
        runner: &Arc<dyn BlockRunner>,
    ) -> Result<(Flow, Option<Value>)> {
        let handler = {
            let entries = self.entries.read().unwrap();
            let reg = entries.get(statement.opcode.as_str()).ok_or_else(|| {
                LexFlowError::UnknownOpcode {
                    name: statement.opcode.clone(),
                    context: ErrorContext::new(),
                }
            })?;
            match &reg.handler {
                HandlerSlot::Control(h) => h.clone(),
                HandlerSlot::Unfilled => {
                    return Err(LexFlowError::PrivilegedNotInjected {
                        name: statement.opcode.clone(),
                        context: ErrorContext::new(),
                    })
                }
                HandlerSlot::Simple(_) => {
                    return Err(LexFlowError::runtime(format!(
                        "opcode {} is not a control opcode",
                        statement.opcode
                    )))
                }
            }
        };
        handler.call(statement, ctx, runner).await
    }
}

/// Process-wide default registry, populated once via
/// `opcodes::builtins::register_all`. Mirrors the source's "decorator
/// registers onto the module-global registry" convention with a
/// deterministic, explicit init instead of import-time side effects.
static DEFAULT_REGISTRY: std::sync::OnceLock<Arc<OpcodeRegistry>> = std::sync::OnceLock::new();

pub fn default_registry() -> Arc<OpcodeRegistry> {
    DEFAULT_REGISTRY
        .get_or_init(|| {
            let registry = Arc::new(OpcodeRegistry::new());
            crate::opcodes::builtins::register_all(&registry);
            registry
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Block, Program, Workflow};
    use crate::tasks::TaskManager;
    use std::collections::HashMap as StdHashMap;

    struct Echo;

    #[async_trait]
    impl SimpleOpcode for Echo {
        async fn call(&self, mut args: Vec<Value>, _ctx: &mut ExecCtx) -> Result<Value> {
            Ok(args.pop().unwrap_or(Value::Null))
        }
    }

    fn echo_interface(privileged: bool) -> Interface {
        Interface {
            name: "test_echo".to_string(),
            params: vec![ParamSpec::required("value", SemanticTag::Any)],
            return_type: Some(SemanticTag::Any),
            doc: "returns its argument".to_string(),
            is_reporter: true,
            is_control: false,
            privileged,
        }
    }

    fn test_ctx() -> ExecCtx {
        let program = Arc::new(Program {
            main: Arc::new(Workflow {
                name: "main".to_string(),
                params: vec![],
                locals: StdHashMap::new(),
                body: Block::default(),
                reporters: StdHashMap::new(),
                trigger: None,
                declared_outputs: vec![],
            }),
            externals: StdHashMap::new(),
        });
        ExecCtx::new(program, Arc::new(TaskManager::new()), 64)
    }

    #[tokio::test]
    async fn dispatch_orders_and_checks_args() {
        let registry = OpcodeRegistry::new();
        registry.register_simple(echo_interface(false), Arc::new(Echo));
        let mut resolved = HashMap::new();
        resolved.insert("value".to_string(), Value::Int(7));
        let args = registry.order_and_check("test_echo", resolved).unwrap();
        let mut ctx = test_ctx();
        let result = registry.call_simple("test_echo", args, &mut ctx).await.unwrap();
        assert_eq!(result, Value::Int(7));
    }

    #[tokio::test]
    async fn missing_required_param_errors() {
        let registry = OpcodeRegistry::new();
        registry.register_simple(echo_interface(false), Arc::new(Echo));
        let err = registry
            .order_and_check("test_echo", HashMap::new())
            .unwrap_err();
        assert!(matches!(err, LexFlowError::Arity { .. }));
    }

    #[tokio::test]
    async fn unexpected_param_errors() {
        let registry = OpcodeRegistry::new();
        registry.register_simple(echo_interface(false), Arc::new(Echo));
        let mut resolved = HashMap::new();
        resolved.insert("value".to_string(), Value::Int(1));
        resolved.insert("bogus".to_string(), Value::Int(2));
        let err = registry.order_and_check("test_echo", resolved).unwrap_err();
        assert!(matches!(err, LexFlowError::UnknownParam { .. }));
    }

    #[tokio::test]
    async fn privileged_opcode_fails_until_injected() {
        let registry = OpcodeRegistry::new();
        registry.register_privileged_placeholder(echo_interface(true));
        let mut ctx = test_ctx();
        let err = registry.call_simple("test_echo", vec![Value::Int(1)], &mut ctx).await;
        assert!(matches!(err, Err(LexFlowError::Opcode { .. }) | Err(LexFlowError::PrivilegedNotInjected { .. })));

        registry.inject("test_echo", Arc::new(Echo)).unwrap();
        let result = registry
            .call_simple("test_echo", vec![Value::Int(9)], &mut ctx)
            .await
            .unwrap();
        assert_eq!(result, Value::Int(9));

        registry.clear_injection("test_echo").unwrap();
        assert!(registry
            .call_simple("test_echo", vec![Value::Int(1)], &mut ctx)
            .await
            .is_err());
    }

    #[test]
    fn list_opcodes_hides_private_by_default() {
        let registry = OpcodeRegistry::new();
        registry.register_simple(echo_interface(false), Arc::new(Echo));
        let mut private_iface = echo_interface(false);
        private_iface.name = "_internal".to_string();
        registry.register_simple(private_iface, Arc::new(Echo));

        assert_eq!(registry.list_opcodes(false), vec!["test_echo".to_string()]);
        let mut all = registry.list_opcodes(true);
        all.sort();
        assert_eq!(all, vec!["_internal".to_string(), "test_echo".to_string()]);
    }
}
