//! The interpreter's error taxonomy, realized as one `thiserror` enum so
//! host code can match on variants instead of parsing strings.

use thiserror::Error;

/// Crate-wide result alias, mirroring the `DslEditResult<T>` convention
/// used elsewhere in this codebase.
pub type Result<T> = std::result::Result<T, LexFlowError>;

/// Where in the pipeline an error originated, attached to variants whose
/// spec wording calls for `component`/`workflow`/`node_id` context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub component: Option<String>,
    pub workflow: Option<String>,
    pub node_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(c) = &self.component {
            parts.push(format!("component={c}"));
        }
        if let Some(w) = &self.workflow {
            parts.push(format!("workflow={w}"));
        }
        if let Some(n) = &self.node_id {
            parts.push(format!("node={n}"));
        }
        if parts.is_empty() {
            Ok(())
        } else {
            write!(f, " [{}]", parts.join(", "))
        }
    }
}

#[derive(Debug, Error)]
pub enum LexFlowError {
    #[error("workflow validation failed: {message}{context}")]
    WorkflowValidation {
        message: String,
        context: ErrorContext,
    },

    #[error("failed to parse program: {message}")]
    JsonParse { message: String },

    #[error("workflow not found: {name}{context}")]
    WorkflowNotFound { name: String, context: ErrorContext },

    #[error("unknown opcode: {name}{context}")]
    UnknownOpcode { name: String, context: ErrorContext },

    #[error("arity error calling {opcode}: expected at least {expected}, got {got}{context}")]
    Arity {
        opcode: String,
        expected: usize,
        got: usize,
        context: ErrorContext,
    },

    #[error("type mismatch calling {opcode} for parameter {param}: expected {expected}, got {got}{context}")]
    TypeMismatch {
        opcode: String,
        param: String,
        expected: String,
        got: String,
        context: ErrorContext,
    },

    #[error("unbound variable: {name}{context}")]
    UnboundVariable { name: String, context: ErrorContext },

    #[error("privileged opcode {name} requires injection before it can be called{context}")]
    PrivilegedNotInjected { name: String, context: ErrorContext },

    #[error("call stack overflow: depth exceeded {limit}{context}")]
    StackOverflow { limit: usize, context: ErrorContext },

    #[error("operation timed out after {seconds}s{context}")]
    TimeoutExceeded { seconds: f64, context: ErrorContext },

    #[error("cancelled{context}")]
    Cancelled { context: ErrorContext },

    #[error("send on closed channel{context}")]
    SendOnClosed { context: ErrorContext },

    #[error("opcode {opcode} raised: {source}{context}")]
    Opcode {
        opcode: String,
        #[source]
        source: Box<LexFlowError>,
        context: ErrorContext,
    },

    #[error("unexpected parameter {name} for {opcode}{context}")]
    UnknownParam {
        name: String,
        opcode: String,
        context: ErrorContext,
    },

    #[error("missing required parameter {name} for {opcode}{context}")]
    MissingParam {
        name: String,
        opcode: String,
        context: ErrorContext,
    },

    #[error("runtime error: {message}{context}")]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

impl LexFlowError {
    pub fn validation(message: impl Into<String>) -> Self {
        LexFlowError::WorkflowValidation {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn validation_ctx(message: impl Into<String>, context: ErrorContext) -> Self {
        LexFlowError::WorkflowValidation {
            message: message.into(),
            context,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        LexFlowError::Runtime {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// The five valid surface-form input tags, for error messages that must
    /// enumerate them; mirrors `original_source/core/preprocessor.py`.
    pub const VALID_INPUT_TAGS: [&'static str; 5] =
        ["literal", "node", "variable", "branch", "workflow_call"];

    pub fn unknown_input_tag(tag: &str) -> Self {
        let valid = Self::VALID_INPUT_TAGS
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(", ");
        LexFlowError::validation(format!(
            "Unknown input type \"{tag}\". Valid input types are: {valid}. \
             Example: [\"literal\", \"value\"] or [\"variable\", \"var_name\"]"
        ))
    }
}
