//! Top-level ingestion entry points: `parse_json`/`parse_yaml` turn raw
//! program text into an immutable `Program`.
//!
//! Grounded on `bpmn-lite-core/src/engine.rs`'s `compile` pipeline shape
//! (parse → verify → lower), generalized to two textual front ends since
//! `serde_yaml` is already part of the dependency table this crate's
//! Cargo.toml carries forward.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::dto::ProgramDto;
use crate::compiler::lowering::lower_workflow;
use crate::error::{ErrorContext, LexFlowError, Result};
use crate::program::{Input, Program, Workflow};

pub struct Parser;

impl Parser {
    pub fn parse_json(value: serde_json::Value) -> Result<Program> {
        let dto: ProgramDto = serde_json::from_value(value)
            .map_err(|e| LexFlowError::JsonParse { message: e.to_string() })?;
        Self::assemble(dto)
    }

    pub fn parse_yaml(text: &str) -> Result<Program> {
        let dto: ProgramDto = serde_yaml::from_str(text)
            .map_err(|e| LexFlowError::JsonParse { message: e.to_string() })?;
        Self::assemble(dto)
    }

    fn assemble(dto: ProgramDto) -> Result<Program> {
        let mut workflows: HashMap<String, Arc<Workflow>> = HashMap::new();
        for workflow_dto in &dto.workflows {
            let workflow = lower_workflow(workflow_dto)?;
            workflows.insert(workflow.name.clone(), Arc::new(workflow));
        }

        let main = workflows
            .get("main")
            .cloned()
            .ok_or_else(|| LexFlowError::validation("program has no workflow named \"main\""))?;
        let mut externals = workflows;
        externals.remove("main");

        let program = Program { main, externals };
        check_workflow_calls_resolve(&program)?;
        Ok(program)
    }
}

fn check_workflow_calls_resolve(program: &Program) -> Result<()> {
    let mut all_workflows: Vec<&Arc<Workflow>> = vec![&program.main];
    all_workflows.extend(program.externals.values());

    for workflow in all_workflows {
        check_block_workflow_calls(&workflow.body, program, &workflow.name)?;
        for statement in workflow.reporters.values() {
            for input in statement.inputs.values() {
                if let Input::WorkflowCall(name) = input {
                    require_resolves(name, program, &workflow.name)?;
                }
            }
        }
    }
    Ok(())
}

fn check_block_workflow_calls(
    block: &crate::program::Block,
    program: &Program,
    workflow_name: &str,
) -> Result<()> {
    for statement in block.iter() {
        for input in statement.inputs.values() {
            match input {
                Input::WorkflowCall(name) => require_resolves(name, program, workflow_name)?,
                Input::Branch(nested) => {
                    check_block_workflow_calls(nested, program, workflow_name)?
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn require_resolves(name: &str, program: &Program, workflow_name: &str) -> Result<()> {
    if program.resolve(name).is_none() {
        return Err(LexFlowError::WorkflowValidation {
            message: format!("WORKFLOW_CALL target \"{name}\" does not resolve"),
            context: ErrorContext::new().workflow(workflow_name.to_string()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      result: 0
    nodes:
      start:
        opcode: workflow_start
        next: add
        inputs: {}
      add:
        opcode: data_set_variable_to
        next: ret
        inputs:
          VARIABLE: { literal: "result" }
          VALUE: { node: sum }
      sum:
        opcode: operator_add
        inputs:
          A: { literal: 1 }
          B: { literal: 2 }
      ret:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: result }
"#;

    #[test]
    fn parses_yaml_into_program() {
        let program = Parser::parse_yaml(SIMPLE).unwrap();
        assert_eq!(program.main.name, "main");
        assert_eq!(program.main.body.iter().count(), 3);
    }

    #[test]
    fn missing_main_workflow_errors() {
        let no_main = SIMPLE.replace("name: main", "name: not_main");
        assert!(Parser::parse_yaml(&no_main).is_err());
    }

    #[test]
    fn unresolved_workflow_call_errors() {
        let dangling_call = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables: {}
    nodes:
      start:
        opcode: workflow_start
        next: call
        inputs: {}
      call:
        opcode: workflow_call
        next: null
        inputs:
          WORKFLOW: { workflow_call: "missing_workflow" }
"#;
        assert!(Parser::parse_yaml(dangling_call).is_err());
    }
}
