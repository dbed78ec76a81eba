//! Node graph → linear `Block` + reporter map.
//!
//! Grounded on `bpmn-lite-core/src/compiler/lowering.rs`'s topological walk
//! assigning addresses to an ordered node list, generalized from a flat
//! bytecode array to a (possibly nested) `Block`: here the "addresses" are
//! just Block positions, and `BRANCH` targets recurse into their own nested
//! walk instead of being patched as jump offsets. `petgraph` provides the
//! cycle check on each node's `next`-chain that the original Python
//! implementation gets for free from list-like traversal with a visited
//! set — cyclic `next` chains have no representation in this crate's
//! `Block` form and must fail to load instead of looping forever.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use crate::compiler::dto::{NodeDto, WorkflowDto};
use crate::compiler::preprocessor::{normalize_inputs, NormalizedInput};
use crate::error::{ErrorContext, LexFlowError, Result};
use crate::program::{Block, Input, NodeId, ReporterMap, Statement, Workflow};
use crate::value::Value;

/// Lower one workflow DTO into its immutable, already-linearized form.
pub fn lower_workflow(dto: &WorkflowDto) -> Result<Workflow> {
    let ctx = ErrorContext::new().workflow(dto.name.clone());

    let start_id = dto
        .nodes
        .iter()
        .filter(|(_, n)| n.opcode == "workflow_start")
        .map(|(id, _)| id.clone())
        .collect::<Vec<_>>();
    let start_id = match start_id.as_slice() {
        [single] => single.clone(),
        [] => {
            return Err(LexFlowError::WorkflowValidation {
                message: "workflow has no workflow_start node".to_string(),
                context: ctx,
            })
        }
        _ => {
            return Err(LexFlowError::WorkflowValidation {
                message: format!(
                    "workflow has {} workflow_start nodes, expected exactly one",
                    start_id.len()
                ),
                context: ctx,
            })
        }
    };

    check_acyclic(&dto.nodes, &dto.name)?;

    let mut chained: HashSet<NodeId> = HashSet::new();
    let body = lower_chain(&start_id, dto, &mut chained)?;

    let mut reporters: ReporterMap = HashMap::new();
    for (id, node) in &dto.nodes {
        if chained.contains(id) {
            continue;
        }
        reporters.insert(id.clone(), build_statement(id, node, dto)?);
    }

    check_node_refs_resolve(&body, &reporters, &dto.name)?;
    for statement in reporters.values() {
        check_statement_node_refs(statement, &reporters, &dto.name)?;
    }

    let locals: HashMap<String, Value> = dto
        .variables
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.clone())))
        .collect();

    Ok(Workflow {
        name: dto.name.clone(),
        params: dto.interface.inputs.clone(),
        locals,
        body,
        reporters,
        trigger: dto.trigger.clone(),
        declared_outputs: dto.interface.outputs.clone(),
    })
}

/// Follow `next` pointers from `start_id`, building a flat statement list;
/// recursively lowers any `BRANCH` input encountered along the way into its
/// own nested `Block`. Every id visited (by this call or any nested branch
/// walk) is recorded in `chained` so the caller can tell statements from
/// reporters once the whole workflow has been walked.
fn lower_chain(start_id: &str, dto: &WorkflowDto, chained: &mut HashSet<NodeId>) -> Result<Block> {
    let mut statements = Vec::new();
    let mut cursor = Some(start_id.to_string());
    let mut visited_here = HashSet::new();

    while let Some(id) = cursor {
        if !visited_here.insert(id.clone()) {
            return Err(LexFlowError::WorkflowValidation {
                message: format!("next-chain revisits node {id}, forming a cycle"),
                context: ErrorContext::new().workflow(dto.name.clone()).node(id),
            });
        }

        let node = dto.nodes.get(&id).ok_or_else(|| LexFlowError::WorkflowValidation {
            message: format!("dangling next reference to unknown node {id}"),
            context: ErrorContext::new().workflow(dto.name.clone()),
        })?;

        // A node flagged isReporter is excluded from the linear Block even
        // when a next-chain happens to run through it; it is left out of
        // `chained` so the caller's reporter-map pass picks it up, and
        // `build_statement` re-lowers its inputs independently when a
        // NODE(id) reference resolves it.
        if node.is_reporter {
            cursor = node.next.clone();
            continue;
        }

        chained.insert(id.clone());
        let inputs = lower_inputs(&id, node, dto, chained)?;
        statements.push(Statement {
            opcode: node.opcode.clone(),
            inputs,
            node_id: id.clone(),
        });

        cursor = node.next.clone();
    }

    Ok(Block::new(statements))
}

/// Build a single reporter's `Statement` without walking its `next` — the
/// spec's reporter map holds one statement per id, re-evaluated at each
/// `NODE(id)` reference rather than advancing a chain.
fn build_statement(id: &str, node: &NodeDto, dto: &WorkflowDto) -> Result<Statement> {
    let mut chained = HashSet::new();
    let inputs = lower_inputs(id, node, dto, &mut chained)?;
    Ok(Statement {
        opcode: node.opcode.clone(),
        inputs,
        node_id: id.to_string(),
    })
}

fn lower_inputs(
    node_id: &str,
    node: &NodeDto,
    dto: &WorkflowDto,
    chained: &mut HashSet<NodeId>,
) -> Result<HashMap<String, Input>> {
    let normalized = normalize_inputs(&node.inputs)?;
    let mut out = HashMap::new();
    for (name, n) in normalized {
        out.insert(name, lower_one_input(node_id, &n, dto, chained)?);
    }
    Ok(out)
}

fn lower_one_input(
    node_id: &str,
    n: &NormalizedInput,
    dto: &WorkflowDto,
    chained: &mut HashSet<NodeId>,
) -> Result<Input> {
    match n.tag {
        1 => Ok(Input::Literal(Value::from(n.data.clone()))),
        2 => Ok(Input::Node(expect_string(node_id, &n.data, dto)?)),
        3 => Ok(Input::Variable(expect_string(node_id, &n.data, dto)?)),
        4 => {
            let target = expect_string(node_id, &n.data, dto)?;
            let block = lower_chain(&target, dto, chained)?;
            Ok(Input::Branch(block))
        }
        5 => Ok(Input::WorkflowCall(expect_string(node_id, &n.data, dto)?)),
        other => Err(LexFlowError::WorkflowValidation {
            message: format!(
                "unknown normalized input tag {other}. Valid input types are: \
                 \"literal\", \"node\", \"variable\", \"branch\", \"workflow_call\""
            ),
            context: ErrorContext::new()
                .workflow(dto.name.clone())
                .node(node_id.to_string()),
        }),
    }
}

fn expect_string(node_id: &str, v: &serde_json::Value, dto: &WorkflowDto) -> Result<String> {
    v.as_str().map(str::to_string).ok_or_else(|| LexFlowError::WorkflowValidation {
        message: format!("expected a string id/name, got {v}"),
        context: ErrorContext::new()
            .workflow(dto.name.clone())
            .node(node_id.to_string()),
    })
}

fn check_acyclic(nodes: &HashMap<NodeId, NodeDto>, workflow_name: &str) -> Result<()> {
    let mut graph = DiGraph::<(), ()>::new();
    let mut index = HashMap::new();
    for id in nodes.keys() {
        index.insert(id.clone(), graph.add_node(()));
    }
    for (id, node) in nodes {
        if let Some(next) = &node.next {
            if let (Some(&from), Some(&to)) = (index.get(id), index.get(next)) {
                graph.add_edge(from, to, ());
            }
        }
    }
    if is_cyclic_directed(&graph) {
        return Err(LexFlowError::WorkflowValidation {
            message: "node graph's next-pointers form a cycle".to_string(),
            context: ErrorContext::new().workflow(workflow_name.to_string()),
        });
    }
    Ok(())
}

fn check_node_refs_resolve(block: &Block, reporters: &ReporterMap, workflow_name: &str) -> Result<()> {
    for statement in block.iter() {
        check_statement_node_refs(statement, reporters, workflow_name)?;
    }
    Ok(())
}

fn check_statement_node_refs(
    statement: &Statement,
    reporters: &ReporterMap,
    workflow_name: &str,
) -> Result<()> {
    for input in statement.inputs.values() {
        match input {
            Input::Node(id) if !reporters.contains_key(id) => {
                return Err(LexFlowError::WorkflowValidation {
                    message: format!("NODE({id}) does not resolve to a reporter"),
                    context: ErrorContext::new()
                        .workflow(workflow_name.to_string())
                        .node(statement.node_id.clone()),
                });
            }
            Input::Branch(nested) => check_node_refs_resolve(nested, reporters, workflow_name)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(opcode: &str, next: Option<&str>, inputs: serde_json::Value) -> NodeDto {
        NodeDto {
            opcode: opcode.to_string(),
            next: next.map(str::to_string),
            inputs: serde_json::from_value(inputs).unwrap(),
            is_reporter: false,
        }
    }

    fn reporter_node(opcode: &str, next: Option<&str>, inputs: serde_json::Value) -> NodeDto {
        NodeDto {
            is_reporter: true,
            ..node(opcode, next, inputs)
        }
    }

    #[test]
    fn lowers_a_linear_chain_and_reporter() {
        let mut nodes = HashMap::new();
        nodes.insert("start".to_string(), node("workflow_start", Some("set"), json!({})));
        nodes.insert(
            "set".to_string(),
            node(
                "data_set_variable_to",
                None,
                json!({"VARIABLE": {"literal": "sum"}, "VALUE": {"node": "add"}}),
            ),
        );
        nodes.insert(
            "add".to_string(),
            node("operator_add", None, json!({"A": {"literal": 1}, "B": {"literal": 2}})),
        );

        let dto = WorkflowDto {
            name: "main".to_string(),
            trigger: None,
            interface: Default::default(),
            variables: HashMap::new(),
            nodes,
        };

        let workflow = lower_workflow(&dto).unwrap();
        assert_eq!(workflow.body.iter().count(), 2);
        assert_eq!(workflow.body.iter().next().unwrap().opcode, "workflow_start");
        assert!(workflow.reporters.contains_key("add"));
        assert!(!workflow.reporters.contains_key("set"));
    }

    #[test]
    fn is_reporter_flag_excludes_a_chained_node_from_the_block() {
        let mut nodes = HashMap::new();
        nodes.insert("start".to_string(), node("workflow_start", Some("mid"), json!({})));
        nodes.insert("mid".to_string(), reporter_node("noop", Some("end"), json!({})));
        nodes.insert("end".to_string(), node("noop", None, json!({})));

        let dto = WorkflowDto {
            name: "main".to_string(),
            trigger: None,
            interface: Default::default(),
            variables: HashMap::new(),
            nodes,
        };

        let workflow = lower_workflow(&dto).unwrap();
        assert_eq!(workflow.body.iter().count(), 2);
        assert!(workflow.body.iter().all(|s| s.node_id != "mid"));
        assert!(workflow.reporters.contains_key("mid"));
    }

    #[test]
    fn missing_workflow_start_fails() {
        let mut nodes = HashMap::new();
        nodes.insert("only".to_string(), node("noop", None, json!({})));
        let dto = WorkflowDto {
            name: "main".to_string(),
            trigger: None,
            interface: Default::default(),
            variables: HashMap::new(),
            nodes,
        };
        assert!(lower_workflow(&dto).is_err());
    }

    #[test]
    fn dangling_node_ref_fails() {
        let mut nodes = HashMap::new();
        nodes.insert("start".to_string(), node("workflow_start", None, json!({})));
        nodes.get_mut("start").unwrap().inputs =
            serde_json::from_value(json!({"X": {"node": "nowhere"}})).unwrap();
        let dto = WorkflowDto {
            name: "main".to_string(),
            trigger: None,
            interface: Default::default(),
            variables: HashMap::new(),
            nodes,
        };
        assert!(lower_workflow(&dto).is_err());
    }

    #[test]
    fn branch_input_lowers_to_nested_block() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "start".to_string(),
            node("workflow_start", Some("cond"), json!({})),
        );
        nodes.insert(
            "cond".to_string(),
            node(
                "control_if",
                None,
                json!({"CONDITION": {"literal": true}, "THEN": {"branch": "then_body"}}),
            ),
        );
        nodes.insert(
            "then_body".to_string(),
            node("noop", None, json!({})),
        );

        let dto = WorkflowDto {
            name: "main".to_string(),
            trigger: None,
            interface: Default::default(),
            variables: HashMap::new(),
            nodes,
        };

        let workflow = lower_workflow(&dto).unwrap();
        let cond = workflow.body.iter().nth(1).unwrap();
        match cond.input("THEN").unwrap() {
            Input::Branch(b) => assert_eq!(b.iter().count(), 1),
            other => panic!("expected Branch, got {other:?}"),
        }
    }
}
