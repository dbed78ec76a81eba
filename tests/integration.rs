//! Integration tests: exercise the full pipeline — YAML text through
//! `Parser::parse_yaml`, executed by `Engine::run` — for scenarios that span
//! multiple opcodes and aren't already covered by the unit tests living
//! alongside each module.
//!
//! Fixture workflows are transcribed from the async-feature test suite
//! (`async_features/test_async_foreach.py`, `test_channels.py`,
//! `test_timeout.py`, `test_background_tasks.py`), same opcode names and
//! shapes, same expected results.

use std::sync::Arc;

use lexflow::{Engine, Parser, Value};

const ASYNC_FOREACH_BASIC: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      total: 0
      items: [1, 2, 3, 4, 5]
    nodes:
      start:
        opcode: workflow_start
        next: async_loop
        inputs: {}
      async_loop:
        opcode: control_async_foreach
        next: return_result
        inputs:
          VAR: { literal: "item" }
          ITERABLE: { variable: items }
          BODY: { branch: add_item }
      add_item:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "total" }
          VALUE: { node: sum_op }
      sum_op:
        opcode: operator_add
        inputs:
          A: { variable: total }
          B: { variable: item }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: total }
"#;

#[tokio::test]
async fn async_foreach_sums_a_list() {
    let program = Arc::new(Parser::parse_yaml(ASYNC_FOREACH_BASIC).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    assert_eq!(result, Some(Value::Int(15)));
}

const ASYNC_FOREACH_DICT: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      keys: []
      data:
        name: Alice
        age: 30
        city: NYC
    nodes:
      start:
        opcode: workflow_start
        next: async_loop
        inputs: {}
      async_loop:
        opcode: control_async_foreach
        next: return_result
        inputs:
          VAR: { literal: "key" }
          ITERABLE: { variable: data }
          BODY: { branch: collect_key }
      collect_key:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "keys" }
          VALUE: { node: append_key }
      append_key:
        opcode: list_append
        inputs:
          LIST: { variable: keys }
          VALUE: { variable: key }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: keys }
"#;

#[tokio::test]
async fn async_foreach_over_dict_collects_keys() {
    let program = Arc::new(Parser::parse_yaml(ASYNC_FOREACH_DICT).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    let Some(Value::List(keys)) = result else {
        panic!("expected a list result");
    };
    let mut names: Vec<String> = keys
        .into_iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["age", "city", "name"]);
}

const CHANNEL_MULTIPLE_VALUES: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      total: 0
      channel: null
    nodes:
      start:
        opcode: workflow_start
        next: create_channel
        inputs: {}
      create_channel:
        opcode: data_set_variable_to
        next: fork_branches
        inputs:
          VARIABLE: { literal: "channel" }
          VALUE: { node: make_channel }
      make_channel:
        opcode: channel_create
        inputs:
          SIZE: { literal: 10 }
      fork_branches:
        opcode: control_fork
        next: return_result
        inputs:
          BRANCH1: { branch: producer }
          BRANCH2: { branch: consumer }
      producer:
        opcode: channel_send
        next: send2
        inputs:
          CHANNEL: { variable: channel }
          VALUE: { literal: 10 }
      send2:
        opcode: channel_send
        next: send3
        inputs:
          CHANNEL: { variable: channel }
          VALUE: { literal: 20 }
      send3:
        opcode: channel_send
        next: close_ch
        inputs:
          CHANNEL: { variable: channel }
          VALUE: { literal: 30 }
      close_ch:
        opcode: channel_close
        next: null
        inputs:
          CHANNEL: { variable: channel }
      consumer:
        opcode: data_set_variable_to
        next: recv2
        inputs:
          VARIABLE: { literal: "total" }
          VALUE: { node: recv1 }
      recv1:
        opcode: channel_receive
        inputs:
          CHANNEL: { variable: channel }
      recv2:
        opcode: data_set_variable_to
        next: recv3
        inputs:
          VARIABLE: { literal: "total" }
          VALUE: { node: add_recv2 }
      add_recv2:
        opcode: operator_add
        inputs:
          A: { variable: total }
          B: { node: recv2_val }
      recv2_val:
        opcode: channel_receive
        inputs:
          CHANNEL: { variable: channel }
      recv3:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "total" }
          VALUE: { node: add_recv3 }
      add_recv3:
        opcode: operator_add
        inputs:
          A: { variable: total }
          B: { node: recv3_val }
      recv3_val:
        opcode: channel_receive
        inputs:
          CHANNEL: { variable: channel }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: total }
"#;

#[tokio::test]
async fn channel_carries_multiple_values_between_forked_branches() {
    let program = Arc::new(Parser::parse_yaml(CHANNEL_MULTIPLE_VALUES).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    assert_eq!(result, Some(Value::Int(60)));
}

const TIMEOUT_COMPLETES: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      result: "not set"
    nodes:
      start:
        opcode: workflow_start
        next: with_timeout
        inputs: {}
      with_timeout:
        opcode: async_timeout
        next: return_result
        inputs:
          TIMEOUT: { literal: 5.0 }
          BODY: { branch: fast_work }
      fast_work:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "result" }
          VALUE: { literal: "completed" }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: result }
"#;

#[tokio::test]
async fn timeout_completes_when_body_finishes_in_time() {
    let program = Arc::new(Parser::parse_yaml(TIMEOUT_COMPLETES).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    assert_eq!(result, Some(Value::Str("completed".to_string())));
}

const TIMEOUT_FALLBACK: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      result: "not set"
    nodes:
      start:
        opcode: workflow_start
        next: with_timeout
        inputs: {}
      with_timeout:
        opcode: async_timeout
        next: return_result
        inputs:
          TIMEOUT: { literal: 0.01 }
          BODY: { branch: slow_work }
          ON_TIMEOUT: { branch: fallback }
      slow_work:
        opcode: task_sleep
        next: set_result
        inputs:
          SECONDS: { literal: 10.0 }
      set_result:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "result" }
          VALUE: { literal: "completed" }
      fallback:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "result" }
          VALUE: { literal: "timed out" }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: result }
"#;

#[tokio::test]
async fn timeout_runs_fallback_branch_when_body_overruns() {
    let program = Arc::new(Parser::parse_yaml(TIMEOUT_FALLBACK).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    assert_eq!(result, Some(Value::Str("timed out".to_string())));
}

const TIMEOUT_RAISES: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      result: "not set"
    nodes:
      start:
        opcode: workflow_start
        next: with_timeout
        inputs: {}
      with_timeout:
        opcode: async_timeout
        next: return_result
        inputs:
          TIMEOUT: { literal: 0.01 }
          BODY: { branch: slow_work }
      slow_work:
        opcode: task_sleep
        next: null
        inputs:
          SECONDS: { literal: 10.0 }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: result }
"#;

#[tokio::test]
async fn timeout_with_no_fallback_propagates_an_error() {
    let program = Arc::new(Parser::parse_yaml(TIMEOUT_RAISES).unwrap());
    let engine = Engine::new(program);
    let err = engine.run(None).await.unwrap_err();
    assert!(matches!(err, lexflow::LexFlowError::TimeoutExceeded { .. }));
}

const SPAWN_BASIC: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      counter: 0
      task_started: false
    nodes:
      start:
        opcode: workflow_start
        next: spawn_task
        inputs: {}
      spawn_task:
        opcode: control_spawn
        next: wait_a_bit
        inputs:
          VAR: { literal: "my_task" }
          BODY: { branch: background_work }
      background_work:
        opcode: data_set_variable_to
        next: bg_increment
        inputs:
          VARIABLE: { literal: "task_started" }
          VALUE: { literal: true }
      bg_increment:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "counter" }
          VALUE: { node: add_to_counter }
      add_to_counter:
        opcode: operator_add
        inputs:
          A: { variable: counter }
          B: { literal: 10 }
      wait_a_bit:
        opcode: task_sleep
        next: check_task
        inputs:
          SECONDS: { literal: 0.05 }
      check_task:
        opcode: data_set_variable_to
        next: return_result
        inputs:
          VARIABLE: { literal: "result" }
          VALUE: { node: check_done }
      check_done:
        opcode: task_is_done
        inputs:
          TASK: { variable: my_task }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: counter }
"#;

#[tokio::test]
async fn spawned_background_task_mutates_shared_scope() {
    let program = Arc::new(Parser::parse_yaml(SPAWN_BASIC).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    assert_eq!(result, Some(Value::Int(10)));
}

const SPAWN_VARIABLE_SHARING: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables:
      shared_value: "initial"
    nodes:
      start:
        opcode: workflow_start
        next: spawn_task
        inputs: {}
      spawn_task:
        opcode: control_spawn
        next: wait
        inputs:
          BODY: { branch: update_shared }
      update_shared:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "shared_value" }
          VALUE: { literal: "updated_by_task" }
      wait:
        opcode: task_sleep
        next: return_value
        inputs:
          SECONDS: { literal: 0.05 }
      return_value:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: shared_value }
"#;

#[tokio::test]
async fn spawned_task_without_a_name_still_shares_scope() {
    let program = Arc::new(Parser::parse_yaml(SPAWN_VARIABLE_SHARING).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    assert_eq!(result, Some(Value::Str("updated_by_task".to_string())));
}

const SPAWN_AWAIT: &str = r#"
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
        next: spawn_task
        inputs: {}
      spawn_task:
        opcode: control_spawn
        next: await_task
        inputs:
          VAR: { literal: "my_task" }
          BODY: { branch: compute_value }
      compute_value:
        opcode: data_set_variable_to
        next: null
        inputs:
          VARIABLE: { literal: "result" }
          VALUE: { literal: 42 }
      await_task:
        opcode: task_await
        next: return_result
        inputs:
          TASK: { variable: my_task }
      return_result:
        opcode: workflow_return
        next: null
        inputs:
          VALUE: { variable: result }
"#;

#[tokio::test]
async fn task_await_waits_for_a_spawned_task_to_finish() {
    let program = Arc::new(Parser::parse_yaml(SPAWN_AWAIT).unwrap());
    let engine = Engine::new(program);
    let result = engine.run(None).await.unwrap();
    assert_eq!(result, Some(Value::Int(42)));
}

const UNKNOWN_INPUT_TAG: &str = r#"
workflows:
  - name: main
    interface:
      inputs: []
      outputs: []
    variables: {}
    nodes:
      start:
        opcode: workflow_start
        next: bad_node
        inputs: {}
      bad_node:
        opcode: noop
        next: null
        inputs:
          X: { bogus_tag: 1 }
"#;

#[test]
fn unknown_input_tag_is_rejected_at_parse_time() {
    let err = Parser::parse_yaml(UNKNOWN_INPUT_TAG).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("bogus_tag"), "unexpected message: {message}");
}
