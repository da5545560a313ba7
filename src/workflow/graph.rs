/// Task graph validation and ordering
///
/// The validator reports structural problems in a workflow's task list:
/// 1. Task IDs must be unique.
/// 2. Every dependency must reference a task in the same workflow.
/// 3. The dependency graph must be acyclic.
/// 4. Each task type's required configuration keys must be present.
///
/// Checks run in that order and stop after the first category that fails,
/// while collecting every message inside that category.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::workflow::task_config::TaskConfig;
use crate::workflow::types::WorkflowTask;

/// Outcome of validating a task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self { valid: true, errors: Vec::new() }
    }

    fn invalid(errors: Vec<String>) -> Self {
        Self { valid: false, errors }
    }
}

/// Validate the structure of a workflow's tasks
pub fn validate_tasks(tasks: &[WorkflowTask]) -> ValidationResult {
    if tasks.is_empty() {
        return ValidationResult::invalid(vec![
            "workflow must contain at least one task".to_string()
        ]);
    }

    // 1. Unique IDs
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<&str> = HashSet::new();
    let mut errors = Vec::new();
    for task in tasks {
        if !seen.insert(task.id.as_str()) && reported.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
    }
    if !errors.is_empty() {
        return ValidationResult::invalid(errors);
    }

    // 2. Dependencies reference known tasks
    for task in tasks {
        for dep in &task.depends_on {
            if !seen.contains(dep.as_str()) {
                errors.push(format!("task '{}' depends on unknown task '{}'", task.id, dep));
            }
        }
    }
    if !errors.is_empty() {
        return ValidationResult::invalid(errors);
    }

    // 3. No cycles
    errors = find_cycles(tasks);
    if !errors.is_empty() {
        return ValidationResult::invalid(errors);
    }

    // 4. Required per-type configuration
    errors = tasks
        .iter()
        .filter_map(|task| TaskConfig::parse(task).err())
        .collect();
    if !errors.is_empty() {
        return ValidationResult::invalid(errors);
    }

    ValidationResult::ok()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search with a recursion stack; revisiting a node that is still
/// on the stack means a back edge, i.e. a cycle
fn find_cycles(tasks: &[WorkflowTask]) -> Vec<String> {
    let index: HashMap<&str, usize> =
        tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();
    let mut marks = vec![Mark::Unvisited; tasks.len()];
    let mut stack: Vec<usize> = Vec::new();
    let mut errors = Vec::new();

    for start in 0..tasks.len() {
        if marks[start] == Mark::Unvisited {
            visit_for_cycles(start, tasks, &index, &mut marks, &mut stack, &mut errors);
        }
    }

    errors
}

fn visit_for_cycles(
    node: usize,
    tasks: &[WorkflowTask],
    index: &HashMap<&str, usize>,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    errors: &mut Vec<String>,
) {
    marks[node] = Mark::OnStack;
    stack.push(node);

    for dep in &tasks[node].depends_on {
        let Some(&next) = index.get(dep.as_str()) else {
            continue;
        };
        match marks[next] {
            Mark::Unvisited => visit_for_cycles(next, tasks, index, marks, stack, errors),
            Mark::OnStack => {
                let from = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut path: Vec<&str> =
                    stack[from..].iter().map(|&n| tasks[n].id.as_str()).collect();
                path.push(tasks[next].id.as_str());
                errors.push(format!("dependency cycle detected: {}", path.join(" -> ")));
            }
            Mark::Done => {}
        }
    }

    stack.pop();
    marks[node] = Mark::Done;
}

/// Order tasks so each one follows all of its dependencies
///
/// Visits the input in order and emits a task only after its dependencies,
/// so independent tasks keep their declaration order. A task reached again
/// while still on the recursion stack is ignored, which keeps the sort
/// terminating on cyclic input; such input should be rejected by
/// `validate_tasks` first.
pub fn topological_sort(tasks: &[WorkflowTask]) -> Vec<&WorkflowTask> {
    let index: HashMap<&str, usize> =
        tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();
    let mut marks = vec![Mark::Unvisited; tasks.len()];
    let mut sorted = Vec::with_capacity(tasks.len());

    for start in 0..tasks.len() {
        visit_for_order(start, tasks, &index, &mut marks, &mut sorted);
    }

    sorted
}

fn visit_for_order<'a>(
    node: usize,
    tasks: &'a [WorkflowTask],
    index: &HashMap<&str, usize>,
    marks: &mut [Mark],
    sorted: &mut Vec<&'a WorkflowTask>,
) {
    if marks[node] != Mark::Unvisited {
        return;
    }
    marks[node] = Mark::OnStack;

    for dep in &tasks[node].depends_on {
        if let Some(&next) = index.get(dep.as_str()) {
            visit_for_order(next, tasks, index, marks, sorted);
        }
    }

    marks[node] = Mark::Done;
    sorted.push(&tasks[node]);
}
