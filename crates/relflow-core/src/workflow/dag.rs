//! Dependency graph checks and parallel wave computation.
//!
//! Uses `petgraph` to model step dependencies as a directed graph. Topological
//! sort detects cycles, and depth-based grouping produces the waves in which
//! steps become runnable when every execution succeeds.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::definition::{Definition, StepKind, WorkflowError};

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// Directed graph with an edge from each dependency to its dependent.
fn build_graph(def: &Definition) -> Result<DiGraph<&str, ()>, WorkflowError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, _> = def
        .steps
        .keys()
        .map(|name| (name.as_str(), graph.add_node(name.as_str())))
        .collect();

    for (name, step) in &def.steps {
        for dep in step.dependencies() {
            let from = indices.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!("step '{name}' depends on unknown step '{dep}'"))
            })?;
            graph.add_edge(*from, indices[name.as_str()], ());
        }
    }
    Ok(graph)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that every reference resolves and the steps form a DAG.
pub fn validate_graph(def: &Definition) -> Result<(), WorkflowError> {
    for (output, value) in &def.outputs {
        if let Some(dep) = value.dependencies().into_iter().find(|d| !def.steps.contains_key(d)) {
            return Err(WorkflowError::UnknownDependency(format!(
                "output '{output}' depends on unknown step '{dep}'"
            )));
        }
    }

    let graph = build_graph(def)?;
    toposort(&graph, None).map_err(|cycle| {
        let node = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("cycle detected involving step '{node}'"))
    })?;
    Ok(())
}

/// Non-expansion steps that no other step, ordering edge, or output refers to.
///
/// Expansions are exempt: their effect is the steps they register.
pub fn unreferenced_steps(def: &Definition) -> Vec<&str> {
    let mut referenced: BTreeSet<String> = def.steps.values().flat_map(|s| s.dependencies()).collect();
    referenced.extend(def.outputs.values().flat_map(|v| v.dependencies()));

    def.steps
        .values()
        .filter(|s| s.kind != StepKind::Expansion && !referenced.contains(&s.name))
        .map(|s| s.name.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Execution waves
// ---------------------------------------------------------------------------

/// Group step names into waves of concurrently runnable steps.
///
/// Index 0 holds the steps without dependencies; each later wave depends
/// only on earlier ones. Names inside a wave are sorted.
pub fn execution_waves(def: &Definition) -> Result<Vec<Vec<&str>>, WorkflowError> {
    if def.steps.is_empty() {
        return Ok(vec![]);
    }

    let graph = build_graph(def)?;
    let sorted = toposort(&graph, None).map_err(|cycle| {
        let node = graph[cycle.node_id()];
        WorkflowError::CycleDetected(format!("cycle detected involving step '{node}'"))
    })?;

    // Root nodes have depth 0
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let name = graph[node];
        let depth = def.steps[name]
            .dependencies()
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(name, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&str>> = vec![vec![]; max_depth + 1];
    for name in def.steps.keys() {
        waves[depths[name.as_str()]].push(name.as_str());
    }
    Ok(waves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use futures_util::future::BoxFuture;
    use serde_json::Value as Json;

    use super::*;
    use crate::workflow::codec::EncodedResult;
    use crate::workflow::context::TaskContext;
    use crate::workflow::step_runner::StepError;
    use crate::workflow::definition::{Builder, StepDefinition, StepFn};
    use crate::workflow::value::{ValueType, constant};

    async fn double(_ctx: TaskContext, n: i64) -> anyhow::Result<i64> {
        Ok(n * 2)
    }

    async fn sum(_ctx: TaskContext, a: i64, b: i64) -> anyhow::Result<i64> {
        Ok(a + b)
    }

    /// A step whose only dependencies are ordering edges. Never executed.
    fn raw_step(name: &str, after: &[&str]) -> Arc<StepDefinition> {
        Arc::new(StepDefinition {
            name: name.to_string(),
            namespace: String::new(),
            kind: StepKind::Action,
            inputs: vec![],
            after: after.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            func: StepFn::Task(Arc::new(
                |_: TaskContext, _: Vec<Json>| -> BoxFuture<'static, Result<EncodedResult, StepError>> {
                    Box::pin(async { Err(StepError::Failed(anyhow::anyhow!("graph-only step"))) })
                },
            )),
            output_type: ValueType::of::<()>(),
        })
    }

    fn raw_definition(steps: &[(&str, &[&str])]) -> Definition {
        let mut def = Definition::new();
        for (name, after) in steps {
            def.steps.insert(name.to_string(), raw_step(name, after));
        }
        def
    }

    #[test]
    fn diamond_produces_three_waves() {
        let mut wd = Definition::new();
        let seed = wd.task1("seed", double, &constant(1));
        let left = wd.task1("left", double, &seed);
        let right = wd.task1("right", double, &seed);
        let total = wd.task2("total", sum, &left, &right);
        wd.output("total", &total);

        let waves = execution_waves(&wd).unwrap();
        assert_eq!(waves, vec![vec!["seed"], vec!["left", "right"], vec!["total"]]);
    }

    #[test]
    fn empty_definition_has_no_waves() {
        assert!(execution_waves(&Definition::new()).unwrap().is_empty());
    }

    #[test]
    fn valid_definition_passes() {
        let mut wd = Definition::new();
        let seed = wd.task1("seed", double, &constant(1));
        wd.output("seed", &seed);
        validate_graph(&wd).unwrap();
        assert!(unreferenced_steps(&wd).is_empty());
    }

    #[test]
    fn cycle_is_rejected() {
        let def = raw_definition(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        let err = validate_graph(&def).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)), "{err}");
        assert!(execution_waves(&def).is_err());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let def = raw_definition(&[("a", &["a"])]);
        assert!(matches!(validate_graph(&def), Err(WorkflowError::CycleDetected(_))));
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let def = raw_definition(&[("a", &["ghost"])]);
        let err = validate_graph(&def).unwrap_err();
        match err {
            WorkflowError::UnknownDependency(msg) => assert!(msg.contains("ghost"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unreferenced_steps_skip_ordering_targets() {
        let def = raw_definition(&[("a", &[]), ("b", &["a"]), ("c", &[])]);
        assert_eq!(unreferenced_steps(&def), vec!["b", "c"]);
    }

    #[test]
    fn expansions_are_never_unreferenced() {
        let mut def = raw_definition(&[]);
        let mut step = Arc::try_unwrap(raw_step("grow", &[])).unwrap();
        step.kind = StepKind::Expansion;
        def.steps.insert("grow".to_string(), Arc::new(step));
        assert!(unreferenced_steps(&def).is_empty());
    }
}
