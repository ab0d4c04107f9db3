//! Step dependency graph.
//!
//! Built once from the step catalog before anything executes. Construction
//! validates that every `dependsOn` names a known step and that the edges
//! form a DAG; either failure is a fatal configuration error. The executor
//! clones the graph into a working copy and removes nodes as they are
//! dispatched, so a "leaf" is always a node whose remaining in-graph
//! dependencies are empty.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::errors::{IntegrationError, IntegrationResult};
use crate::types::IntegrationStep;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// step id → remaining in-graph dependencies
    dependencies: HashMap<String, BTreeSet<String>>,
    /// step id → in-graph dependents
    dependents: HashMap<String, BTreeSet<String>>,
    /// Topological enumeration computed at construction; stable for the
    /// lifetime of the run.
    topological_order: Vec<String>,
}

impl DependencyGraph {
    pub fn from_steps(steps: &[IntegrationStep]) -> IntegrationResult<Self> {
        let mut dependencies: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut dependents: HashMap<String, BTreeSet<String>> = HashMap::new();

        for step in steps {
            if dependencies
                .insert(step.id.clone(), BTreeSet::new())
                .is_some()
            {
                return Err(IntegrationError::Configuration(format!(
                    "Duplicate step id '{}'",
                    step.id
                )));
            }
            dependents.entry(step.id.clone()).or_default();
        }

        for step in steps {
            for dependency in &step.depends_on {
                if !dependencies.contains_key(dependency) {
                    return Err(IntegrationError::Configuration(format!(
                        "Step '{}' depends on unknown step '{}'",
                        step.id, dependency
                    )));
                }
                dependencies
                    .entry(step.id.clone())
                    .or_default()
                    .insert(dependency.clone());
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(step.id.clone());
            }
        }

        let topological_order = topological_sort(steps, &dependencies)?;

        Ok(Self {
            dependencies,
            dependents,
            topological_order,
        })
    }

    /// The overall topological enumeration computed at construction.
    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    /// Nodes with no remaining in-graph dependencies, in topological
    /// enumeration order.
    pub fn ready_leaves(&self) -> Vec<String> {
        self.topological_order
            .iter()
            .filter(|id| {
                self.dependencies
                    .get(*id)
                    .is_some_and(|deps| deps.is_empty())
            })
            .cloned()
            .collect()
    }

    /// Remove a node, detaching it from its dependents' dependency sets.
    pub fn remove(&mut self, step_id: &str) {
        if self.dependencies.remove(step_id).is_none() {
            return;
        }
        if let Some(dependents) = self.dependents.remove(step_id) {
            for dependent in dependents {
                if let Some(deps) = self.dependencies.get_mut(&dependent) {
                    deps.remove(step_id);
                }
            }
        }
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.dependencies.contains_key(step_id)
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }
}

/// Kahn's algorithm. Iteration follows catalog declaration order so the
/// enumeration is stable across runs; leftover nodes mean a cycle.
fn topological_sort(
    steps: &[IntegrationStep],
    dependencies: &HashMap<String, BTreeSet<String>>,
) -> IntegrationResult<Vec<String>> {
    let mut remaining: HashMap<String, usize> = dependencies
        .iter()
        .map(|(id, deps)| (id.clone(), deps.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dependency in &step.depends_on {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = steps
        .iter()
        .filter(|step| remaining.get(&step.id) == Some(&0))
        .map(|step| step.id.as_str())
        .collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(*dependent) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if order.len() != steps.len() {
        let cycle_members: Vec<&String> = steps
            .iter()
            .map(|step| &step.id)
            .filter(|id| !order.contains(id))
            .collect();
        return Err(IntegrationError::Configuration(format!(
            "Step dependencies contain a cycle involving: {cycle_members:?}"
        )));
    }

    Ok(order)
}
