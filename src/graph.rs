//! Sprint dependency graph construction.
//!
//! Builds a validated DAG from the flat declaration list the plan document
//! provides. Construction is all-or-nothing: duplicate ids, references to
//! unknown sprints and dependency cycles all fail the build, and no partial
//! graph is ever returned.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::CoordinatorError;
use crate::plan_input::SprintDeclaration;

/// A validated, acyclic sprint dependency graph.
///
/// Ids and dependency sets are kept in lexical order so every traversal of
/// the graph is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct SprintGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

/// Three-color DFS marking: white = unvisited, gray = on the current DFS
/// path, black = fully explored. An edge into a gray node closes a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

impl SprintGraph {
    /// Builds the graph from plan declarations.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::DuplicateSprint`] when an id appears twice
    /// - [`CoordinatorError::UnknownDependency`] when a dependency id is not
    ///   in the declaration set
    /// - [`CoordinatorError::CyclicDependency`] listing the cycle's node
    ///   sequence
    pub fn build(declarations: &[SprintDeclaration]) -> Result<Self, CoordinatorError> {
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for declaration in declarations {
            let deps: BTreeSet<String> = declaration.depends_on.iter().cloned().collect();
            if dependencies.insert(declaration.id.clone(), deps).is_some() {
                return Err(CoordinatorError::DuplicateSprint {
                    sprint_id: declaration.id.clone(),
                });
            }
        }

        for (id, deps) in &dependencies {
            for dep in deps {
                if !dependencies.contains_key(dep) {
                    return Err(CoordinatorError::UnknownDependency {
                        sprint_id: id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        let graph = Self { dependencies };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), CoordinatorError> {
        let mut marks: BTreeMap<&str, Mark> = self
            .dependencies
            .keys()
            .map(|id| (id.as_str(), Mark::White))
            .collect();
        let mut path: Vec<&str> = Vec::new();

        // Roots are visited in lexical order so the reported cycle is the
        // same on every run with the same input.
        for id in self.dependencies.keys() {
            if marks[id.as_str()] == Mark::White {
                self.visit(id, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), CoordinatorError> {
        marks.insert(id, Mark::Gray);
        path.push(id);

        for dep in &self.dependencies[id] {
            match marks[dep.as_str()] {
                Mark::Gray => {
                    let start = path
                        .iter()
                        .position(|node| *node == dep.as_str())
                        .unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|node| (*node).to_string()).collect();
                    cycle.push(dep.clone());
                    return Err(CoordinatorError::CyclicDependency { cycle });
                }
                Mark::White => self.visit(dep, marks, path)?,
                Mark::Black => {}
            }
        }

        path.pop();
        marks.insert(id, Mark::Black);
        Ok(())
    }

    /// Sprint ids in lexical order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    pub fn dependencies_of(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(id)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}
