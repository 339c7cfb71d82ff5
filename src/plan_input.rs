//! The plan-document boundary.
//!
//! An external planning step produces the sprint list; this module only
//! deserializes it into validated declarations. The coordinator never
//! parses prose - a plan document here is already structured data.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::instance::Sprint;

/// One sprint as declared by the plan document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SprintDeclaration {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub estimated_hours: f64,
    /// Contract ids this sprint produces for later layers.
    #[serde(default)]
    pub produces: Vec<String>,
    /// Contract ids this sprint consumes from earlier layers.
    #[serde(default)]
    pub consumes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanDocument {
    sprints: Vec<SprintDeclaration>,
}

/// Loads sprint declarations from a YAML or JSON plan document.
///
/// # Errors
///
/// Returns an error if the file cannot be read, has an unsupported
/// extension, or does not parse as a plan document.
pub fn load_sprint_declarations(path: &Path) -> Result<Vec<SprintDeclaration>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan document: {}", path.display()))?;

    let document: PlanDocument = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML plan document: {}", path.display()))?,
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON plan document: {}", path.display()))?,
        other => bail!(
            "unsupported plan document extension {:?} for {} (expected .yaml, .yml or .json)",
            other.unwrap_or(""),
            path.display()
        ),
    };

    Ok(document.sprints)
}

impl From<&Sprint> for SprintDeclaration {
    fn from(sprint: &Sprint) -> Self {
        Self {
            id: sprint.id.clone(),
            depends_on: sprint.dependencies.iter().cloned().collect(),
            estimated_hours: sprint.estimated_hours,
            produces: sprint.contracts_produced.iter().cloned().collect(),
            consumes: sprint.contracts_consumed.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_yaml_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "sprints:\n  - id: S01\n    estimated_hours: 6\n    produces: [api-schema]\n  - id: S02\n    depends_on: [S01]\n    consumes: [api-schema]"
        )
        .unwrap();

        let declarations = load_sprint_declarations(&path).unwrap();
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[0].id, "S01");
        assert_eq!(declarations[0].produces, vec!["api-schema".to_string()]);
        assert!(declarations[0].depends_on.is_empty());
        assert_eq!(declarations[1].depends_on, vec!["S01".to_string()]);
    }

    #[test]
    fn test_load_json_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"sprints": [{"id": "S01"}, {"id": "S02", "depends_on": ["S01"]}]}"#,
        )
        .unwrap();

        let declarations = load_sprint_declarations(&path).unwrap();
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[1].id, "S02");
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(&path, "sprints:\n  - id: S01\n    branch: feature/s01\n").unwrap();

        assert!(load_sprint_declarations(&path).is_err());
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.md");
        std::fs::write(&path, "# Sprints\n").unwrap();

        assert!(load_sprint_declarations(&path).is_err());
    }

    #[test]
    fn test_declaration_from_sprint_round_trips() {
        use crate::instance::SprintStatus;

        let sprint = Sprint {
            id: "S07".to_string(),
            dependencies: ["S01".to_string(), "S02".to_string()].into_iter().collect(),
            estimated_hours: 12.5,
            status: SprintStatus::Completed,
            layer_index: Some(2),
            contracts_produced: ["events-v1".to_string()].into_iter().collect(),
            contracts_consumed: ["api-schema".to_string()].into_iter().collect(),
        };

        let declaration = SprintDeclaration::from(&sprint);
        assert_eq!(declaration.id, "S07");
        assert_eq!(declaration.depends_on, vec!["S01".to_string(), "S02".to_string()]);
        assert_eq!(declaration.produces, vec!["events-v1".to_string()]);
        assert_eq!(declaration.consumes, vec!["api-schema".to_string()]);
    }
}
