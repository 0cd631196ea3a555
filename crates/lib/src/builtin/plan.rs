//! JSON build plans.
//!
//! ```json
//! {
//!   "title": "textures",
//!   "steps": [
//!     { "id": "grass", "command": { "type": "builtin.import-file", "source": "grass.png", "location": "content://grass" } },
//!     { "id": "atlas", "after": ["grass"],
//!       "command": { "type": "builtin.concat", "sources": ["content://grass"], "location": "content://atlas" } }
//!   ]
//! }
//! ```
//!
//! Relative file paths resolve against the directory holding the plan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::build::{BuildStep, ListBuildStep, StepGraphError};
use crate::storage::{ObjectUrl, UrlType};

use super::{ConcatCommand, ImportFileCommand};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("failed to read plan {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid plan: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("duplicate step id '{0}'")]
  DuplicateId(String),

  #[error("step '{step}' runs after unknown step '{after}'")]
  UnknownStep { step: String, after: String },

  #[error(transparent)]
  Graph(#[from] StepGraphError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Plan {
  #[serde(default = "default_title")]
  title: String,
  steps: Vec<PlanStep>,
}

fn default_title() -> String {
  "plan".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanStep {
  id: String,
  command: PlanCommand,
  #[serde(default)]
  after: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum PlanCommand {
  #[serde(rename = "builtin.import-file")]
  ImportFile(ImportFileCommand),
  #[serde(rename = "builtin.concat")]
  Concat(ConcatCommand),
}

impl PlanCommand {
  fn into_step(self, base: &Path) -> Arc<BuildStep> {
    match self {
      PlanCommand::ImportFile(mut command) => {
        command.source = resolve_path(base, &command.source);
        BuildStep::command(command)
      }
      PlanCommand::Concat(mut command) => {
        for source in &mut command.sources {
          if source.kind == UrlType::File {
            *source = ObjectUrl::file(resolve_path(base, &source.path));
          }
        }
        BuildStep::command(command)
      }
    }
  }
}

fn resolve_path(base: &Path, path: &str) -> String {
  if Path::new(path).is_absolute() {
    path.to_string()
  } else {
    base.join(path).to_string_lossy().into_owned()
  }
}

/// Load a plan file into a list step.
pub fn load_plan(path: &Path) -> Result<Arc<BuildStep>, PlanError> {
  let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let base = path.parent().unwrap_or_else(|| Path::new("."));
  parse_plan(&text, base)
}

/// Parse plan JSON into a list step, resolving relative paths against `base`.
pub fn parse_plan(text: &str, base: &Path) -> Result<Arc<BuildStep>, PlanError> {
  let plan: Plan = serde_json::from_str(text)?;
  let mut list = ListBuildStep::new();
  let mut by_id: HashMap<String, Arc<BuildStep>> = HashMap::new();
  let mut edges = Vec::new();

  for PlanStep { id, command, after } in plan.steps {
    if by_id.contains_key(&id) {
      return Err(PlanError::DuplicateId(id));
    }
    let step = list.add(command.into_step(base));
    edges.push((id.clone(), after));
    by_id.insert(id, step);
  }

  for (id, after) in edges {
    let dependent = &by_id[&id];
    for prerequisite in after {
      let Some(prerequisite_step) = by_id.get(&prerequisite) else {
        return Err(PlanError::UnknownStep {
          step: id,
          after: prerequisite,
        });
      };
      list.add_dependency(prerequisite_step, dependent)?;
    }
  }

  debug!(title = %plan.title, steps = list.len(), "loaded build plan");
  Ok(BuildStep::list(plan.title, list))
}
