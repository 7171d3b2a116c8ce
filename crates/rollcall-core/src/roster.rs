//! Roster types and the roster-source seam.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// An enrolled member as supplied by the roster source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterMember {
    /// Stable identity code, unique within one selector's scope.
    pub code: String,
    pub name: String,
    pub contact: String,
    pub reference_image: Option<PathBuf>,
}

/// Which class a session takes attendance for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSelector {
    pub class_name: String,
    pub year: String,
}

impl RosterSelector {
    pub fn new(class_name: impl Into<String>, year: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            year: year.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("no class {class_name:?} in year {year:?}")]
    UnknownSelector { class_name: String, year: String },
    #[error("roster query failed: {0}")]
    Query(String),
}

/// Query-style access to the enrolled roster.
pub trait RosterSource {
    /// Members of the selected class in stable roster order.
    fn members(&self, selector: &RosterSelector) -> Result<Vec<RosterMember>, RosterError>;
}
