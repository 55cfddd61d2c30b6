use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::SourceError;

/// Primary key shared by every Primetric collection
pub const PRIMARY_KEY: &str = "uuid";

/// The collections this source extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Assignments,
    Employees,
    Projects,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Assignments, Resource::Employees, Resource::Projects];

    /// Path segment under the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Assignments => "assignments",
            Resource::Employees => "employees",
            Resource::Projects => "projects",
        }
    }

    /// Stream name
    pub fn name(&self) -> &'static str {
        self.path()
    }

    pub fn primary_key(&self) -> &'static str {
        PRIMARY_KEY
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                SourceError::Config(format!(
                    "Unknown stream '{}'. Expected one of: assignments, employees, projects",
                    s
                ))
            })
    }
}
