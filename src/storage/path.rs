//! Logical database addressing.
//!
//! A database is named `projects/{project}/instances/{instance}/databases/{database}`
//! and lives at `{root}/{project}/{instance}/{database}.db` on disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::error::Error;

/// Maximum length of a single identifier component.
const MAX_ID_LEN: usize = 64;

/// Project/instance/database triple identifying one logical database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabasePath {
    project: String,
    instance: String,
    database: String,
}

impl DatabasePath {
    /// Build a path, validating each identifier.
    pub fn new(
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> Result<Self, Error> {
        let path = Self {
            project: project.into(),
            instance: instance.into(),
            database: database.into(),
        };
        validate_id("project", &path.project)?;
        validate_id("instance", &path.instance)?;
        validate_id("database", &path.database)?;
        Ok(path)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// The instance this database belongs to.
    pub fn instance_path(&self) -> InstancePath {
        InstancePath {
            project: self.project.clone(),
            instance: self.instance.clone(),
        }
    }

    /// Database file backing this path.
    pub fn file(&self, root: &Path) -> PathBuf {
        self.instance_path()
            .dir(root)
            .join(format!("{}.db", self.database))
    }
}

/// Project/instance pair; an instance is a directory of database files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstancePath {
    project: String,
    instance: String,
}

impl InstancePath {
    pub fn new(project: impl Into<String>, instance: impl Into<String>) -> Result<Self, Error> {
        let path = Self {
            project: project.into(),
            instance: instance.into(),
        };
        validate_id("project", &path.project)?;
        validate_id("instance", &path.instance)?;
        Ok(path)
    }

    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(&self.project).join(&self.instance)
    }
}

impl fmt::Display for InstancePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/instances/{}", self.project, self.instance)
    }
}

impl fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

impl FromStr for DatabasePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            ["projects", project, "instances", instance, "databases", database] => {
                Self::new(*project, *instance, *database)
            }
            _ => Err(Error::InvalidArgument(format!(
                "malformed database path: {s:?}"
            ))),
        }
    }
}

/// Identifiers double as directory and file names, so keep them to a safe
/// alphabet (alphanumeric, dash, underscore, dot) and forbid `.`/`..`.
fn validate_id(kind: &str, id: &str) -> Result<(), Error> {
    if id.is_empty() {
        return Err(Error::InvalidArgument(format!("{kind} id cannot be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(Error::InvalidArgument(format!(
            "{kind} id too long (max {MAX_ID_LEN} characters)"
        )));
    }
    if id == "." || id == ".." {
        return Err(Error::InvalidArgument(format!("{kind} id {id:?} is reserved")));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::InvalidArgument(format!(
            "{kind} id must contain only alphanumeric characters, dashes, underscores, or dots"
        )));
    }
    Ok(())
}
