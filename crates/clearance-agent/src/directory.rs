//! Static identity directory
//!
//! File-backed [`IdentityEffects`] for the CLI and for deployments whose
//! clearances are provisioned as configuration. The file is read once; the
//! directory is immutable afterwards.
//!
//! ```toml
//! admins = [1]
//!
//! [[users]]
//! id = 100
//! org_level = 2
//! departments = [{ department = 3, level = 3 }]
//!
//! [[managers]]
//! department = 3
//! users = [30]
//! ```

use crate::errors::{AgentError, Result};
use async_trait::async_trait;
use clearance_core::{
    AccessLevel, DepartmentId, IdentityEffects, IdentityError, UserAccessProfile, UserId,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectoryFile {
    #[serde(default)]
    admins: Vec<u64>,
    #[serde(default)]
    users: Vec<UserEntry>,
    #[serde(default)]
    managers: Vec<ManagerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UserEntry {
    id: u64,
    org_level: u8,
    #[serde(default)]
    departments: Vec<DepartmentEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DepartmentEntry {
    department: u64,
    level: u8,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManagerEntry {
    department: u64,
    users: Vec<u64>,
}

/// Immutable identity directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    profiles: BTreeMap<UserId, UserAccessProfile>,
    managers: BTreeMap<DepartmentId, Vec<UserId>>,
    admins: Vec<UserId>,
}

fn level(rank: u8, what: &str) -> Result<AccessLevel> {
    AccessLevel::from_rank(rank)
        .ok_or_else(|| AgentError::Config(format!("{what}: access level {rank} is out of range")))
}

impl StaticDirectory {
    /// Parse a directory document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: DirectoryFile = toml::from_str(text).map_err(|source| AgentError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        Self::from_file(file)
    }

    /// Read and parse a directory file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AgentError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let file: DirectoryFile = toml::from_str(&text).map_err(|source| AgentError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_file(file)
    }

    fn from_file(file: DirectoryFile) -> Result<Self> {
        let mut profiles = BTreeMap::new();
        for user in file.users {
            let what = format!("user {}", user.id);
            let mut profile = UserAccessProfile::new(UserId(user.id), level(user.org_level, &what)?);
            for dept in user.departments {
                profile = profile.with_department(DepartmentId(dept.department), level(dept.level, &what)?);
            }
            if profiles.insert(UserId(user.id), profile).is_some() {
                return Err(AgentError::Config(format!("{what} is listed twice")));
            }
        }

        let mut managers: BTreeMap<DepartmentId, Vec<UserId>> = BTreeMap::new();
        for entry in file.managers {
            managers
                .entry(DepartmentId(entry.department))
                .or_default()
                .extend(entry.users.into_iter().map(UserId));
        }

        tracing::info!(
            users = profiles.len(),
            departments = managers.len(),
            admins = file.admins.len(),
            "Static directory loaded"
        );
        Ok(Self {
            profiles,
            managers,
            admins: file.admins.into_iter().map(UserId).collect(),
        })
    }

    /// Number of users with a profile.
    pub fn user_count(&self) -> usize {
        self.profiles.len()
    }
}

#[async_trait]
impl IdentityEffects for StaticDirectory {
    async fn user_access_profile(&self, user: UserId) -> std::result::Result<UserAccessProfile, IdentityError> {
        self.profiles
            .get(&user)
            .cloned()
            .ok_or(IdentityError::UnknownUser(user))
    }

    async fn department_managers(
        &self,
        department: DepartmentId,
    ) -> std::result::Result<Vec<UserId>, IdentityError> {
        Ok(self.managers.get(&department).cloned().unwrap_or_default())
    }

    async fn administrators(&self) -> std::result::Result<Vec<UserId>, IdentityError> {
        Ok(self.admins.clone())
    }
}
