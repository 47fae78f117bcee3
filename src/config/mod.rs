//! Image configuration: the declarative description of a root filesystem.
//!
//! A manifest is loaded with [`ImageConfiguration::load`], normalized once
//! with [`ImageConfiguration::normalize`], then checked with
//! [`ImageConfiguration::validate`]. Normalization is the only step that
//! mutates; validation is a pure predicate.
//!
//! ```yaml
//! contents:
//!   repositories:
//!     - https://dl-cdn.alpinelinux.org/alpine/edge/main
//!   keyring:
//!     - /etc/apk/keys/alpine-devel@lists.alpinelinux.org-6165ee59.rsa.pub
//!   packages:
//!     - alpine-baselayout
//!     - nginx
//! entrypoint:
//!   type: service-bundle
//!   services:
//!     nginx: /usr/sbin/nginx -c /etc/nginx/nginx.conf -g "daemon off;"
//! accounts:
//!   run-as: nginx
//!   users:
//!     - username: nginx
//!       uid: 10000
//!       gid: 10000
//!   groups:
//!     - groupname: nginx
//!       gid: 10000
//!       members: [nginx]
//! archs: [x86_64, aarch64]
//! ```

pub mod arch;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::observer::{BuildEvent, BuildObserver};

pub use arch::{parse_architectures, Architecture, Platform};

/// Entrypoint type that runs a supervisor over several services.
pub const SERVICE_BUNDLE: &str = "service-bundle";

/// Command the supervision tree is launched with.
pub const SUPERVISOR_COMMAND: &str = "/bin/s6-svscan /sv";

/// Package providing the supervisor.
pub const SUPERVISOR_PACKAGE: &str = "s6";

/// The complete desired state of an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfiguration {
    pub contents: Contents,
    pub entrypoint: Entrypoint,
    pub accounts: Accounts,
    pub archs: Vec<Architecture>,
}

/// What goes into the filesystem: apk repositories, keys, and packages.
///
/// Duplicate packages are tolerated; apk collapses them when fixating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contents {
    pub repositories: Vec<String>,
    pub keyring: Vec<String>,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entrypoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
    /// Service name to the command the supervisor runs for it.
    pub services: BTreeMap<String, String>,
}

impl Entrypoint {
    pub fn is_service_bundle(&self) -> bool {
        self.kind == SERVICE_BUNDLE
    }

    fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.command.is_empty() && self.services.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Accounts {
    #[serde(rename = "run-as")]
    pub run_as: String,
    pub users: Vec<User>,
    pub groups: Vec<Group>,
}

impl Accounts {
    fn is_empty(&self) -> bool {
        self.run_as.is_empty() && self.users.is_empty() && self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} {} {}}}", self.username, self.uid, self.gid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub groupname: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} {} [{}]}}",
            self.groupname,
            self.gid,
            self.members.join(" ")
        )
    }
}

impl ImageConfiguration {
    /// Read and decode a YAML manifest.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }

    /// Decode a manifest held in memory.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Apply the implicit rewrites a manifest asks for.
    ///
    /// A `service-bundle` entrypoint always runs the supervisor, so the
    /// command is replaced and the supervisor package is added to the
    /// package list. Running this more than once changes nothing further.
    pub fn normalize(&mut self) {
        if self.entrypoint.is_service_bundle() {
            self.entrypoint.command = SUPERVISOR_COMMAND.to_string();
            if !self.contents.packages.iter().any(|p| p == SUPERVISOR_PACKAGE) {
                self.contents.packages.push(SUPERVISOR_PACKAGE.to_string());
            }
        }
    }

    /// Check account invariants: every user and group is named and none of
    /// them claims ID 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for u in &self.accounts.users {
            if u.username.is_empty() {
                return Err(ConfigError::InvalidUser {
                    user: u.to_string(),
                    reason: "has no configured user name",
                });
            }
            if u.uid == 0 {
                return Err(ConfigError::InvalidUser {
                    user: u.to_string(),
                    reason: "has UID 0",
                });
            }
        }

        for g in &self.accounts.groups {
            if g.groupname.is_empty() {
                return Err(ConfigError::InvalidGroup {
                    group: g.to_string(),
                    reason: "has no configured group name",
                });
            }
            if g.gid == 0 {
                return Err(ConfigError::InvalidGroup {
                    group: g.to_string(),
                    reason: "has GID 0",
                });
            }
        }

        Ok(())
    }

    /// Architectures to build, falling back to the standard set.
    pub fn architectures(&self) -> Vec<Architecture> {
        if self.archs.is_empty() {
            return Architecture::all();
        }
        let raw: Vec<&str> = self.archs.iter().map(|a| a.as_str()).collect();
        parse_architectures(&raw)
    }

    /// Human-readable summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            "image configuration:".to_string(),
            "  contents:".to_string(),
            format!("    repositories: {:?}", self.contents.repositories),
            format!("    keyring:      {:?}", self.contents.keyring),
            format!("    packages:     {:?}", self.contents.packages),
        ];

        if !self.entrypoint.is_empty() {
            lines.push("  entrypoint:".to_string());
            lines.push(format!("    type:    {}", self.entrypoint.kind));
            lines.push(format!("    cmd:     {}", self.entrypoint.command));
            lines.push(format!("    service: {:?}", self.entrypoint.services));
        }

        if !self.accounts.is_empty() {
            let users: Vec<String> = self.accounts.users.iter().map(|u| u.to_string()).collect();
            let groups: Vec<String> = self.accounts.groups.iter().map(|g| g.to_string()).collect();
            lines.push("  accounts:".to_string());
            lines.push(format!("    runas:  {}", self.accounts.run_as));
            lines.push(format!("    users:  [{}]", users.join(" ")));
            lines.push(format!("    groups: [{}]", groups.join(" ")));
        }

        if !self.archs.is_empty() {
            let archs: Vec<&str> = self.archs.iter().map(|a| a.as_str()).collect();
            lines.push(format!("  archs: [{}]", archs.join(" ")));
        }

        lines
    }

    /// Report the summary to an observer.
    pub fn summarize(&self, observer: &dyn BuildObserver) {
        observer.on_event(&BuildEvent::ConfigSummary {
            lines: self.summary_lines(),
        });
    }
}
