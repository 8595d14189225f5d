use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::app::AppKind;
use crate::plugin::PluginError;

/// Placeholder for an id component that is not known.
pub const WILDCARD: &str = "*";

/// Structured unique id: `origin/kind/name/arch/branch`.
///
/// `name` is the base id shared by every build of the same software; the
/// other components tell apart where a particular record came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId {
    origin: String,
    kind: AppKind,
    name: String,
    arch: String,
    branch: String,
}

impl AppId {
    pub fn new(origin: impl Into<String>, kind: AppKind, name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            kind,
            name: name.into(),
            arch: WILDCARD.to_string(),
            branch: WILDCARD.to_string(),
        }
    }

    /// An id that only knows the base id; everything else is a wildcard.
    pub fn wildcard(name: impl Into<String>) -> Self {
        Self::new(WILDCARD, AppKind::Unknown, name)
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn kind(&self) -> AppKind {
        self.kind
    }

    /// Base id, ignoring origin and branch.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// True when the id does not pin down where the software comes from.
    pub fn is_wildcard(&self) -> bool {
        self.origin == WILDCARD || self.kind == AppKind::Unknown
    }

    /// Component-wise equality where a wildcard on either side matches anything.
    pub fn matches(&self, other: &AppId) -> bool {
        fn part(a: &str, b: &str) -> bool {
            a == WILDCARD || b == WILDCARD || a == b
        }
        let kind_ok =
            self.kind == AppKind::Unknown || other.kind == AppKind::Unknown || self.kind == other.kind;
        kind_ok
            && self.name == other.name
            && part(&self.origin, &other.origin)
            && part(&self.arch, &other.arch)
            && part(&self.branch, &other.branch)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.kind == AppKind::Unknown {
            WILDCARD
        } else {
            self.kind.as_str()
        };
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.origin, kind, self.name, self.arch, self.branch
        )
    }
}

impl FromStr for AppId {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 5 {
            return Err(PluginError::InvalidArgument(format!(
                "unique id '{}' must have 5 '/'-separated parts",
                s
            )));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(PluginError::InvalidArgument(format!(
                "unique id '{}' has an empty component",
                s
            )));
        }
        if parts[2] == WILDCARD {
            return Err(PluginError::InvalidArgument(format!(
                "unique id '{}' has no base id",
                s
            )));
        }

        let kind = if parts[1] == WILDCARD {
            AppKind::Unknown
        } else {
            AppKind::parse(parts[1]).ok_or_else(|| {
                PluginError::InvalidArgument(format!("unknown kind '{}' in '{}'", parts[1], s))
            })?
        };

        Ok(Self {
            origin: parts[0].to_string(),
            kind,
            name: parts[2].to_string(),
            arch: parts[3].to_string(),
            branch: parts[4].to_string(),
        })
    }
}

impl Serialize for AppId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
