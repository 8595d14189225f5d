use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Lifecycle state of an application record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppState {
    #[default]
    Unknown,
    Installed,
    Available,
    AvailableLocal,
    Updatable,
    UpdatableLive,
    Unavailable,
    QueuedForInstall,
    Installing,
    Removing,
}

impl AppState {
    pub fn is_installed(&self) -> bool {
        matches!(
            self,
            AppState::Installed | AppState::Updatable | AppState::UpdatableLive | AppState::Removing
        )
    }

    pub fn is_updatable(&self) -> bool {
        matches!(self, AppState::Updatable | AppState::UpdatableLive)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppState::Unknown => "unknown",
            AppState::Installed => "installed",
            AppState::Available => "available",
            AppState::AvailableLocal => "available-local",
            AppState::Updatable => "updatable",
            AppState::UpdatableLive => "updatable-live",
            AppState::Unavailable => "unavailable",
            AppState::QueuedForInstall => "queued-for-install",
            AppState::Installing => "installing",
            AppState::Removing => "removing",
        };
        f.write_str(s)
    }
}

/// What sort of software a record describes.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    #[default]
    Unknown,
    Desktop,
    Web,
    Runtime,
    Firmware,
    OsUpgrade,
    Repository,
    Addon,
    Codec,
    Font,
    Localization,
}

impl AppKind {
    /// Add-on subtypes hang off a parent application.
    pub fn is_addon(&self) -> bool {
        matches!(
            self,
            AppKind::Addon | AppKind::Codec | AppKind::Font | AppKind::Localization
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::Unknown => "unknown",
            AppKind::Desktop => "desktop",
            AppKind::Web => "web",
            AppKind::Runtime => "runtime",
            AppKind::Firmware => "firmware",
            AppKind::OsUpgrade => "os-upgrade",
            AppKind::Repository => "repository",
            AppKind::Addon => "addon",
            AppKind::Codec => "codec",
            AppKind::Font => "font",
            AppKind::Localization => "localization",
        }
    }

    pub fn parse(s: &str) -> Option<AppKind> {
        let kind = match s {
            "unknown" => AppKind::Unknown,
            "desktop" => AppKind::Desktop,
            "web" => AppKind::Web,
            "runtime" => AppKind::Runtime,
            "firmware" => AppKind::Firmware,
            "os-upgrade" => AppKind::OsUpgrade,
            "repository" => AppKind::Repository,
            "addon" => AppKind::Addon,
            "codec" => AppKind::Codec,
            "font" => AppKind::Font,
            "localization" => AppKind::Localization,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean behaviour flags attached to a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AppQuirks(u32);

impl AppQuirks {
    pub const NONE: AppQuirks = AppQuirks(0);
    /// Cannot be removed by the user.
    pub const COMPULSORY: AppQuirks = AppQuirks(1 << 0);
    /// Comes from an official source.
    pub const PROVENANCE: AppQuirks = AppQuirks(1 << 1);
    /// Never shown in any list.
    pub const HIDE_EVERYWHERE: AppQuirks = AppQuirks(1 << 2);
    /// Placeholder resolved into concrete records after fan-in.
    pub const IS_WILDCARD: AppQuirks = AppQuirks(1 << 3);
    /// Stands in for a group of other records.
    pub const IS_PROXY: AppQuirks = AppQuirks(1 << 4);

    const NAMES: [(AppQuirks, &'static str); 5] = [
        (AppQuirks::COMPULSORY, "compulsory"),
        (AppQuirks::PROVENANCE, "provenance"),
        (AppQuirks::HIDE_EVERYWHERE, "hide-everywhere"),
        (AppQuirks::IS_WILDCARD, "wildcard"),
        (AppQuirks::IS_PROXY, "proxy"),
    ];

    pub fn contains(&self, other: AppQuirks) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AppQuirks) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AppQuirks) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(q, _)| self.contains(*q))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl BitOr for AppQuirks {
    type Output = AppQuirks;

    fn bitor(self, rhs: AppQuirks) -> AppQuirks {
        AppQuirks(self.0 | rhs.0)
    }
}

impl BitOrAssign for AppQuirks {
    fn bitor_assign(&mut self, rhs: AppQuirks) {
        self.0 |= rhs.0;
    }
}

impl Serialize for AppQuirks {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

/// Attribute that changed, passed to change handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppField {
    Id,
    Name,
    Summary,
    Description,
    Version,
    State,
    Kind,
    Quirks,
    Categories,
    Metadata,
    Related,
    Runtime,
    Priority,
    ManagementPlugin,
    Icon,
    License,
    Size,
    Rating,
    Refined,
}
