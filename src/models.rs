// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

// --- PAYLOAD CLASSIFICATION ---

/// Coarse category of a payload domain. Decides where its manifest came from and
/// whether it can be delivered wrapped as Managed Preferences.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum PayloadType {
    ManifestsApple,
    ManagedPreferencesApple,
    ManagedPreferencesApplications,
    ManagedPreferencesApplicationsLocal,
    ManagedPreferencesDeveloper,
    /// A payload whose domain is not described by any manifest. Kept verbatim.
    Custom,
}

impl PayloadType {
    pub const ALL: [Self; 6] = [
        Self::ManifestsApple,
        Self::ManagedPreferencesApple,
        Self::ManagedPreferencesApplications,
        Self::ManagedPreferencesApplicationsLocal,
        Self::ManagedPreferencesDeveloper,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManifestsApple => "manifestsApple",
            Self::ManagedPreferencesApple => "managedPreferencesApple",
            Self::ManagedPreferencesApplications => "managedPreferencesApplications",
            Self::ManagedPreferencesApplicationsLocal => "managedPreferencesApplicationsLocal",
            Self::ManagedPreferencesDeveloper => "managedPreferencesDeveloper",
            Self::Custom => "custom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Maps a manifest collection folder name (as laid out by ProfileManifests) to a type.
    pub fn from_folder_name(name: &str) -> Option<Self> {
        match name {
            "ManifestsApple" => Some(Self::ManifestsApple),
            "ManagedPreferencesApple" => Some(Self::ManagedPreferencesApple),
            "ManagedPreferencesApplications" => Some(Self::ManagedPreferencesApplications),
            "ManagedPreferencesApplicationsLocal" => {
                Some(Self::ManagedPreferencesApplicationsLocal)
            }
            "ManagedPreferencesDeveloper" => Some(Self::ManagedPreferencesDeveloper),
            _ => None,
        }
    }

    /// True for the families that may be exported wrapped as MCX preferences.
    pub fn is_managed_preferences(&self) -> bool {
        matches!(
            self,
            Self::ManagedPreferencesApple
                | Self::ManagedPreferencesApplications
                | Self::ManagedPreferencesApplicationsLocal
                | Self::ManagedPreferencesDeveloper
        )
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- RESOLUTION DIMENSIONS ---

/// How the profile will reach devices.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    #[default]
    Manual,
    Push,
    Any,
}

impl Distribution {
    /// A condition's distribution predicate fires when either side is `Any`
    /// or both name the same method.
    pub fn matches(&self, other: Self) -> bool {
        *self == Self::Any || other == Self::Any || *self == other
    }

    pub fn is_push(&self) -> bool {
        *self == Self::Push
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Push => "push",
            Self::Any => "any",
        })
    }
}

/// A set of target platforms.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Platforms(u8);

impl Platforms {
    pub const NONE: Self = Self(0);
    pub const MACOS: Self = Self(1);
    pub const IOS: Self = Self(1 << 1);
    pub const TVOS: Self = Self(1 << 2);
    pub const WATCHOS: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::MACOS, "macOS"),
        (Self::IOS, "iOS"),
        (Self::TVOS, "tvOS"),
        (Self::WATCHOS, "watchOS"),
    ];

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(p, _)| self.contains(*p))
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(p, _)| *p)
    }
}

impl Default for Platforms {
    fn default() -> Self {
        Self::MACOS
    }
}

impl BitOr for Platforms {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Platforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Platforms({})", self.names().join("|"))
    }
}

impl TryFrom<Vec<String>> for Platforms {
    type Error = String;
    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names.iter().try_fold(Self::NONE, |acc, name| {
            Self::from_name(name)
                .map(|p| acc | p)
                .ok_or_else(|| format!("unknown platform '{}'", name))
        })
    }
}

impl From<Platforms> for Vec<String> {
    fn from(value: Platforms) -> Self {
        value.names().into_iter().map(String::from).collect()
    }
}

/// The enrollment scopes a profile targets (macOS only distinguishes them).
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Scope(u8);

impl Scope {
    pub const NONE: Self = Self(0);
    pub const USER: Self = Self(1);
    pub const SYSTEM: Self = Self(1 << 1);
    pub const ALL: Self = Self(0b11);

    const NAMES: [(Self, &'static str); 2] = [(Self::USER, "user"), (Self::SYSTEM, "system")];

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(s, _)| self.contains(*s))
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(s, _)| *s)
    }

    /// The `PayloadScope` literal written at the profile root.
    pub fn payload_scope(&self) -> &'static str {
        if *self == Self::SYSTEM { "System" } else { "User" }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::USER
    }
}

impl BitOr for Scope {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({})", self.names().join("|"))
    }
}

impl TryFrom<Vec<String>> for Scope {
    type Error = String;
    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names.iter().try_fold(Self::NONE, |acc, name| {
            Self::from_name(name)
                .map(|s| acc | s)
                .ok_or_else(|| format!("unknown scope '{}'", name))
        })
    }
}

impl From<Scope> for Vec<String> {
    fn from(value: Scope) -> Self {
        value.names().into_iter().map(String::from).collect()
    }
}

/// Which wrapping the exporter applies to managed-preference payloads.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportStyle {
    #[default]
    Profile,
    Mcx,
}

impl std::str::FromStr for ExportStyle {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "profile" => Ok(Self::Profile),
            "mcx" => Ok(Self::Mcx),
            other => Err(format!("unknown export style '{}'", other)),
        }
    }
}

impl std::str::FromStr for Distribution {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "push" => Ok(Self::Push),
            "any" => Ok(Self::Any),
            other => Err(format!("unknown distribution method '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platforms_roundtrip_names() {
        let set = Platforms::MACOS | Platforms::IOS;
        let names: Vec<String> = set.into();
        assert_eq!(names, vec!["macOS".to_string(), "iOS".to_string()]);
        assert_eq!(Platforms::try_from(names).unwrap(), set);
        assert!(Platforms::try_from(vec!["beOS".to_string()]).is_err());
    }

    #[test]
    fn test_distribution_any_matches_everything() {
        assert!(Distribution::Any.matches(Distribution::Push));
        assert!(Distribution::Manual.matches(Distribution::Any));
        assert!(!Distribution::Manual.matches(Distribution::Push));
    }

    #[test]
    fn test_managed_preference_families() {
        assert!(PayloadType::ManagedPreferencesApple.is_managed_preferences());
        assert!(!PayloadType::ManifestsApple.is_managed_preferences());
        assert!(!PayloadType::Custom.is_managed_preferences());
        assert_eq!(
            PayloadType::from_name("managedPreferencesApple"),
            Some(PayloadType::ManagedPreferencesApple)
        );
    }
}
