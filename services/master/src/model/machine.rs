//! Machine descriptions and the specifications used to match them.

use serde::{Deserialize, Serialize};
use testgrid_id::MachineId;

use super::EnvironmentRequirement;

/// The environment kinds the platform knows how to activate.
///
/// Activator selection dispatches over this tag; adding a kind means adding
/// an activator implementation for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    /// A physical lab machine, reimaged between tests.
    Physical,

    /// A Hyper-V virtual machine restored from a snapshot.
    Hyperv,
}

impl std::fmt::Display for MachineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineKind::Physical => write!(f, "physical"),
            MachineKind::Hyperv => write!(f, "hyperv"),
        }
    }
}

/// A concrete machine available to host environments.
///
/// Constructed from persisted machine rows at poll time; read-only for the
/// duration of a test. Equality is identity-based on `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDescription {
    pub id: MachineId,
    pub kind: MachineKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    /// Network name handed to test steps as the environment's address.
    pub network_name: String,
    #[serde(default)]
    pub mac_address: Option<String>,

    pub operating_system: OperatingSystemSpecification,
    pub installed_applications: Vec<ApplicationSpecification>,

    /// Whether the machine may be claimed for test runs at all.
    pub available_for_test: bool,

    /// Whether the machine must be reimaged/restored after a run.
    pub clean_after_use: bool,
}

impl PartialEq for MachineDescription {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MachineDescription {}

/// Operating-system requirement used for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystemSpecification {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub culture: Option<String>,
    #[serde(default)]
    pub pointer_size: Option<u8>,
}

impl OperatingSystemSpecification {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            culture: None,
            pointer_size: None,
        }
    }

    /// Whether this (installed) OS satisfies the required one.
    ///
    /// Name and version must match exactly; culture and pointer size are
    /// only constrained when the requirement specifies them.
    pub fn satisfies(&self, required: &OperatingSystemSpecification) -> bool {
        if self.name != required.name || self.version != required.version {
            return false;
        }
        if let Some(culture) = &required.culture {
            if self.culture.as_ref() != Some(culture) {
                return false;
            }
        }
        if let Some(pointer_size) = required.pointer_size {
            if self.pointer_size != Some(pointer_size) {
                return false;
            }
        }
        true
    }
}

/// Dotted numeric application version, up to four components.
/// Missing components compare as zero (`1.2` == `1.2.0.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApplicationVersion([u32; 4]);

impl ApplicationVersion {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self([major, minor, build, revision])
    }
}

impl std::str::FromStr for ApplicationVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u32; 4];
        let mut count = 0;
        for piece in s.split('.') {
            if count == 4 {
                return Err(format!("'{s}' has more than four version components"));
            }
            parts[count] = piece
                .parse()
                .map_err(|_| format!("'{s}' has a non-numeric component '{piece}'"))?;
            count += 1;
        }
        if count == 0 {
            return Err("empty version string".to_string());
        }
        Ok(Self(parts))
    }
}

impl std::fmt::Display for ApplicationVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl Serialize for ApplicationVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ApplicationVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An installed or required application, matched by (name, version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpecification {
    pub name: String,
    pub version: ApplicationVersion,
}

impl ApplicationSpecification {
    pub fn new(name: impl Into<String>, version: ApplicationVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// True when `self` is the same application at an equal or newer
    /// version. Comparisons across different names are always false.
    pub fn is_newer_or_equal_version_of(&self, other: &ApplicationSpecification) -> bool {
        self.name == other.name && self.version >= other.version
    }

    /// True when `self` is the same application at a strictly older version.
    pub fn is_older_version_of(&self, other: &ApplicationSpecification) -> bool {
        self.name == other.name && self.version < other.version
    }

    /// True when `self` is the same application at exactly the same version.
    pub fn is_same_version_as(&self, other: &ApplicationSpecification) -> bool {
        self.name == other.name && self.version == other.version
    }
}

/// Whether a machine can host the given environment requirement: the OS is
/// satisfied and every required application is covered by an installed
/// equal-or-newer one.
pub fn machine_matches(machine: &MachineDescription, requirement: &EnvironmentRequirement) -> bool {
    if !machine.available_for_test {
        return false;
    }
    if !machine
        .operating_system
        .satisfies(&requirement.operating_system)
    {
        return false;
    }
    requirement.applications.iter().all(|required| {
        machine
            .installed_applications
            .iter()
            .any(|installed| installed.is_newer_or_equal_version_of(required))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use testgrid_id::EnvironmentId;

    fn version(s: &str) -> ApplicationVersion {
        s.parse().unwrap()
    }

    fn app(name: &str, v: &str) -> ApplicationSpecification {
        ApplicationSpecification::new(name, version(v))
    }

    fn machine(installed: Vec<ApplicationSpecification>) -> MachineDescription {
        MachineDescription {
            id: "lab-01".parse().unwrap(),
            kind: MachineKind::Hyperv,
            name: "lab-01".to_string(),
            description: None,
            network_name: "lab-01.grid.local".to_string(),
            mac_address: None,
            operating_system: OperatingSystemSpecification::new("windows", "10.0.17763"),
            installed_applications: installed,
            available_for_test: true,
            clean_after_use: true,
        }
    }

    fn requirement(apps: Vec<ApplicationSpecification>) -> EnvironmentRequirement {
        EnvironmentRequirement {
            id: EnvironmentId::new("server").unwrap(),
            name: "server".to_string(),
            operating_system: OperatingSystemSpecification::new("windows", "10.0.17763"),
            applications: apps,
        }
    }

    #[rstest]
    #[case("1.2", "1.2.0.0", true)]
    #[case("2.0", "1.9.9.9", false)]
    #[case("1.10", "1.9", false)]
    fn version_ordering(#[case] a: &str, #[case] b: &str, #[case] equal: bool) {
        let (va, vb) = (version(a), version(b));
        if equal {
            assert_eq!(va, vb);
        } else {
            assert!(va > vb);
        }
    }

    #[test]
    fn version_parse_rejects_garbage() {
        assert!("1.2.x".parse::<ApplicationVersion>().is_err());
        assert!("1.2.3.4.5".parse::<ApplicationVersion>().is_err());
        assert!("".parse::<ApplicationVersion>().is_err());
    }

    #[test]
    fn app_comparisons_across_names_are_false_not_errors() {
        let sql = app("sql-server", "15.0");
        let office = app("office", "16.0");
        assert!(!sql.is_newer_or_equal_version_of(&office));
        assert!(!sql.is_older_version_of(&office));
        assert!(!sql.is_same_version_as(&office));
    }

    #[test]
    fn app_same_name_version_ordering() {
        let old = app("sql-server", "14.0");
        let new = app("sql-server", "15.0");
        assert!(new.is_newer_or_equal_version_of(&old));
        assert!(new.is_newer_or_equal_version_of(&new));
        assert!(old.is_older_version_of(&new));
        assert!(!old.is_newer_or_equal_version_of(&new));
    }

    #[test]
    fn machine_equality_is_identity_on_id() {
        let a = machine(vec![]);
        let mut b = machine(vec![app("extra", "1.0")]);
        b.name = "renamed".to_string();
        assert_eq!(a, b);

        let mut c = machine(vec![]);
        c.id = "lab-02".parse().unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn matching_requires_equal_or_newer_applications() {
        let m = machine(vec![app("sql-server", "15.0")]);
        assert!(machine_matches(&m, &requirement(vec![app("sql-server", "14.0")])));
        assert!(machine_matches(&m, &requirement(vec![app("sql-server", "15.0")])));
        assert!(!machine_matches(&m, &requirement(vec![app("sql-server", "16.0")])));
        assert!(!machine_matches(&m, &requirement(vec![app("office", "1.0")])));
    }

    #[test]
    fn matching_respects_os_and_availability() {
        let mut m = machine(vec![]);
        let mut req = requirement(vec![]);
        assert!(machine_matches(&m, &req));

        req.operating_system = OperatingSystemSpecification::new("windows", "6.3");
        assert!(!machine_matches(&m, &req));

        req.operating_system = m.operating_system.clone();
        m.available_for_test = false;
        assert!(!machine_matches(&m, &req));
    }

    #[test]
    fn os_optional_fields_only_constrain_when_required() {
        let installed = OperatingSystemSpecification {
            name: "windows".to_string(),
            version: "10.0".to_string(),
            culture: Some("en-US".to_string()),
            pointer_size: Some(64),
        };

        let loose = OperatingSystemSpecification::new("windows", "10.0");
        assert!(installed.satisfies(&loose));

        let mut strict = loose.clone();
        strict.culture = Some("de-DE".to_string());
        assert!(!installed.satisfies(&strict));

        strict.culture = Some("en-US".to_string());
        strict.pointer_size = Some(32);
        assert!(!installed.satisfies(&strict));
    }
}
