//! Diffing artifacts on disk against loaded modules.

use std::collections::BTreeMap;

use crate::runtime::ModuleRecord;
use crate::scanner::ArtifactSet;
use crate::start_level::derive_start_level;

/// An artifact to install, with the start level it will get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInstall {
    /// Artifact location.
    pub location: String,
    /// Start level derived from the location.
    pub start_level: u32,
}

/// What one cycle will do to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Artifacts with no loaded module.
    pub to_install: Vec<PlannedInstall>,
    /// Loaded modules whose artifact is newer.
    pub to_update: Vec<ModuleRecord>,
    /// Loaded modules without an artifact.
    ///
    /// Orphans are uninstalled before planning, so this only holds modules
    /// whose uninstall failed. They are reported, never acted on.
    pub to_uninstall: Vec<ModuleRecord>,
}

impl ReconciliationPlan {
    /// Whether the plan installs or updates anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.to_install.is_empty() || !self.to_update.is_empty()
    }
}

/// Builds [`ReconciliationPlan`]s.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    default_start_level: u32,
}

impl Reconciler {
    /// Create a reconciler with the fallback start level.
    #[must_use]
    pub fn new(default_start_level: u32) -> Self {
        Self {
            default_start_level,
        }
    }

    /// Diff `artifacts` against `modules` (both keyed by location).
    #[must_use]
    pub fn plan(
        &self,
        artifacts: &ArtifactSet,
        modules: &BTreeMap<String, ModuleRecord>,
    ) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::default();

        for (location, artifact) in artifacts {
            match modules.get(location) {
                None => plan.to_install.push(PlannedInstall {
                    location: location.clone(),
                    start_level: derive_start_level(location, self.default_start_level),
                }),
                Some(record) if artifact.last_modified > record.last_modified => {
                    plan.to_update.push(record.clone());
                },
                Some(_) => {},
            }
        }

        plan.to_uninstall = modules
            .values()
            .filter(|record| !artifacts.contains_key(&record.location))
            .cloned()
            .collect();

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ModuleHandle;
    use crate::scanner::Artifact;
    use std::time::{Duration, SystemTime};

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn artifacts(entries: &[(&str, u64)]) -> ArtifactSet {
        entries
            .iter()
            .map(|(location, mtime)| {
                (
                    (*location).to_owned(),
                    Artifact {
                        location: (*location).to_owned(),
                        path: location.trim_start_matches("file://").into(),
                        last_modified: t(*mtime),
                    },
                )
            })
            .collect()
    }

    fn modules(entries: &[(&str, u64, u64)]) -> BTreeMap<String, ModuleRecord> {
        entries
            .iter()
            .map(|(location, handle, mtime)| {
                (
                    (*location).to_owned(),
                    ModuleRecord {
                        location: (*location).to_owned(),
                        handle: ModuleHandle::new(*handle),
                        last_modified: t(*mtime),
                        is_fragment: false,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_new_artifacts_are_installed_with_level() {
        let plan = Reconciler::new(4).plan(
            &artifacts(&[
                ("file:///deploy/20/web.pkg", 100),
                ("file:///deploy/lib/util.pkg", 100),
            ]),
            &BTreeMap::new(),
        );

        assert_eq!(
            plan.to_install,
            vec![
                PlannedInstall {
                    location: "file:///deploy/20/web.pkg".into(),
                    start_level: 20,
                },
                PlannedInstall {
                    location: "file:///deploy/lib/util.pkg".into(),
                    start_level: 4,
                },
            ]
        );
        assert!(plan.to_update.is_empty());
        assert!(plan.has_changes());
    }

    #[test]
    fn test_update_only_when_artifact_is_newer() {
        let plan = Reconciler::new(1).plan(
            &artifacts(&[
                ("file:///deploy/newer.pkg", 200),
                ("file:///deploy/same.pkg", 100),
                ("file:///deploy/older.pkg", 50),
            ]),
            &modules(&[
                ("file:///deploy/newer.pkg", 1, 100),
                ("file:///deploy/same.pkg", 2, 100),
                ("file:///deploy/older.pkg", 3, 100),
            ]),
        );

        assert!(plan.to_install.is_empty());
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].handle, ModuleHandle::new(1));
    }

    #[test]
    fn test_stable_state_yields_empty_plan() {
        let plan = Reconciler::new(1).plan(
            &artifacts(&[("file:///deploy/a.pkg", 100)]),
            &modules(&[("file:///deploy/a.pkg", 1, 150)]),
        );
        assert_eq!(plan, ReconciliationPlan::default());
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_leftover_orphans_reported_not_planned() {
        let plan = Reconciler::new(1).plan(
            &ArtifactSet::new(),
            &modules(&[("file:///deploy/stuck.pkg", 9, 100)]),
        );
        assert_eq!(plan.to_uninstall.len(), 1);
        assert!(!plan.has_changes());
    }
}
