//! Subsystem registration: centralizes all DB initialization functions.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::core::{db, error};
use crate::plugins::{analysis, generation, profiles, templates, versions};
use std::path::Path;

pub(crate) struct SubsystemInit {
    pub name: &'static str,
    pub initialize_db: fn(&Path) -> Result<(), error::ProspectusError>,
}

/// Order matters: `meta` stamps the schema version before any table exists.
pub(crate) const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit { name: "meta", initialize_db: db::initialize_meta_db },
    SubsystemInit { name: "versions", initialize_db: versions::initialize_versions_db },
    SubsystemInit { name: "templates", initialize_db: templates::initialize_templates_db },
    SubsystemInit { name: "generation", initialize_db: generation::initialize_generation_db },
    SubsystemInit { name: "profiles", initialize_db: profiles::initialize_profiles_db },
    SubsystemInit { name: "analysis", initialize_db: analysis::initialize_analysis_db },
];

/// Initialize all subsystem databases sequentially. Returns the names initialized.
pub(crate) fn initialize_all_dbs(data_root: &Path) -> Result<Vec<&'static str>, error::ProspectusError> {
    let mut done = Vec::with_capacity(SUBSYSTEMS.len());
    for sub in SUBSYSTEMS {
        (sub.initialize_db)(data_root)?;
        done.push(sub.name);
    }
    Ok(done)
}
