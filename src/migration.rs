use log::{debug, info};

use crate::db::Database;
use crate::error::Result;
use crate::settings::SettingsStore;

/// Bring profiles from the legacy preference blob into the relational store.
///
/// Safe to run on every launch: a profile already present in the store
/// (matched by id) is never touched, so relational data always wins over the
/// older blob. The blob itself is left in place. A corrupt blob decodes to an
/// empty list upstream, which makes this a no-op rather than a failure.
///
/// Returns the number of profiles inserted.
pub fn migrate_legacy_profiles(settings: &SettingsStore, db: &Database) -> Result<usize> {
    let legacy = settings.legacy_characters();
    if legacy.is_empty() {
        debug!("no legacy profiles to migrate");
        return Ok(0);
    }

    let mut migrated = 0;
    for profile in &legacy {
        if db.get_character(profile.id)?.is_some() {
            continue;
        }
        // Ids come over verbatim, including the 0 the legacy store gave its
        // seeded default profile; minting a new one would break the
        // presence check and re-import the profile on every launch.
        db.insert_character_as_is(profile)?;
        migrated += 1;
    }

    if migrated > 0 {
        info!("migrated {migrated} legacy profile(s) into the relational store");
    }
    Ok(migrated)
}

// ============================================
// Tests
// ============================================
