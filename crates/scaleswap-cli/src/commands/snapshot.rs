//! `scaleswap snapshot`: print the persisted setup of one owner.

use std::path::Path;

use anyhow::{bail, Result};

use scaleswap_state::{SetupRecord, StateStore};

pub fn snapshot(owner: &str, state_dir: &Path) -> Result<()> {
    let record = lookup(owner, state_dir)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn lookup(owner: &str, state_dir: &Path) -> Result<SetupRecord> {
    if !state_dir.is_dir() {
        bail!("state directory {} does not exist", state_dir.display());
    }
    let store = StateStore::open_dir(state_dir)?;
    match store.get_setup(owner)? {
        Some(record) => Ok(record),
        None => bail!("no setup recorded for owner {owner}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_owner_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        StateStore::open_dir(dir.path()).unwrap();
        let err = lookup("web-svc", dir.path()).unwrap_err();
        assert!(err.to_string().contains("web-svc"));
    }

    #[test]
    fn missing_state_dir_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(lookup("web-svc", &missing).is_err());
        assert!(!missing.exists());
    }
}
