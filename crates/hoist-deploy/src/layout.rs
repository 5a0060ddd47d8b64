//! On-disk layout of an app and the `current`/`previous` release slots.
//!
//! ```text
//! {apps_dir}/{app}/
//!   current -> releases/{id}
//!   previous -> releases/{id}
//!   releases/{id}/
//!   .deploying
//!   .upload-{id}.tar.gz
//!   ecosystem.config.json
//! ```
//!
//! Slot links use relative targets so the whole app directory can be moved.
//! Repointing a slot writes a temp link next to it and renames it over the
//! old one, so readers see either the old or the new target, never neither.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use hoist_core::{AppName, ReleaseId};
use hoist_process::SUPERVISOR_CONFIG_FILE;

pub const RELEASES_DIR: &str = "releases";
pub const CURRENT_LINK: &str = "current";
pub const PREVIOUS_LINK: &str = "previous";

/// Paths for one app.
#[derive(Debug, Clone)]
pub struct AppLayout {
    base: PathBuf,
}

impl AppLayout {
    pub fn new(apps_dir: &Path, app: &AppName) -> Self {
        Self {
            base: apps_dir.join(app.as_str()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.base.join(RELEASES_DIR)
    }

    pub fn release_dir(&self, id: ReleaseId) -> PathBuf {
        self.releases_dir().join(id.to_string())
    }

    pub fn current_link(&self) -> PathBuf {
        self.base.join(CURRENT_LINK)
    }

    pub fn supervisor_config(&self) -> PathBuf {
        self.base.join(SUPERVISOR_CONFIG_FILE)
    }

    pub fn upload_path(&self, id: ReleaseId) -> PathBuf {
        self.base.join(format!(".upload-{id}.tar.gz"))
    }

    /// Release ids present on disk, ascending. Missing dir means none.
    pub fn list_releases(&self) -> io::Result<Vec<ReleaseId>> {
        let entries = match fs::read_dir(self.releases_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(ReleaseId::from_dir_name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn release_exists(&self, id: ReleaseId) -> bool {
        self.release_dir(id).is_dir()
    }

    pub fn slots(&self) -> ReleaseSlots<'_> {
        ReleaseSlots { layout: self }
    }

    /// Delete every release except those in `keep`. Failures are logged.
    pub fn prune_releases(&self, keep: &[ReleaseId]) -> usize {
        let ids = match self.list_releases() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(base = %self.base.display(), error = %e, "cannot list releases for pruning");
                return 0;
            }
        };
        let mut removed = 0;
        for id in ids.into_iter().filter(|id| !keep.contains(id)) {
            match fs::remove_dir_all(self.release_dir(id)) {
                Ok(()) => removed += 1,
                Err(e) => warn!(release = %id, error = %e, "failed to prune release"),
            }
        }
        removed
    }
}

/// Which release each slot named at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub current: Option<ReleaseId>,
    pub previous: Option<ReleaseId>,
}

/// The two-slot ring over `current` and `previous`.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseSlots<'a> {
    layout: &'a AppLayout,
}

impl ReleaseSlots<'_> {
    pub fn current(&self) -> Option<ReleaseId> {
        self.read(CURRENT_LINK)
    }

    pub fn previous(&self) -> Option<ReleaseId> {
        self.read(PREVIOUS_LINK)
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            current: self.current(),
            previous: self.previous(),
        }
    }

    /// Make `next` current. The old current moves to `previous`; failing to
    /// move it is logged, failing to swap `current` is an error.
    pub fn advance(&self, next: ReleaseId) -> io::Result<()> {
        if let Some(old) = self.current() {
            if let Err(e) = self.point(PREVIOUS_LINK, old) {
                warn!(release = %old, error = %e, "failed to record previous release");
            }
        }
        self.point(CURRENT_LINK, next)
    }

    /// Put both slots back the way `snapshot` found them.
    pub fn restore(&self, snapshot: &SlotSnapshot) -> io::Result<()> {
        self.set(CURRENT_LINK, snapshot.current)?;
        self.set(PREVIOUS_LINK, snapshot.previous)
    }

    /// Exchange the targets of `current` and `previous`.
    pub fn swap(&self, current: ReleaseId, previous: ReleaseId) -> io::Result<()> {
        self.point(CURRENT_LINK, previous)?;
        self.point(PREVIOUS_LINK, current)
    }

    pub fn clear_previous(&self) -> io::Result<()> {
        self.unlink(PREVIOUS_LINK)
    }

    fn read(&self, slot: &str) -> Option<ReleaseId> {
        let target = fs::read_link(self.layout.base.join(slot)).ok()?;
        target
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(ReleaseId::from_dir_name)
    }

    fn set(&self, slot: &str, id: Option<ReleaseId>) -> io::Result<()> {
        match id {
            Some(id) => self.point(slot, id),
            None => self.unlink(slot),
        }
    }

    fn point(&self, slot: &str, id: ReleaseId) -> io::Result<()> {
        let link = self.layout.base.join(slot);
        let tmp = self.layout.base.join(format!(".{slot}.next"));
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        symlink(Path::new(RELEASES_DIR).join(id.to_string()), &tmp)?;
        fs::rename(&tmp, &link)?;
        debug!(slot, release = %id, "slot repointed");
        Ok(())
    }

    fn unlink(&self, slot: &str) -> io::Result<()> {
        match fs::remove_file(self.layout.base.join(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(dir: &Path) -> AppLayout {
        let layout = AppLayout::new(dir, &AppName::new("demo").unwrap());
        for id in [1, 2, 3] {
            fs::create_dir_all(layout.release_dir(ReleaseId(id))).unwrap();
        }
        layout
    }

    #[test]
    fn advance_moves_current_to_previous() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let slots = layout.slots();

        slots.advance(ReleaseId(1)).unwrap();
        assert_eq!(slots.current(), Some(ReleaseId(1)));
        assert_eq!(slots.previous(), None);

        slots.advance(ReleaseId(2)).unwrap();
        assert_eq!(slots.current(), Some(ReleaseId(2)));
        assert_eq!(slots.previous(), Some(ReleaseId(1)));

        // The link resolves to a real directory via its relative target.
        assert!(layout.current_link().join(".").is_dir());
        assert_eq!(
            fs::read_link(layout.current_link()).unwrap(),
            Path::new("releases/2")
        );
    }

    #[test]
    fn restore_returns_to_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let slots = layout.slots();
        slots.advance(ReleaseId(1)).unwrap();
        slots.advance(ReleaseId(2)).unwrap();

        let snap = slots.snapshot();
        slots.advance(ReleaseId(3)).unwrap();
        slots.restore(&snap).unwrap();
        assert_eq!(slots.snapshot(), snap);
    }

    #[test]
    fn restore_empty_snapshot_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let slots = layout.slots();
        let snap = slots.snapshot();

        slots.advance(ReleaseId(1)).unwrap();
        slots.restore(&snap).unwrap();
        assert!(fs::symlink_metadata(layout.current_link()).is_err());
    }

    #[test]
    fn swap_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let slots = layout.slots();
        slots.advance(ReleaseId(1)).unwrap();
        slots.advance(ReleaseId(2)).unwrap();

        slots.swap(ReleaseId(2), ReleaseId(1)).unwrap();
        assert_eq!(slots.current(), Some(ReleaseId(1)));
        assert_eq!(slots.previous(), Some(ReleaseId(2)));
    }

    #[test]
    fn list_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(layout.releases_dir().join("scratch")).unwrap();

        assert_eq!(
            layout.list_releases().unwrap(),
            vec![ReleaseId(1), ReleaseId(2), ReleaseId(3)]
        );
        assert_eq!(layout.prune_releases(&[ReleaseId(3)]), 2);
        assert_eq!(layout.list_releases().unwrap(), vec![ReleaseId(3)]);
    }

    #[test]
    fn no_releases_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = AppLayout::new(dir.path(), &AppName::new("fresh").unwrap());
        assert!(layout.list_releases().unwrap().is_empty());
        assert_eq!(layout.slots().current(), None);
    }
}
