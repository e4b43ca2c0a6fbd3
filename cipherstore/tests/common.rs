//! Common test utilities shared across integration tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cipherstore::{Credential, HelperConfig, LogSink, OpenHelper, OpenHooks};

/// Records which transition hooks ran, in order.
#[derive(Clone, Default)]
pub struct HookLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    /// Records an event.
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    /// Drains and returns the recorded events.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Hooks that record every transition and create (or extend) table `t`.
    pub fn hooks(&self) -> OpenHooks {
        let create = self.clone();
        let upgrade = self.clone();
        let downgrade = self.clone();
        let before_delete = self.clone();
        let open = self.clone();
        OpenHooks::new()
            .on_create(move |db| {
                create.push("create");
                db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
            })
            .on_upgrade(move |db, from, to| {
                upgrade.push(format!("upgrade {from}->{to}"));
                db.execute_batch("CREATE TABLE IF NOT EXISTS extra (id INTEGER);")
            })
            .on_downgrade(move |_, from, to| {
                downgrade.push(format!("downgrade {from}->{to}"));
                Ok(())
            })
            .on_before_delete(move |_| {
                before_delete.push("before_delete");
                Ok(())
            })
            .on_open(move |_| {
                open.push("open");
                Ok(())
            })
    }
}

/// Creates a temp dir and a store path inside it.
pub fn temp_store() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.db");
    (dir, path)
}

/// Builds an open helper for the given path and versions.
pub fn open_helper(path: &Path, target: i64, min_supported: i64, hooks: OpenHooks) -> OpenHelper {
    let config = HelperConfig::new(Some(path.to_path_buf()), target)
        .expect("config")
        .with_min_supported_version(min_supported);
    OpenHelper::new(config, Credential::None, hooks, LogSink::facade())
}
