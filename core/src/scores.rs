use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::sched::lock;

/// Which direction counts as an improvement. A scoring policy property,
/// never assumed: solve times improve downward, catch counts upward.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScorePolicy {
    HigherIsBetter,
    LowerIsBetter,
}

impl ScorePolicy {
    pub fn improves(self, candidate: i64, best: i64) -> bool {
        match self {
            Self::HigherIsBetter => candidate > best,
            Self::LowerIsBetter => candidate < best,
        }
    }
}

/// Persistent best-score-per-game mapping. Failures are collaborator
/// failures: callers get the default back and the game keeps running.
pub trait ScoreStore: Send + Sync {
    fn load_best(&self, game: &str, default: i64) -> i64;
    fn save_best(&self, game: &str, value: i64);
}

/// Flat JSON map on disk, guarded by one global lock so concurrent
/// writers from different games cannot interleave.
pub struct JsonScoreStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonScoreStore {
    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    /// Store under the platform config directory, falling back to the
    /// working directory when the platform offers none.
    pub fn open_default() -> Self {
        let dir = ProjectDirs::from("io.github", "padcade", "padcade")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::at_path(dir.join("scores.json"))
    }

    fn read_all(&self) -> BTreeMap<String, i64> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("score file {} is corrupt: {err}", self.path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }
}

impl ScoreStore for JsonScoreStore {
    fn load_best(&self, game: &str, default: i64) -> i64 {
        let _guard = lock(&self.guard);
        self.read_all().get(game).copied().unwrap_or(default)
    }

    fn save_best(&self, game: &str, value: i64) {
        let _guard = lock(&self.guard);
        let mut all = self.read_all();
        all.insert(game.to_owned(), value);

        if let Some(dir) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(dir) {
                log::warn!("cannot create score dir {}: {err}", dir.display());
                return;
            }
        }
        let data = match serde_json::to_string_pretty(&all) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("cannot serialize scores: {err}");
                return;
            }
        };
        if let Err(err) = fs::write(&self.path, data) {
            log::warn!("cannot write {}: {err}", self.path.display());
        }
    }
}

/// In-memory store for tests and score-less setups.
#[derive(Default)]
pub struct MemoryScoreStore {
    map: Mutex<BTreeMap<String, i64>>,
}

impl ScoreStore for MemoryScoreStore {
    fn load_best(&self, game: &str, default: i64) -> i64 {
        lock(&self.map).get(game).copied().unwrap_or(default)
    }

    fn save_best(&self, game: &str, value: i64) {
        lock(&self.map).insert(game.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_directions_are_not_interchangeable() {
        assert!(ScorePolicy::HigherIsBetter.improves(10, 5));
        assert!(!ScorePolicy::HigherIsBetter.improves(5, 5));
        assert!(ScorePolicy::LowerIsBetter.improves(12, 30));
        assert!(!ScorePolicy::LowerIsBetter.improves(30, 12));
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryScoreStore::default();

        assert_eq!(store.load_best("snake", 0), 0);
        store.save_best("snake", 14);
        assert_eq!(store.load_best("snake", 0), 14);
    }

    #[test]
    fn json_store_round_trips_on_disk() {
        let path = std::env::temp_dir().join(format!(
            "padcade-scores-{}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        let store = JsonScoreStore::at_path(path.clone());

        assert_eq!(store.load_best("mines", 999), 999);
        store.save_best("mines", 42);
        store.save_best("memory", 18);
        assert_eq!(store.load_best("mines", 999), 42);

        // A fresh handle sees the persisted values.
        let reopened = JsonScoreStore::at_path(path.clone());
        assert_eq!(reopened.load_best("memory", 0), 18);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_score_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!(
            "padcade-scores-bad-{}.json",
            std::process::id()
        ));
        fs::write(&path, "not json").unwrap();
        let store = JsonScoreStore::at_path(path.clone());

        assert_eq!(store.load_best("mines", 999), 999);

        let _ = fs::remove_file(&path);
    }
}
