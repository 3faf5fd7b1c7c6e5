//! Launcher menu: one button per game, button 0 backs out of a running
//! game and always tears its timers down first.

use std::sync::{Arc, Mutex};

use rand::Rng;

use padcade_core::games::{
    BeaverGame, DodgeGame, MemoryGame, MinesGame, PatternGame, ReactionGame, SequenceGame,
    SnakeGame,
};
use padcade_core::{Banner, Game, GameIo, KeyIndex, TileView, PANEL_KEYS};

const BACK_KEY: KeyIndex = 0;

pub struct GameEntry {
    pub id: &'static str,
    pub title: &'static str,
    pub key: KeyIndex,
    build: fn(GameIo, u64) -> Arc<dyn Game>,
}

fn build_mines(io: GameIo, seed: u64) -> Arc<dyn Game> {
    MinesGame::new(io, seed)
}
fn build_memory(io: GameIo, seed: u64) -> Arc<dyn Game> {
    MemoryGame::new(io, seed)
}
fn build_snake(io: GameIo, seed: u64) -> Arc<dyn Game> {
    SnakeGame::new(io, seed)
}
fn build_dodge(io: GameIo, seed: u64) -> Arc<dyn Game> {
    DodgeGame::new(io, seed)
}
fn build_sequence(io: GameIo, seed: u64) -> Arc<dyn Game> {
    SequenceGame::new(io, seed)
}
fn build_pattern(io: GameIo, seed: u64) -> Arc<dyn Game> {
    PatternGame::new(io, seed)
}
fn build_reaction(io: GameIo, seed: u64) -> Arc<dyn Game> {
    ReactionGame::new(io, seed)
}
fn build_beaver(io: GameIo, seed: u64) -> Arc<dyn Game> {
    BeaverGame::new(io, seed)
}

pub fn registry() -> Vec<GameEntry> {
    vec![
        GameEntry {
            id: "mines",
            title: "MINES",
            key: 8,
            build: build_mines,
        },
        GameEntry {
            id: "memory",
            title: "MEMORY",
            key: 9,
            build: build_memory,
        },
        GameEntry {
            id: "snake",
            title: "SNAKE",
            key: 10,
            build: build_snake,
        },
        GameEntry {
            id: "dodge",
            title: "DODGE",
            key: 11,
            build: build_dodge,
        },
        GameEntry {
            id: "sequence",
            title: "RECALL",
            key: 12,
            build: build_sequence,
        },
        GameEntry {
            id: "pattern",
            title: "PATTERN",
            key: 13,
            build: build_pattern,
        },
        GameEntry {
            id: "reaction",
            title: "REACT",
            key: 14,
            build: build_reaction,
        },
        GameEntry {
            id: "beaver",
            title: "BEAVER",
            key: 15,
            build: build_beaver,
        },
    ]
}

pub struct Arcade {
    io: GameIo,
    entries: Vec<GameEntry>,
    active: Mutex<Option<Arc<dyn Game>>>,
}

impl Arcade {
    pub fn new(io: GameIo) -> Self {
        Self {
            io,
            entries: registry(),
            active: Mutex::new(None),
        }
    }

    pub fn show_menu(&self) {
        for key in 0..PANEL_KEYS {
            let view = if key == BACK_KEY {
                TileView::Banner(Banner::Logo)
            } else {
                match self.entries.iter().find(|e| e.key == key) {
                    Some(entry) => TileView::Banner(Banner::GameButton(entry.title)),
                    None => TileView::Blank,
                }
            };
            self.io.set_key(key, view);
        }
    }

    pub fn launch(&self, id: &str) -> bool {
        let Some(entry) = self.entries.iter().find(|e| e.id == id) else {
            return false;
        };
        self.launch_entry(entry);
        true
    }

    fn launch_entry(&self, entry: &GameEntry) {
        let seed = rand::rng().random();
        let game = (entry.build)(self.io.clone(), seed);
        log::info!("launching {}", entry.id);

        // tear down whatever ran before this one
        let previous = {
            let mut active = self.lock_active();
            active.replace(Arc::clone(&game))
        };
        if let Some(previous) = previous {
            previous.shutdown();
        }

        game.show_idle();
        // the game paints its own HUD onto key 0; the back control wins
        self.io.set_key(BACK_KEY, TileView::Banner(Banner::BackToMenu));
    }

    /// Stop the active game (if any) and drop back to the menu.
    pub fn stop_active(&self) {
        let previous = self.lock_active().take();
        if let Some(game) = previous {
            game.shutdown();
        }
    }

    pub fn on_key(&self, key: KeyIndex, pressed: bool) {
        log::trace!("key {key} {}", if pressed { "down" } else { "up" });
        let active = { self.lock_active().clone() };

        match active {
            Some(game) => {
                if pressed && key == BACK_KEY {
                    self.stop_active();
                    self.show_menu();
                } else {
                    game.on_key(key, pressed);
                }
            }
            None => {
                if !pressed {
                    return;
                }
                if let Some(entry) = self.entries.iter().find(|e| e.key == key) {
                    self.launch_entry(entry);
                }
            }
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn Game>>> {
        self.active.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ids_and_buttons_are_unique() {
        let entries = registry();

        let mut ids: Vec<&str> = entries.iter().map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), entries.len());

        let mut keys: Vec<KeyIndex> = entries.iter().map(|e| e.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), entries.len());
        assert!(keys.iter().all(|&k| k != BACK_KEY && k < PANEL_KEYS));
    }
}
