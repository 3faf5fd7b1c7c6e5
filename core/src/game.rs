use std::sync::Arc;

use crate::audio::AudioPolicy;
use crate::scores::ScoreStore;
use crate::types::KeyIndex;
use crate::view::{KeySink, TileView};

/// Shared collaborators handed to every game at construction.
#[derive(Clone)]
pub struct GameIo {
    pub sink: Arc<dyn KeySink>,
    pub audio: Arc<AudioPolicy>,
    pub scores: Arc<dyn ScoreStore>,
}

impl GameIo {
    pub fn set_key(&self, key: KeyIndex, view: TileView) {
        self.sink.set_key(key, view);
    }

    pub fn paint(&self, batch: &[(KeyIndex, TileView)]) {
        self.sink.paint(batch);
    }
}

/// One self-contained game bound to the panel. The frontend constructs
/// it, shows the idle screen, and forwards every press/release event;
/// timers drive the rest from background threads.
pub trait Game: Send + Sync {
    fn title(&self) -> &'static str;

    /// Paint the title screen and drop back to the idle phase.
    fn show_idle(&self);

    /// Raw device event, invoked on an arbitrary thread. Release events
    /// and stale presses are ignored by the implementation.
    fn on_key(&self, key: KeyIndex, pressed: bool);

    /// Synchronously cancel every outstanding timer. The launcher calls
    /// this before switching away; no callback may mutate state after it
    /// returns.
    fn shutdown(&self);
}
