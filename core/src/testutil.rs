//! Shared fixtures for the engine's unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::audio::{AudioSink, Cue};
use crate::game::GameIo;
use crate::scores::MemoryScoreStore;
use crate::types::KeyIndex;
use crate::view::{KeySink, TileView};
use crate::AudioPolicy;

/// Sink that remembers the latest view per key and the full paint log.
#[derive(Default)]
pub struct RecordingSink {
    log: Mutex<Vec<(KeyIndex, TileView)>>,
    latest: Mutex<BTreeMap<KeyIndex, TileView>>,
}

impl RecordingSink {
    pub fn view_at(&self, key: KeyIndex) -> Option<TileView> {
        self.latest.lock().unwrap().get(&key).copied()
    }

    pub fn paints(&self) -> Vec<(KeyIndex, TileView)> {
        self.log.lock().unwrap().clone()
    }

    pub fn paint_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl KeySink for RecordingSink {
    fn set_key(&self, key: KeyIndex, view: TileView) {
        self.log.lock().unwrap().push((key, view));
        self.latest.lock().unwrap().insert(key, view);
    }
}

#[derive(Default)]
pub struct RecordingAudio {
    cues: Mutex<Vec<Cue>>,
}

impl RecordingAudio {
    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingAudio {
    fn play(&self, cue: Cue) {
        self.cues.lock().unwrap().push(cue);
    }
}

pub struct TestRig {
    pub io: GameIo,
    pub sink: Arc<RecordingSink>,
    pub audio: Arc<RecordingAudio>,
    pub scores: Arc<MemoryScoreStore>,
}

pub fn rig() -> TestRig {
    let sink = Arc::new(RecordingSink::default());
    let audio = Arc::new(RecordingAudio::default());
    let scores = Arc::new(MemoryScoreStore::default());
    let io = GameIo {
        sink: sink.clone(),
        audio: Arc::new(AudioPolicy::new(audio.clone())),
        scores: scores.clone(),
    };
    TestRig {
        io,
        sink,
        audio,
        scores,
    }
}
