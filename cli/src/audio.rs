//! Audio through an external player process, one child per sound.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use padcade_core::{AudioSink, Cue};

const MAX_CONCURRENT: usize = 4;

/// Spawns `player <dir>/<cue>.wav` per cue. Children are reaped on every
/// call; when the cap is hit the oldest player is killed to make room.
pub struct ProcessAudioSink {
    player: String,
    dir: PathBuf,
    children: Mutex<Vec<Child>>,
}

impl ProcessAudioSink {
    pub fn new(player: String, dir: PathBuf) -> Self {
        Self {
            player,
            dir,
            children: Mutex::new(Vec::new()),
        }
    }
}

impl AudioSink for ProcessAudioSink {
    fn play(&self, cue: Cue) {
        let path = self.dir.join(format!("{}.wav", cue.id()));
        if !path.is_file() {
            log::debug!("no sound file for cue {:?} at {}", cue, path.display());
            return;
        }

        let mut children = self
            .children
            .lock()
            .unwrap_or_else(|err| err.into_inner());

        // reap finished players so they don't accumulate as zombies
        children.retain_mut(|child| matches!(child.try_wait(), Ok(None)));

        while children.len() >= MAX_CONCURRENT {
            let mut oldest = children.remove(0);
            let _ = oldest.kill();
            let _ = oldest.wait();
        }

        match Command::new(&self.player)
            .arg(&path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => children.push(child),
            Err(err) => log::warn!("audio player {} failed: {err}", self.player),
        }
    }

    fn stop_all(&self) {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        for mut child in children.drain(..) {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
