use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::sched::lock;

/// Short synthesized effects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sound {
    Start,
    Reveal,
    Flood,
    Explosion,
    Flip,
    Match,
    NoMatch,
    Eat,
    Move,
    Die,
    Show,
    Correct,
    Wrong,
    LevelUp,
    Go,
    Hit,
    Miss,
    Tick,
    Milestone,
    Win,
    Lose,
    NewBest,
    Complete,
}

/// Character voice lines, rate-limited separately from effects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Voice {
    Start,
    GameOver,
    Win,
    Lose,
    NewBest,
    Milestone,
    LevelUp,
    Correct,
    FastReaction,
    SlowFail,
}

/// One playback request handed to the sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cue {
    Sfx(Sound),
    Voice(Voice),
}

impl Cue {
    /// Stable identifier the sink maps to an actual asset.
    pub const fn id(self) -> &'static str {
        match self {
            Cue::Sfx(sound) => match sound {
                Sound::Start => "start",
                Sound::Reveal => "reveal",
                Sound::Flood => "empty_flood",
                Sound::Explosion => "mine",
                Sound::Flip => "flip",
                Sound::Match => "match",
                Sound::NoMatch => "nomatch",
                Sound::Eat => "eat",
                Sound::Move => "move",
                Sound::Die => "die",
                Sound::Show => "show",
                Sound::Correct => "correct",
                Sound::Wrong => "wrong",
                Sound::LevelUp => "level_up",
                Sound::Go => "go",
                Sound::Hit => "hit",
                Sound::Miss => "miss",
                Sound::Tick => "tick",
                Sound::Milestone => "milestone",
                Sound::Win => "win",
                Sound::Lose => "lose",
                Sound::NewBest => "newbest",
                Sound::Complete => "complete",
            },
            Cue::Voice(voice) => match voice {
                Voice::Start => "voice_start",
                Voice::GameOver => "voice_gameover",
                Voice::Win => "voice_win",
                Voice::Lose => "voice_lose",
                Voice::NewBest => "voice_newbest",
                Voice::Milestone => "voice_milestone",
                Voice::LevelUp => "voice_levelup",
                Voice::Correct => "voice_correct",
                Voice::FastReaction => "voice_fast",
                Voice::SlowFail => "voice_slow",
            },
        }
    }
}

/// Fire-and-forget playback sink. Implementations cap concurrent sounds
/// and evict the oldest; failures are swallowed, never surfaced.
pub trait AudioSink: Send + Sync {
    fn play(&self, cue: Cue);

    /// Kill anything still playing. Called on teardown.
    fn stop_all(&self) {}
}

/// Sink that drops every cue. Useful when audio is not wired up.
#[derive(Debug, Default)]
pub struct SilentAudio;

impl AudioSink for SilentAudio {
    fn play(&self, _cue: Cue) {}
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Channels: u8 {
        const SFX   = 1;
        const VOICE = 1 << 1;
    }
}

const VOICE_COOLDOWN: Duration = Duration::from_secs(4);

/// Per-process audio gatekeeping: independent enable flags per channel, a
/// global mute, and a cooldown between voice lines. Instance state, so
/// multiple games or repeated test runs never share leftovers.
pub struct AudioPolicy {
    sink: Arc<dyn AudioSink>,
    enabled: Mutex<Channels>,
    muted: AtomicBool,
    voice_cooldown: Duration,
    last_voice: Mutex<Option<Instant>>,
}

impl AudioPolicy {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            enabled: Mutex::new(Channels::all()),
            muted: AtomicBool::new(false),
            voice_cooldown: VOICE_COOLDOWN,
            last_voice: Mutex::new(None),
        }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(SilentAudio))
    }

    pub fn set_enabled(&self, channels: Channels, on: bool) {
        let mut enabled = lock(&self.enabled);
        if on {
            enabled.insert(channels);
        } else {
            enabled.remove(channels);
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn sfx(&self, sound: Sound) {
        if self.channel_open(Channels::SFX) {
            self.sink.play(Cue::Sfx(sound));
        }
    }

    /// Plays a voice line unless one played within the cooldown window.
    pub fn voice(&self, voice: Voice) {
        if !self.channel_open(Channels::VOICE) {
            return;
        }
        let now = Instant::now();
        let mut last = lock(&self.last_voice);
        if let Some(at) = *last {
            if now.duration_since(at) < self.voice_cooldown {
                return;
            }
        }
        *last = Some(now);
        drop(last);
        self.sink.play(Cue::Voice(voice));
    }

    pub fn stop_all(&self) {
        self.sink.stop_all();
    }

    fn channel_open(&self, channel: Channels) -> bool {
        !self.muted.load(Ordering::Relaxed) && lock(&self.enabled).contains(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        cues: Mutex<Vec<Cue>>,
    }

    impl AudioSink for Recorder {
        fn play(&self, cue: Cue) {
            self.cues.lock().unwrap().push(cue);
        }
    }

    fn policy() -> (AudioPolicy, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (AudioPolicy::new(recorder.clone()), recorder)
    }

    #[test]
    fn mute_silences_every_channel() {
        let (policy, recorder) = policy();
        policy.set_muted(true);

        policy.sfx(Sound::Start);
        policy.voice(Voice::Start);

        assert!(recorder.cues.lock().unwrap().is_empty());
    }

    #[test]
    fn channel_flags_are_independent() {
        let (policy, recorder) = policy();
        policy.set_enabled(Channels::VOICE, false);

        policy.voice(Voice::Win);
        policy.sfx(Sound::Win);

        assert_eq!(*recorder.cues.lock().unwrap(), vec![Cue::Sfx(Sound::Win)]);
    }

    #[test]
    fn voice_lines_respect_the_cooldown() {
        let (policy, recorder) = policy();

        policy.voice(Voice::Start);
        policy.voice(Voice::Milestone); // inside the cooldown window

        assert_eq!(
            *recorder.cues.lock().unwrap(),
            vec![Cue::Voice(Voice::Start)]
        );
    }

    #[test]
    fn cue_ids_distinguish_voice_from_sfx() {
        assert_eq!(Cue::Sfx(Sound::Win).id(), "win");
        assert_eq!(Cue::Voice(Voice::Win).id(), "voice_win");
    }
}
