use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;

use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, Ramp, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::{Coord2, GridMap, KeyIndex};
use crate::view::{Banner, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "beaver";
const GRID: GridMap = GridMap::new(3, 8, 1);
const START_KEY: KeyIndex = 20;
const GAME_DURATION: u32 = 45;
const LEVEL_EVERY: u32 = 3;
const POLICY: ScorePolicy = ScorePolicy::HigherIsBetter;

const CLOCK_TICK: Duration = Duration::from_secs(1);
const CATCH_FLASH: Duration = Duration::from_millis(150);
const MISS_FLASH: Duration = Duration::from_millis(300);
const WARN_SECONDS: u32 = 5;

/// The beaver escapes 2.5 s after spawning at level 1, 150 ms sooner per
/// level, never under 450 ms.
fn escape_ramp() -> Ramp {
    Ramp::new(
        Duration::from_millis(2_500),
        Duration::from_millis(450),
        Duration::from_millis(150),
    )
}

struct BeaverState {
    score: u32,
    best: i64,
    level: u32,
    catches_this_level: u32,
    time_left: u32,
    beaver: Option<Coord2>,
    phase: Phase,
    rng: SmallRng,
}

impl BeaverState {
    fn new(seed: u64, best: i64) -> Self {
        Self {
            score: 0,
            best,
            level: 1,
            catches_this_level: 0,
            time_left: GAME_DURATION,
            beaver: None,
            phase: Phase::Idle,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn escape_timeout(&self) -> Duration {
        escape_ramp().interval(i64::from(self.level) - 1)
    }

    fn hud(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        batch.push((0, TileView::Stat(Stat::Title("BEAVER"))));
        batch.push((1, TileView::Stat(Stat::Score(self.score))));
        batch.push((2, TileView::Stat(Stat::Best(self.best))));
        batch.push((3, TileView::Stat(Stat::TimerSecs(self.time_left))));
        batch.push((4, TileView::Stat(Stat::Level(self.level))));
        batch.push((
            5,
            TileView::Stat(Stat::SpeedMs(self.escape_timeout().as_millis() as u32)),
        ));
        for key in 6..GRID.first_key() {
            batch.push((key, TileView::Blank));
        }
        batch
    }
}

/// Whack-the-beaver against a 45-second clock. Catches speed up the
/// escape timer every third hit; wrong cells cost a point.
pub struct BeaverGame {
    io: GameIo,
    state: Mutex<BeaverState>,
    clock: TimerSlot,
    /// Beaver presence: the escape timeout or the respawn-after-catch.
    escape: TimerSlot,
    /// Miss feedback restore.
    flash: TimerSlot,
    weak: Weak<BeaverGame>,
}

impl BeaverGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, 0);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(BeaverState::new(seed, best)),
            clock: TimerSlot::new(),
            escape: TimerSlot::new(),
            flash: TimerSlot::new(),
            weak: weak.clone(),
        })
    }

    fn start(&self) {
        let batch = {
            let mut state = lock(&self.state);
            self.clock.cancel();
            self.escape.cancel();
            self.flash.cancel();
            state.score = 0;
            state.level = 1;
            state.catches_this_level = 0;
            state.time_left = GAME_DURATION;
            state.beaver = None;
            state.phase = Phase::Playing;

            self.spawn_beaver(&mut state);
            self.arm_clock();

            let mut batch = state.hud();
            for key in GRID.keys() {
                let view = match state.beaver {
                    Some(cell) if GRID.cell_to_key(cell) == key => TileView::Beaver,
                    _ => TileView::Blank,
                };
                batch.push((key, view));
            }
            batch
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Start);
        self.io.audio.voice(Voice::Start);
    }

    /// Must hold the lock. Moves the beaver to a fresh cell and arms its
    /// escape timeout; painting stays with the caller or the callback.
    fn spawn_beaver(&self, state: &mut BeaverState) {
        let previous = state.beaver;
        let open: Vec<Coord2> = GRID.cells().filter(|&c| Some(c) != previous).collect();
        state.beaver = open.choose(&mut state.rng).copied();

        let timeout = state.escape_timeout();
        let weak = self.weak.clone();
        self.escape.arm(timeout, move || {
            if let Some(game) = weak.upgrade() {
                game.beaver_escaped();
            }
        });
    }

    /// Not caught in time: relocate without scoring.
    fn beaver_escaped(&self) {
        let batch = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }
            let old = state.beaver;
            self.spawn_beaver(&mut state);

            let mut batch = PaintBatch::new();
            if let Some(cell) = old {
                batch.push((GRID.cell_to_key(cell), TileView::Blank));
            }
            if let Some(cell) = state.beaver {
                batch.push((GRID.cell_to_key(cell), TileView::Beaver));
            }
            batch
        };
        self.io.paint(&batch);
    }

    fn arm_clock(&self) {
        let weak = self.weak.clone();
        self.clock.arm(CLOCK_TICK, move || {
            if let Some(game) = weak.upgrade() {
                game.clock_tick();
            }
        });
    }

    fn clock_tick(&self) {
        let mut warn = false;
        let mut finished = false;
        let (batch, new_best) = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }
            state.time_left = state.time_left.saturating_sub(1);

            if state.time_left == 0 {
                finished = true;
                let new_best = self.finish_session(&mut state);
                (self.over_screen(&state), new_best)
            } else {
                warn = state.time_left <= WARN_SECONDS;
                self.arm_clock();
                (state.hud(), false)
            }
        };
        self.io.paint(&batch);

        if finished {
            if new_best {
                self.io.audio.sfx(Sound::NewBest);
                self.io.audio.voice(Voice::NewBest);
            } else {
                self.io.audio.sfx(Sound::Lose);
                self.io.audio.voice(Voice::GameOver);
            }
        } else if warn {
            self.io.audio.sfx(Sound::Tick);
        }
    }

    /// Must hold the lock. Clock ran out: stop everything and commit the
    /// best score.
    fn finish_session(&self, state: &mut BeaverState) -> bool {
        state.phase = Phase::Over(Outcome::Won);
        state.beaver = None;
        self.clock.cancel();
        self.escape.cancel();
        self.flash.cancel();

        let new_best = state.score > 0 && POLICY.improves(i64::from(state.score), state.best);
        if new_best {
            state.best = i64::from(state.score);
            self.io.scores.save_best(GAME_ID, state.best);
        }
        new_best
    }

    fn over_screen(&self, state: &BeaverState) -> PaintBatch {
        let mut batch = state.hud();
        for key in GRID.keys() {
            let view = match key {
                START_KEY => TileView::Banner(Banner::Start),
                18 | 19 | 21 => TileView::Banner(Banner::GameOver),
                _ => TileView::Blank,
            };
            batch.push((key, view));
        }
        batch
    }

    fn tap(&self, cell: Coord2) {
        enum TapResult {
            Catch { leveled: bool },
            Miss,
        }

        let (batch, result) = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }

            let mut batch = PaintBatch::new();
            if state.beaver == Some(cell) {
                state.score += 1;
                state.catches_this_level += 1;
                let mut leveled = false;
                if state.catches_this_level >= LEVEL_EVERY {
                    state.catches_this_level = 0;
                    state.level += 1;
                    leveled = true;
                }

                // splash, then respawn through the beaver-presence slot
                state.beaver = None;
                let weak = self.weak.clone();
                self.escape.arm(CATCH_FLASH, move || {
                    let Some(game) = weak.upgrade() else { return };
                    let batch = {
                        let mut state = lock(&game.state);
                        if !state.phase.is_playing() {
                            return;
                        }
                        let splash = cell;
                        game.spawn_beaver(&mut state);

                        let mut batch = PaintBatch::new();
                        batch.push((GRID.cell_to_key(splash), TileView::Blank));
                        if let Some(pos) = state.beaver {
                            batch.push((GRID.cell_to_key(pos), TileView::Beaver));
                        }
                        batch
                    };
                    game.io.paint(&batch);
                });

                batch.push((GRID.cell_to_key(cell), TileView::Splash));
                batch.extend(state.hud());
                (batch, TapResult::Catch { leveled })
            } else {
                state.score = state.score.saturating_sub(1);

                let weak = self.weak.clone();
                self.flash.arm(MISS_FLASH, move || {
                    let Some(game) = weak.upgrade() else { return };
                    let view = {
                        let state = lock(&game.state);
                        if !state.phase.is_playing() {
                            return;
                        }
                        // the beaver may have moved onto the flashed cell
                        if state.beaver == Some(cell) {
                            TileView::Beaver
                        } else {
                            TileView::Blank
                        }
                    };
                    game.io.set_key(GRID.cell_to_key(cell), view);
                });

                batch.push((GRID.cell_to_key(cell), TileView::FlashBad));
                batch.extend(state.hud());
                (batch, TapResult::Miss)
            }
        };
        self.io.paint(&batch);

        match result {
            TapResult::Catch { leveled } => {
                self.io.audio.sfx(if leveled { Sound::LevelUp } else { Sound::Hit });
                if leveled {
                    self.io.audio.voice(Voice::LevelUp);
                }
            }
            TapResult::Miss => self.io.audio.sfx(Sound::Miss),
        }
    }

    #[cfg(test)]
    fn rig_beaver(&self, cell: Coord2) {
        let mut state = lock(&self.state);
        state.beaver = Some(cell);
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, u32, u32, u32, Option<Coord2>) {
        let state = lock(&self.state);
        (
            state.phase,
            state.score,
            state.level,
            state.time_left,
            state.beaver,
        )
    }
}

impl Game for BeaverGame {
    fn title(&self) -> &'static str {
        "BEAVER"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            state.beaver = None;
            self.clock.cancel();
            self.escape.cancel();
            self.flash.cancel();

            let mut batch = state.hud();
            for key in GRID.keys() {
                let view = if key == START_KEY {
                    TileView::Banner(Banner::Start)
                } else {
                    TileView::Blank
                };
                batch.push((key, view));
            }
            batch
        };
        self.io.paint(&batch);
    }

    fn on_key(&self, key: KeyIndex, pressed: bool) {
        if !pressed {
            return;
        }

        if key == START_KEY && lock(&self.state).phase.accepts_start() {
            self.start();
            return;
        }

        if let Some(cell) = GRID.key_to_cell(key) {
            self.tap(cell);
        }
    }

    fn shutdown(&self) {
        self.clock.cancel();
        self.escape.cancel();
        self.flash.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::ScoreStore;
    use crate::testutil::rig;

    fn playing_game() -> (Arc<BeaverGame>, crate::testutil::TestRig) {
        let rig = rig();
        let game = BeaverGame::new(rig.io.clone(), 51);
        game.on_key(START_KEY, true);
        (game, rig)
    }

    #[test]
    fn catching_scores_and_levels_every_third_hit() {
        let (game, _rig) = playing_game();

        for _ in 0..LEVEL_EVERY {
            game.escape.cancel();
            game.rig_beaver((1, 1));
            game.on_key(GRID.cell_to_key((1, 1)), true);
        }

        let (_, score, level, _, _) = game.snapshot();
        assert_eq!(score, LEVEL_EVERY);
        assert_eq!(level, 2);
        game.shutdown();
    }

    #[test]
    fn missing_costs_a_point_but_never_goes_negative() {
        let (game, _rig) = playing_game();
        game.escape.cancel();
        game.rig_beaver((0, 0));

        game.on_key(GRID.cell_to_key((2, 7)), true);

        let (_, score, _, _, _) = game.snapshot();
        assert_eq!(score, 0, "score floors at zero");
        game.shutdown();
    }

    #[test]
    fn escape_timeout_ramps_down_to_its_floor() {
        let (game, _rig) = playing_game();
        let mut state = lock(&game.state);

        state.level = 1;
        assert_eq!(state.escape_timeout(), Duration::from_millis(2_500));
        state.level = 2;
        assert_eq!(state.escape_timeout(), Duration::from_millis(2_350));
        state.level = 1_000;
        assert_eq!(state.escape_timeout(), Duration::from_millis(450));
        drop(state);
        game.shutdown();
    }

    #[test]
    fn respawn_always_picks_a_fresh_cell() {
        let (game, _rig) = playing_game();

        for _ in 0..20 {
            let before = { lock(&game.state).beaver };
            {
                let mut state = lock(&game.state);
                game.spawn_beaver(&mut state);
            }
            let after = { lock(&game.state).beaver };
            assert_ne!(before, after);
            assert!(after.is_some());
        }
        game.shutdown();
    }

    #[test]
    fn clock_exhaustion_ends_the_session_and_commits_the_best() {
        let (game, rig) = playing_game();
        game.escape.cancel();
        game.rig_beaver((1, 1));
        game.on_key(GRID.cell_to_key((1, 1)), true); // score 1
        {
            let mut state = lock(&game.state);
            state.time_left = 1;
        }

        game.clock_tick();

        let (phase, _, _, time_left, beaver) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Won));
        assert_eq!(time_left, 0);
        assert_eq!(beaver, None);
        assert_eq!(rig.scores.load_best(GAME_ID, 0), 1);

        // stale taps on the finished board change nothing
        rig.sink.clear_log();
        game.on_key(GRID.cell_to_key((1, 1)), true);
        assert_eq!(rig.sink.paint_count(), 0);
        game.shutdown();
    }

    #[test]
    fn countdown_warns_over_the_final_seconds() {
        let (game, rig) = playing_game();
        {
            let mut state = lock(&game.state);
            state.time_left = WARN_SECONDS + 1;
        }

        game.clock_tick();

        let (_, _, _, time_left, _) = game.snapshot();
        assert_eq!(time_left, WARN_SECONDS);
        assert!(rig
            .audio
            .cues()
            .contains(&crate::Cue::Sfx(Sound::Tick)));
        game.shutdown();
    }
}
