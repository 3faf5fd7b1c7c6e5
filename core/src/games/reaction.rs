use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use rand::SeedableRng;

use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::{GridMap, KeyIndex};
use crate::view::{Banner, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "reaction";
const GRID: GridMap = GridMap::new(3, 8, 1);
const START_KEY: KeyIndex = 20;
const TOTAL_ROUNDS: u8 = 10;
const PENALTY_MS: u16 = 999;
const BEST_DEFAULT: i64 = 99_999;
const POLICY: ScorePolicy = ScorePolicy::LowerIsBetter;

const ARM_DELAY_MS: core::ops::RangeInclusive<u64> = 1_000..=4_000;
const WINDOW_START: Duration = Duration::from_millis(2_000);
const WINDOW_END: Duration = Duration::from_millis(800);
const FEEDBACK_TIME: Duration = Duration::from_millis(800);
const ROUND_GAP: Duration = Duration::from_millis(500);
const FAST_MS: u16 = 300;

/// Where the current round stands while the game is in `Playing`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RoundState {
    /// Dark grid, go signal pending. Any press is an early press.
    Waiting,
    /// Target lit; the press race is on.
    Ready { target: KeyIndex, since: Instant },
    /// Showing hit/penalty feedback; input is ignored.
    Feedback,
}

/// How long the target stays lit, shrinking linearly across the session.
fn window_for_round(round: u8) -> Duration {
    let steps = u32::from(TOTAL_ROUNDS - 1);
    let progress = u32::from(round.saturating_sub(1)).min(steps);
    let span = (WINDOW_START - WINDOW_END).as_millis() as u32;
    WINDOW_START - Duration::from_millis(u64::from(span * progress / steps))
}

struct ReactionState {
    round: u8,
    times: Vec<u16>,
    best_ever: i64,
    round_state: RoundState,
    phase: Phase,
    rng: SmallRng,
}

impl ReactionState {
    fn new(seed: u64, best_ever: i64) -> Self {
        Self {
            round: 0,
            times: Vec::new(),
            best_ever,
            round_state: RoundState::Waiting,
            phase: Phase::Idle,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Best valid reaction this session, penalties excluded.
    fn session_best(&self) -> Option<u16> {
        self.times.iter().copied().filter(|&t| t < PENALTY_MS).min()
    }

    fn session_avg(&self) -> u32 {
        if self.times.is_empty() {
            return 0;
        }
        self.times.iter().map(|&t| u32::from(t)).sum::<u32>() / self.times.len() as u32
    }

    fn hud(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        batch.push((0, TileView::Stat(Stat::Title("REACT"))));
        batch.push((
            1,
            TileView::Stat(Stat::Round {
                current: self.round,
                total: TOTAL_ROUNDS,
            }),
        ));
        let best = match self.session_best() {
            Some(ms) => TileView::Stat(Stat::LastMs(ms)),
            None => TileView::Stat(Stat::BestUnset),
        };
        batch.push((2, best));
        batch.push((3, TileView::Stat(Stat::AvgMs(self.session_avg()))));
        let last = self.times.last().copied().unwrap_or(0);
        batch.push((4, TileView::Stat(Stat::LastMs(last))));
        let indicator = match self.round_state {
            RoundState::Waiting if self.phase.is_playing() => TileView::Stat(Stat::Wait),
            RoundState::Ready { .. } => TileView::Stat(Stat::Go),
            _ => TileView::Blank,
        };
        batch.push((5, indicator));
        let personal = if self.best_ever < BEST_DEFAULT {
            TileView::Stat(Stat::Best(self.best_ever))
        } else {
            TileView::Blank
        };
        batch.push((6, personal));
        batch.push((7, TileView::Blank));
        batch
    }

    fn dark_grid(&self) -> PaintBatch {
        GRID.keys().map(|key| (key, TileView::Blank)).collect()
    }
}

/// Reaction speed test: ten rounds of wait-for-green. Early presses,
/// wrong cells, and expired targets all score the penalty value.
pub struct ReactionGame {
    io: GameIo,
    state: Mutex<ReactionState>,
    /// The one pending round event: go signal, expiry, or advance.
    round: TimerSlot,
    weak: Weak<ReactionGame>,
}

impl ReactionGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, BEST_DEFAULT);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(ReactionState::new(seed, best)),
            round: TimerSlot::new(),
            weak: weak.clone(),
        })
    }

    fn start(&self) {
        let batch = {
            let mut state = lock(&self.state);
            self.round.cancel();
            state.round = 0;
            state.times.clear();
            state.phase = Phase::Playing;
            state.round_state = RoundState::Waiting;
            self.begin_round(&mut state);

            let mut batch = state.hud();
            batch.extend(state.dark_grid());
            batch
        };
        self.io.paint(&batch);
        self.io.audio.voice(Voice::Start);
    }

    /// Must hold the lock. Advances the round counter and arms the
    /// randomized go delay.
    fn begin_round(&self, state: &mut ReactionState) {
        state.round += 1;
        state.round_state = RoundState::Waiting;
        let delay = Duration::from_millis(state.rng.random_range(ARM_DELAY_MS));
        let weak = self.weak.clone();
        self.round.arm(delay, move || {
            if let Some(game) = weak.upgrade() {
                game.go();
            }
        });
    }

    /// The go signal: light a random cell and start the expiry clock.
    fn go(&self) {
        let update = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() || state.round_state != RoundState::Waiting {
                return;
            }
            let keys: Vec<KeyIndex> = GRID.keys().collect();
            let target = *keys.choose(&mut state.rng).expect("grid is never empty");
            state.round_state = RoundState::Ready {
                target,
                since: Instant::now(),
            };

            let window = window_for_round(state.round);
            let weak = self.weak.clone();
            self.round.arm(window, move || {
                if let Some(game) = weak.upgrade() {
                    game.target_expired();
                }
            });

            let mut batch = state.hud();
            batch.push((target, TileView::Target));
            batch
        };
        self.io.paint(&update);
        self.io.audio.sfx(Sound::Go);
    }

    /// Target outlived its window: score the penalty.
    fn target_expired(&self) {
        let batch = {
            let mut state = lock(&self.state);
            let RoundState::Ready { target, .. } = state.round_state else {
                return;
            };
            if !state.phase.is_playing() {
                return;
            }
            state.round_state = RoundState::Feedback;
            state.times.push(PENALTY_MS);
            self.arm_advance(state.round >= TOTAL_ROUNDS);

            let mut batch = state.hud();
            batch.push((target, TileView::FlashBad));
            batch
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Miss);
        self.io.audio.voice(Voice::SlowFail);
    }

    /// Schedule the post-feedback step: next round or the results.
    fn arm_advance(&self, last_round: bool) {
        let weak = self.weak.clone();
        self.round.arm(FEEDBACK_TIME, move || {
            let Some(game) = weak.upgrade() else { return };
            if last_round {
                game.finish();
            } else {
                game.next_round();
            }
        });
    }

    fn next_round(&self) {
        let batch = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() || state.round_state != RoundState::Feedback {
                return;
            }
            // brief gap, then the next waiting period
            state.round_state = RoundState::Waiting;
            let weak = self.weak.clone();
            self.round.arm(ROUND_GAP, move || {
                let Some(game) = weak.upgrade() else { return };
                let batch = {
                    let mut state = lock(&game.state);
                    if !state.phase.is_playing() || state.round_state != RoundState::Waiting {
                        return;
                    }
                    game.begin_round(&mut state);
                    let mut batch = state.hud();
                    batch.extend(state.dark_grid());
                    batch
                };
                game.io.paint(&batch);
            });
            state.dark_grid()
        };
        self.io.paint(&batch);
    }

    fn finish(&self) {
        let (batch, new_best) = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }
            state.phase = Phase::Over(Outcome::Won);
            self.round.cancel();

            let session = state.session_best().map(i64::from);
            let new_best = session.is_some_and(|ms| POLICY.improves(ms, state.best_ever));
            if let Some(ms) = session {
                if new_best {
                    state.best_ever = ms;
                    self.io.scores.save_best(GAME_ID, ms);
                }
            }

            let mut batch = state.hud();
            batch.extend(state.dark_grid());
            batch.push((11, TileView::Stat(Stat::AvgMs(state.session_avg()))));
            if let Some(ms) = state.session_best() {
                batch.push((12, TileView::Stat(Stat::LastMs(ms))));
            }
            if new_best {
                batch.push((13, TileView::Banner(Banner::NewBest)));
            }
            batch.push((18, TileView::Banner(Banner::GameOver)));
            batch.push((19, TileView::Banner(Banner::GameOver)));
            batch.push((START_KEY, TileView::Banner(Banner::Start)));
            (batch, new_best)
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Complete);
        if new_best {
            self.io.audio.voice(Voice::NewBest);
        }
    }

    fn press(&self, key: KeyIndex) {
        enum PressResult {
            Early,
            Hit(u16),
            WrongCell,
        }

        let (batch, result) = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }

            match state.round_state {
                RoundState::Feedback => return,
                RoundState::Waiting => {
                    // pressed before the go signal
                    self.round.cancel();
                    state.round_state = RoundState::Feedback;
                    state.times.push(PENALTY_MS);
                    self.arm_advance(state.round >= TOTAL_ROUNDS);

                    let mut batch = state.hud();
                    batch.push((key, TileView::FlashBad));
                    (batch, PressResult::Early)
                }
                RoundState::Ready { target, since } => {
                    self.round.cancel();
                    state.round_state = RoundState::Feedback;

                    if key == target {
                        let ms = since.elapsed().as_millis().min(u128::from(PENALTY_MS - 1)) as u16;
                        state.times.push(ms);
                        self.arm_advance(state.round >= TOTAL_ROUNDS);

                        let mut batch = state.hud();
                        batch.push((key, TileView::ReactionMs(ms)));
                        (batch, PressResult::Hit(ms))
                    } else {
                        state.times.push(PENALTY_MS);
                        self.arm_advance(state.round >= TOTAL_ROUNDS);

                        let mut batch = state.hud();
                        batch.push((key, TileView::FlashBad));
                        batch.push((target, TileView::Blank));
                        (batch, PressResult::WrongCell)
                    }
                }
            }
        };
        self.io.paint(&batch);

        match result {
            PressResult::Hit(ms) => {
                self.io.audio.sfx(Sound::Hit);
                if ms < FAST_MS {
                    self.io.audio.voice(Voice::FastReaction);
                }
            }
            PressResult::Early | PressResult::WrongCell => {
                self.io.audio.sfx(Sound::Miss);
                self.io.audio.voice(Voice::SlowFail);
            }
        }
    }

    #[cfg(test)]
    fn rig_ready(&self, target: KeyIndex, elapsed: Duration) {
        let mut state = lock(&self.state);
        state.round_state = RoundState::Ready {
            target,
            since: Instant::now() - elapsed,
        };
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, u8, Vec<u16>, bool) {
        let state = lock(&self.state);
        let feedback = state.round_state == RoundState::Feedback;
        (state.phase, state.round, state.times.clone(), feedback)
    }
}

impl Game for ReactionGame {
    fn title(&self) -> &'static str {
        "REACT"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            state.round = 0;
            state.times.clear();
            state.round_state = RoundState::Waiting;
            self.round.cancel();

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

        if GRID.contains_key(key) {
            self.press(key);
        }
    }

    fn shutdown(&self) {
        self.round.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::ScoreStore;
    use crate::testutil::rig;

    fn started_game() -> (Arc<ReactionGame>, crate::testutil::TestRig) {
        let rig = rig();
        let game = ReactionGame::new(rig.io.clone(), 41);
        game.on_key(START_KEY, true);
        (game, rig)
    }

    #[test]
    fn window_shrinks_linearly_and_clamps() {
        assert_eq!(window_for_round(1), WINDOW_START);
        assert_eq!(window_for_round(TOTAL_ROUNDS), WINDOW_END);
        assert!(window_for_round(5) < WINDOW_START);
        assert!(window_for_round(5) > WINDOW_END);
        // rounds past the table stay at the fastest window
        assert_eq!(window_for_round(200), WINDOW_END);
        assert_eq!(window_for_round(0), WINDOW_START);
    }

    #[test]
    fn early_press_scores_the_penalty_and_waits_out_the_display() {
        let (game, _rig) = started_game();

        game.on_key(GRID.cell_to_key((1, 2)), true);

        let (phase, round, times, feedback) = game.snapshot();
        assert!(phase.is_playing());
        assert_eq!(times, vec![PENALTY_MS]);
        assert!(feedback, "round sits in feedback until the delay elapses");
        assert_eq!(round, 1);
        assert!(game.round.is_armed(), "the advance is scheduled, not instant");

        // what the pending advance will do: next round only after the gap
        game.next_round();
        let (_, round, _, _) = game.snapshot();
        assert_eq!(round, 1, "round counter moves when the gap timer fires");
        game.shutdown();
    }

    #[test]
    fn hitting_the_target_records_the_elapsed_time() {
        let (game, _rig) = started_game();
        game.round.cancel(); // suppress the pending go signal
        let target = GRID.cell_to_key((0, 5));
        game.rig_ready(target, Duration::from_millis(150));

        game.on_key(target, true);

        let (_, _, times, _) = game.snapshot();
        assert_eq!(times.len(), 1);
        assert!(times[0] >= 150 && times[0] < PENALTY_MS, "got {}", times[0]);
        game.shutdown();
    }

    #[test]
    fn wrong_cell_scores_the_penalty_and_clears_the_target() {
        let (game, rig) = started_game();
        game.round.cancel();
        let target = GRID.cell_to_key((0, 5));
        game.rig_ready(target, Duration::from_millis(100));

        game.on_key(GRID.cell_to_key((2, 2)), true);

        let (_, _, times, _) = game.snapshot();
        assert_eq!(times, vec![PENALTY_MS]);
        assert_eq!(rig.sink.view_at(target), Some(TileView::Blank));
        game.shutdown();
    }

    #[test]
    fn expired_target_scores_the_penalty() {
        let (game, _rig) = started_game();
        game.round.cancel();
        game.rig_ready(GRID.cell_to_key((1, 1)), Duration::ZERO);

        game.target_expired();

        let (_, _, times, feedback) = game.snapshot();
        assert_eq!(times, vec![PENALTY_MS]);
        assert!(feedback);
        game.shutdown();
    }

    #[test]
    fn session_completes_after_the_final_round() {
        let (game, rig) = started_game();
        game.round.cancel();

        for round in 0..TOTAL_ROUNDS {
            let target = GRID.cell_to_key((0, 0));
            game.rig_ready(target, Duration::from_millis(120));
            game.on_key(target, true);

            if round < TOTAL_ROUNDS - 1 {
                // fold the feedback + gap timers by hand
                game.next_round();
                game.round.cancel();
                let mut state = lock(&game.state);
                state.round += 1;
                state.round_state = RoundState::Waiting;
            } else {
                game.finish();
            }
        }

        let (phase, _, times, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Won));
        assert_eq!(times.len(), usize::from(TOTAL_ROUNDS));
        assert!(rig.scores.load_best(GAME_ID, BEST_DEFAULT) < BEST_DEFAULT);
        game.shutdown();
    }

    #[test]
    fn presses_are_ignored_after_the_session_ends() {
        let (game, rig) = started_game();
        game.round.cancel();
        {
            let mut state = lock(&game.state);
            state.phase = Phase::Over(Outcome::Won);
        }
        rig.sink.clear_log();

        game.on_key(GRID.cell_to_key((1, 4)), true);

        assert_eq!(rig.sink.paint_count(), 0);
    }
}
