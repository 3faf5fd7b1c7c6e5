use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::{Coord2, GridMap, KeyIndex};
use crate::view::{Banner, ColorId, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "sequence";
const GRID: GridMap = GridMap::new(3, 8, 1);
const START_KEY: KeyIndex = 20;
const START_LEVEL: u32 = 4;
const PALETTE_SIZE: u8 = 8;
const POLICY: ScorePolicy = ScorePolicy::HigherIsBetter;

const REVEAL_TIME: Duration = Duration::from_millis(1500);
const TAP_FLASH: Duration = Duration::from_millis(150);
const ROUND_PAUSE: Duration = Duration::from_millis(600);
const OVER_DELAY: Duration = Duration::from_millis(1200);

fn number_color(value: u8) -> ColorId {
    (value - 1) % PALETTE_SIZE
}

struct SequenceState {
    /// The cells holding this round's numbers, 1-based values.
    slots: Vec<(Coord2, u8)>,
    hidden: bool,
    next_expected: u8,
    level: u32,
    best: i64,
    phase: Phase,
    rng: SmallRng,
}

impl SequenceState {
    fn new(seed: u64, best: i64) -> Self {
        Self {
            slots: Vec::new(),
            hidden: false,
            next_expected: 1,
            level: START_LEVEL,
            best,
            phase: Phase::Idle,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn number_at(&self, cell: Coord2) -> Option<u8> {
        self.slots
            .iter()
            .find(|&&(pos, _)| pos == cell)
            .map(|&(_, value)| value)
    }

    fn round_len(&self) -> u8 {
        self.level.min(u32::from(GRID.cell_count())) as u8
    }

    fn deal_round(&mut self) {
        let count = usize::from(self.round_len());
        let mut cells: Vec<Coord2> = GRID.cells().collect();
        cells.shuffle(&mut self.rng);
        self.slots = cells
            .into_iter()
            .take(count)
            .zip(1..)
            .map(|(cell, value)| (cell, value))
            .collect();
        self.hidden = false;
        self.next_expected = 1;
    }

    fn hud(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        batch.push((0, TileView::Stat(Stat::Title("RECALL"))));
        batch.push((1, TileView::Stat(Stat::Level(self.level))));
        batch.push((2, TileView::Stat(Stat::Best(self.best))));
        for key in 3..GRID.first_key() {
            batch.push((key, TileView::Blank));
        }
        batch
    }
}

/// Sequence memory: level N scatters the numbers 1..=N over the grid,
/// shows them briefly, then asks for them back in ascending order.
pub struct SequenceGame {
    io: GameIo,
    state: Mutex<SequenceState>,
    /// Hides the revealed numbers when the study window closes.
    reveal: TimerSlot,
    /// Tap flashes, the round pause, and the game-over screen.
    effect: TimerSlot,
    weak: Weak<SequenceGame>,
}

impl SequenceGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, 0);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(SequenceState::new(seed, best)),
            reveal: TimerSlot::new(),
            effect: TimerSlot::new(),
            weak: weak.clone(),
        })
    }

    fn start(&self) {
        {
            let mut state = lock(&self.state);
            self.reveal.cancel();
            self.effect.cancel();
            state.level = START_LEVEL;
            state.phase = Phase::Playing;
        }
        self.io.audio.sfx(Sound::Start);
        self.io.audio.voice(Voice::Start);
        self.show_round();
    }

    /// Deal and display the numbers for the current level, then arm the
    /// hide timer.
    fn show_round(&self) {
        let batch = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() && state.phase != Phase::RoundTransition {
                return;
            }
            state.phase = Phase::Playing;
            state.deal_round();

            let mut batch = state.hud();
            for key in GRID.keys() {
                batch.push((key, TileView::Blank));
            }
            for &(cell, value) in &state.slots {
                batch.push((
                    GRID.cell_to_key(cell),
                    TileView::SequenceNumber {
                        value,
                        color: number_color(value),
                    },
                ));
            }
            self.arm_hide();
            batch
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Show);
    }

    fn arm_hide(&self) {
        let weak = self.weak.clone();
        self.reveal.arm(REVEAL_TIME, move || {
            let Some(game) = weak.upgrade() else { return };
            let batch = {
                let mut state = lock(&game.state);
                if !state.phase.is_playing() || state.hidden {
                    return;
                }
                state.hidden = true;
                game.hide_batch(&state)
            };
            game.io.paint(&batch);
        });
    }

    /// '?' tiles over every number the player still has to find.
    fn hide_batch(&self, state: &SequenceState) -> PaintBatch {
        state
            .slots
            .iter()
            .filter(|&&(_, value)| value >= state.next_expected)
            .map(|&(cell, _)| (GRID.cell_to_key(cell), TileView::SequenceHidden))
            .collect()
    }

    fn tap(&self, cell: Coord2) {
        enum TapResult {
            Correct { finished_round: bool },
            Wrong { new_best: bool },
        }

        let (batch, result) = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }

            let mut batch = PaintBatch::new();

            if !state.hidden {
                // Numbers still on display: tapping "1" starts the round
                // early, anything else is ignored.
                if state.number_at(cell) != Some(1) {
                    return;
                }
                self.reveal.cancel();
                state.hidden = true;
                batch.extend(hide_rest(&state, cell));
            }

            match state.number_at(cell) {
                Some(value) if value == state.next_expected => {
                    state.next_expected += 1;
                    let finished_round = u32::from(state.next_expected) > state.level;
                    batch.push((GRID.cell_to_key(cell), TileView::FlashGood));
                    self.arm_tap_flash(cell, finished_round);
                    if finished_round {
                        state.phase = Phase::RoundTransition;
                    }
                    (batch, TapResult::Correct { finished_round })
                }
                _ => {
                    state.phase = Phase::Over(Outcome::Lost);
                    self.reveal.cancel();

                    let score = i64::from(state.level) - 1;
                    let new_best = score > 0 && POLICY.improves(score, state.best);
                    if new_best {
                        state.best = score;
                        self.io.scores.save_best(GAME_ID, score);
                    }

                    batch.push((GRID.cell_to_key(cell), TileView::FlashBad));
                    for &(pos, value) in &state.slots {
                        if pos != cell && value >= state.next_expected {
                            batch.push((
                                GRID.cell_to_key(pos),
                                TileView::SequenceNumber {
                                    value,
                                    color: number_color(value),
                                },
                            ));
                        }
                    }
                    self.arm_over_screen();
                    (batch, TapResult::Wrong { new_best })
                }
            }
        };
        self.io.paint(&batch);

        match result {
            TapResult::Correct { finished_round } => {
                self.io.audio.sfx(Sound::Correct);
                if finished_round {
                    self.io.audio.voice(Voice::Correct);
                }
            }
            TapResult::Wrong { new_best } => {
                self.io.audio.sfx(Sound::Wrong);
                if new_best {
                    self.io.audio.sfx(Sound::NewBest);
                    self.io.audio.voice(Voice::NewBest);
                } else {
                    self.io.audio.voice(Voice::GameOver);
                }
            }
        }
    }

    /// Clear the green flash; after the final number of a round, also
    /// schedule the next level.
    fn arm_tap_flash(&self, cell: Coord2, finished_round: bool) {
        let weak = self.weak.clone();
        self.effect.arm(TAP_FLASH, move || {
            let Some(game) = weak.upgrade() else { return };
            {
                let state = lock(&game.state);
                if !state.phase.is_playing() && state.phase != Phase::RoundTransition {
                    return;
                }
            }
            game.io.set_key(GRID.cell_to_key(cell), TileView::Blank);

            if finished_round {
                let advance = game.weak.clone();
                game.effect.arm(ROUND_PAUSE, move || {
                    let Some(game) = advance.upgrade() else { return };
                    let hud = {
                        let mut state = lock(&game.state);
                        if state.phase != Phase::RoundTransition {
                            return;
                        }
                        state.level += 1;
                        state.hud()
                    };
                    game.io.paint(&hud);
                    game.show_round();
                });
            }
        });
    }

    fn arm_over_screen(&self) {
        let weak = self.weak.clone();
        self.effect.arm(OVER_DELAY, move || {
            let Some(game) = weak.upgrade() else { return };
            let batch = {
                let state = lock(&game.state);
                if !state.phase.is_over() {
                    return;
                }
                let mut batch = state.hud();
                for key in GRID.keys() {
                    let view = match key {
                        START_KEY => TileView::Banner(Banner::Start),
                        18 => TileView::Banner(Banner::GameOver),
                        19 => TileView::Stat(Stat::Level(state.level - 1)),
                        _ => TileView::Blank,
                    };
                    batch.push((key, view));
                }
                batch
            };
            game.io.paint(&batch);
        });
    }

    #[cfg(test)]
    fn rig_round(&self, slots: &[(Coord2, u8)], hidden: bool) {
        let mut state = lock(&self.state);
        state.slots = slots.to_vec();
        state.hidden = hidden;
        state.next_expected = 1;
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, u32, u8, bool) {
        let state = lock(&self.state);
        (
            state.phase,
            state.level,
            state.next_expected,
            state.hidden,
        )
    }
}

/// '?' tiles over every number except the one just tapped.
fn hide_rest(state: &SequenceState, tapped: Coord2) -> PaintBatch {
    state
        .slots
        .iter()
        .filter(|&&(pos, _)| pos != tapped)
        .map(|&(pos, _)| (GRID.cell_to_key(pos), TileView::SequenceHidden))
        .collect()
}

impl Game for SequenceGame {
    fn title(&self) -> &'static str {
        "RECALL"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            self.reveal.cancel();
            self.effect.cancel();

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
        self.reveal.cancel();
        self.effect.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::ScoreStore;
    use crate::testutil::rig;

    const ROUND: [(Coord2, u8); 4] = [((0, 0), 1), ((1, 3), 2), ((2, 5), 3), ((0, 7), 4)];

    fn playing_game() -> (Arc<SequenceGame>, crate::testutil::TestRig) {
        let rig = rig();
        let game = SequenceGame::new(rig.io.clone(), 31);
        game.on_key(START_KEY, true);
        game.rig_round(&ROUND, true);
        (game, rig)
    }

    #[test]
    fn ascending_taps_advance_the_round() {
        let (game, _rig) = playing_game();

        game.on_key(GRID.cell_to_key((0, 0)), true);
        game.on_key(GRID.cell_to_key((1, 3)), true);

        let (phase, _, next_expected, _) = game.snapshot();
        assert!(phase.is_playing());
        assert_eq!(next_expected, 3);
        game.shutdown();
    }

    #[test]
    fn finishing_a_round_enters_the_transition() {
        let (game, _rig) = playing_game();

        for &(cell, _) in &ROUND {
            game.on_key(GRID.cell_to_key(cell), true);
        }

        let (phase, level, _, _) = game.snapshot();
        assert_eq!(phase, Phase::RoundTransition);
        assert_eq!(level, START_LEVEL);
        assert!(game.effect.is_armed(), "next round is scheduled");
        game.shutdown();
    }

    #[test]
    fn wrong_tap_is_terminal_and_commits_the_score() {
        let (game, rig) = playing_game();
        game.on_key(GRID.cell_to_key((0, 0)), true); // correct 1

        game.on_key(GRID.cell_to_key((2, 5)), true); // 3 instead of 2

        let (phase, _, _, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Lost));
        assert_eq!(rig.scores.load_best(GAME_ID, 0), i64::from(START_LEVEL) - 1);
        game.shutdown();
    }

    #[test]
    fn tapping_one_early_hides_the_rest_and_counts() {
        let (game, rig) = playing_game();
        game.rig_round(&ROUND, false); // numbers still on display
        rig.sink.clear_log();

        game.on_key(GRID.cell_to_key((0, 0)), true);

        let (phase, _, next_expected, hidden) = game.snapshot();
        assert!(phase.is_playing());
        assert!(hidden);
        assert_eq!(next_expected, 2);
        assert!(!game.reveal.is_armed(), "the study timer is canceled");
        assert_eq!(
            rig.sink.view_at(GRID.cell_to_key((1, 3))),
            Some(TileView::SequenceHidden)
        );
        game.shutdown();
    }

    #[test]
    fn taps_on_empty_cells_while_visible_are_ignored() {
        let (game, rig) = playing_game();
        game.rig_round(&ROUND, false);
        rig.sink.clear_log();

        game.on_key(GRID.cell_to_key((1, 1)), true); // empty cell
        game.on_key(GRID.cell_to_key((1, 3)), true); // "2" while visible

        assert_eq!(rig.sink.paint_count(), 0);
        let (_, _, next_expected, hidden) = game.snapshot();
        assert_eq!(next_expected, 1);
        assert!(!hidden);
        game.shutdown();
    }

    #[test]
    fn round_deal_is_within_bounds_and_distinct() {
        let rig = rig();
        let game = SequenceGame::new(rig.io.clone(), 77);
        game.on_key(START_KEY, true);

        let state = lock(&game.state);
        assert_eq!(state.slots.len(), START_LEVEL as usize);
        let mut cells: Vec<Coord2> = state.slots.iter().map(|&(c, _)| c).collect();
        cells.sort_unstable();
        cells.dedup();
        assert_eq!(cells.len(), START_LEVEL as usize, "cells must be distinct");
        let values: Vec<u8> = state.slots.iter().map(|&(_, v)| v).collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
        drop(state);
        game.shutdown();
    }
}
