use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::board::Board;
use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::{Coord2, GridMap, KeyIndex};
use crate::view::{Banner, ColorId, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "memory";
const GRID: GridMap = GridMap::new(3, 8, 1);
const START_KEY: KeyIndex = 20;
const TOTAL_PAIRS: u8 = 12;
const MOVE_LIMIT: u32 = 25;
const POLICY: ScorePolicy = ScorePolicy::LowerIsBetter;

const HIDE_DELAY: Duration = Duration::from_millis(800);
const LOSE_REVEAL: Duration = Duration::from_millis(1200);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CardFace {
    Down,
    Up,
    Matched,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Card {
    color: ColorId,
    face: CardFace,
}

impl Default for Card {
    fn default() -> Self {
        Self {
            color: 0,
            face: CardFace::Down,
        }
    }
}

impl Card {
    const fn view(self) -> TileView {
        match self.face {
            CardFace::Down => TileView::CardBack,
            CardFace::Up => TileView::CardFace(self.color),
            CardFace::Matched => TileView::CardMatched(self.color),
        }
    }
}

struct MemoryState {
    cards: Board<Card>,
    flipped: Option<Coord2>,
    moves: u32,
    pairs_found: u8,
    best: i64,
    phase: Phase,
    rng: SmallRng,
}

impl MemoryState {
    fn new(seed: u64, best: i64) -> Self {
        Self {
            cards: Board::new(GRID),
            flipped: None,
            moves: 0,
            pairs_found: 0,
            best,
            phase: Phase::Idle,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn deal(&mut self) {
        let mut colors: Vec<ColorId> = (0..TOTAL_PAIRS).chain(0..TOTAL_PAIRS).collect();
        colors.shuffle(&mut self.rng);
        for (cell, color) in GRID.cells().zip(colors) {
            self.cards[cell] = Card {
                color,
                face: CardFace::Down,
            };
        }
    }

    fn hud(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        batch.push((0, TileView::Stat(Stat::Title("MEMORY"))));
        batch.push((
            1,
            TileView::Stat(Stat::Moves {
                used: self.moves,
                limit: MOVE_LIMIT,
            }),
        ));
        batch.push((
            2,
            TileView::Stat(Stat::Pairs {
                found: self.pairs_found,
                total: TOTAL_PAIRS,
            }),
        ));
        let best = if self.best == 0 {
            TileView::Stat(Stat::BestUnset)
        } else {
            TileView::Stat(Stat::Best(self.best))
        };
        batch.push((3, best));
        for key in 4..GRID.first_key() {
            batch.push((key, TileView::Blank));
        }
        batch
    }
}

/// Memory match: 12 color pairs behind 24 cards, 25-move limit. The only
/// timed concern is hiding a failed pair; matches resolve instantly.
pub struct MemoryGame {
    io: GameIo,
    state: Mutex<MemoryState>,
    effect: TimerSlot,
    weak: Weak<MemoryGame>,
}

impl MemoryGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, 0);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(MemoryState::new(seed, best)),
            effect: TimerSlot::new(),
            weak: weak.clone(),
        })
    }

    fn start(&self) {
        let batch = {
            let mut state = lock(&self.state);
            self.effect.cancel();
            state.moves = 0;
            state.pairs_found = 0;
            state.flipped = None;
            state.phase = Phase::Playing;
            state.deal();

            let mut batch = state.hud();
            for key in GRID.keys() {
                batch.push((key, TileView::CardBack));
            }
            batch
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Flip);
        self.io.audio.voice(Voice::Start);
    }

    fn flip(&self, cell: Coord2) {
        enum Resolution {
            FirstCard,
            Match,
            NoMatch,
            Lost,
            Won(bool),
        }

        let (batch, resolution) = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }
            let card = state.cards[cell];
            if card.face != CardFace::Down {
                return;
            }

            let mut batch = PaintBatch::new();
            match state.flipped.take() {
                None => {
                    state.cards[cell].face = CardFace::Up;
                    state.flipped = Some(cell);
                    batch.push((GRID.cell_to_key(cell), TileView::CardFace(card.color)));
                    (batch, Resolution::FirstCard)
                }
                Some(first) => {
                    state.moves += 1;
                    let first_card = state.cards[first];

                    if first_card.color == card.color {
                        state.cards[first].face = CardFace::Matched;
                        state.cards[cell].face = CardFace::Matched;
                        state.pairs_found += 1;
                        batch.push((GRID.cell_to_key(first), TileView::CardMatched(card.color)));
                        batch.push((GRID.cell_to_key(cell), TileView::CardMatched(card.color)));
                        batch.extend(state.hud());

                        if state.pairs_found >= TOTAL_PAIRS {
                            state.phase = Phase::Over(Outcome::Won);
                            let new_best = state.best == 0
                                || POLICY.improves(i64::from(state.moves), state.best);
                            if new_best {
                                state.best = i64::from(state.moves);
                                self.io.scores.save_best(GAME_ID, state.best);
                            }
                            batch.extend(state.hud());
                            for key in GRID.keys() {
                                if key == START_KEY {
                                    batch.push((key, TileView::Banner(Banner::Start)));
                                } else if matches!(key, 18 | 19 | 21) {
                                    batch.push((key, TileView::Banner(Banner::Win)));
                                }
                            }
                            (batch, Resolution::Won(new_best))
                        } else {
                            (batch, Resolution::Match)
                        }
                    } else {
                        state.cards[cell].face = CardFace::Up;
                        batch.push((GRID.cell_to_key(cell), TileView::CardFace(card.color)));
                        batch.extend(state.hud());

                        if state.moves >= MOVE_LIMIT {
                            state.phase = Phase::Over(Outcome::Lost);
                            // brief reveal of every unsolved card, then the
                            // lose screen via the effect slot
                            for pos in GRID.cells() {
                                let shown = state.cards[pos];
                                if shown.face != CardFace::Matched {
                                    batch.push((
                                        GRID.cell_to_key(pos),
                                        TileView::CardFace(shown.color),
                                    ));
                                }
                            }
                            self.arm_lose_screen();
                            (batch, Resolution::Lost)
                        } else {
                            // block further input until the pair hides
                            state.phase = Phase::RoundTransition;
                            self.arm_hide(first, cell);
                            (batch, Resolution::NoMatch)
                        }
                    }
                }
            }
        };
        self.io.paint(&batch);

        match resolution {
            Resolution::FirstCard => self.io.audio.sfx(Sound::Flip),
            Resolution::Match => self.io.audio.sfx(Sound::Match),
            Resolution::NoMatch => self.io.audio.sfx(Sound::NoMatch),
            Resolution::Lost => {
                self.io.audio.sfx(Sound::Lose);
                self.io.audio.voice(Voice::Lose);
            }
            Resolution::Won(new_best) => {
                self.io.audio.sfx(Sound::Win);
                self.io.audio.voice(if new_best { Voice::NewBest } else { Voice::Win });
            }
        }
    }

    /// Flip a failed pair back over after the feedback delay.
    fn arm_hide(&self, first: Coord2, second: Coord2) {
        let weak = self.weak.clone();
        self.effect.arm(HIDE_DELAY, move || {
            let Some(game) = weak.upgrade() else { return };
            let batch = {
                let mut state = lock(&game.state);
                if state.phase != Phase::RoundTransition {
                    return;
                }
                let mut batch = PaintBatch::new();
                for pos in [first, second] {
                    if state.cards[pos].face == CardFace::Up {
                        state.cards[pos].face = CardFace::Down;
                        batch.push((GRID.cell_to_key(pos), TileView::CardBack));
                    }
                }
                state.phase = Phase::Playing;
                batch
            };
            game.io.paint(&batch);
        });
    }

    fn arm_lose_screen(&self) {
        let weak = self.weak.clone();
        self.effect.arm(LOSE_REVEAL, move || {
            let Some(game) = weak.upgrade() else { return };
            let batch = {
                let state = lock(&game.state);
                if state.phase != Phase::Over(Outcome::Lost) {
                    return;
                }
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
            };
            game.io.paint(&batch);
        });
    }

    #[cfg(test)]
    fn rig_colors(&self, colors: &[ColorId]) {
        let mut state = lock(&self.state);
        for (cell, &color) in GRID.cells().zip(colors) {
            state.cards[cell] = Card {
                color,
                face: CardFace::Down,
            };
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, u32, u8) {
        let state = lock(&self.state);
        (state.phase, state.moves, state.pairs_found)
    }
}

impl Game for MemoryGame {
    fn title(&self) -> &'static str {
        "MEMORY"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            self.effect.cancel();

            let mut batch = state.hud();
            for key in GRID.keys() {
                let view = if key == START_KEY {
                    TileView::Banner(Banner::Start)
                } else {
                    TileView::CardBack
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
            self.flip(cell);
        }
    }

    fn shutdown(&self) {
        self.effect.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::ScoreStore;
    use crate::testutil::rig;

    /// Colors laid out in reading order: cell N and N+1 share a pair.
    fn paired_layout() -> Vec<ColorId> {
        (0..TOTAL_PAIRS).flat_map(|c| [c, c]).collect()
    }

    fn playing_game() -> (Arc<MemoryGame>, crate::testutil::TestRig) {
        let rig = rig();
        let game = MemoryGame::new(rig.io.clone(), 11);
        game.on_key(START_KEY, true);
        game.rig_colors(&paired_layout());
        (game, rig)
    }

    #[test]
    fn matching_pair_locks_in_without_scheduling_a_timer() {
        let (game, rig) = playing_game();

        game.on_key(GRID.cell_to_key((0, 0)), true);
        game.on_key(GRID.cell_to_key((0, 1)), true);

        let (phase, moves, pairs) = game.snapshot();
        assert!(phase.is_playing());
        assert_eq!(moves, 1);
        assert_eq!(pairs, 1);
        assert!(!game.effect.is_armed(), "match path must not arm a timer");
        assert_eq!(
            rig.sink.view_at(GRID.cell_to_key((0, 0))),
            Some(TileView::CardMatched(0))
        );
    }

    #[test]
    fn mismatch_blocks_input_and_schedules_the_hide() {
        let (game, rig) = playing_game();

        game.on_key(GRID.cell_to_key((0, 0)), true);
        game.on_key(GRID.cell_to_key((0, 2)), true);

        let (phase, moves, pairs) = game.snapshot();
        assert_eq!(phase, Phase::RoundTransition);
        assert_eq!(moves, 1);
        assert_eq!(pairs, 0);
        assert!(game.effect.is_armed());

        // taps during the transition are ignored
        rig.sink.clear_log();
        game.on_key(GRID.cell_to_key((1, 0)), true);
        assert_eq!(rig.sink.paint_count(), 0);
        game.shutdown();
    }

    #[test]
    fn tapping_the_flipped_card_again_is_a_no_op() {
        let (game, _rig) = playing_game();

        game.on_key(GRID.cell_to_key((0, 0)), true);
        game.on_key(GRID.cell_to_key((0, 0)), true);

        let (_, moves, _) = game.snapshot();
        assert_eq!(moves, 0, "a repeated tap must not count as a move");
    }

    #[test]
    fn clearing_every_pair_wins_and_records_fewest_moves() {
        let (game, rig) = playing_game();

        for pair in 0..TOTAL_PAIRS {
            let first = GRID.cell_to_key((pair / 4, (pair % 4) * 2));
            game.on_key(first, true);
            game.on_key(first + 1, true);
        }

        let (phase, moves, pairs) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Won));
        assert_eq!(pairs, TOTAL_PAIRS);
        assert_eq!(moves, u32::from(TOTAL_PAIRS));
        assert_eq!(rig.scores.load_best(GAME_ID, 0), i64::from(TOTAL_PAIRS));
    }

    #[test]
    fn exhausting_the_move_limit_loses() {
        let rig = rig();
        let game = MemoryGame::new(rig.io.clone(), 13);
        game.on_key(START_KEY, true);
        game.rig_colors(&paired_layout());

        // burn moves on the same mismatched pair, waiting out each hide
        for _ in 0..MOVE_LIMIT {
            game.on_key(GRID.cell_to_key((0, 0)), true);
            game.on_key(GRID.cell_to_key((0, 2)), true);
            let mut state = lock(&game.state);
            if state.phase == Phase::RoundTransition {
                // fold the pending hide by hand instead of sleeping
                state.cards[(0, 0)].face = CardFace::Down;
                state.cards[(0, 2)].face = CardFace::Down;
                state.phase = Phase::Playing;
            }
        }

        let (phase, moves, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Lost));
        assert_eq!(moves, MOVE_LIMIT);
        game.shutdown();
    }
}
