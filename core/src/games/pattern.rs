use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::{index, SliceRandom};
use rand::Rng;
use rand::SeedableRng;

use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::KeyIndex;
use crate::view::{Banner, ColorId, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "pattern";
const START_KEY: KeyIndex = 20;
const PALETTE_SIZE: u8 = 8;
const MAX_LIVES: u8 = 3;
const POLICY: ScorePolicy = ScorePolicy::HigherIsBetter;

/// Rows 1-2 of the panel hold the sequence, capped at 16 cells.
const PATTERN_KEYS: core::ops::Range<KeyIndex> = 8..24;
/// Row 3 holds the answer options.
const OPTION_KEYS: core::ops::Range<KeyIndex> = 24..32;
const MAX_SEQUENCE: usize = 16;

const ROUND_PAUSE: Duration = Duration::from_millis(400);
const FLASH_TIME: Duration = Duration::from_millis(600);
const ANSWER_TIME: Duration = Duration::from_millis(500);

/// One puzzle: the visible prefix, the color completing it, and the
/// shuffled answer options (always containing the answer).
#[derive(Clone, Debug, PartialEq)]
struct Puzzle {
    shown: Vec<ColorId>,
    answer: ColorId,
    options: Vec<ColorId>,
}

impl Puzzle {
    /// The button showing the '?' cell.
    fn hole_key(&self) -> KeyIndex {
        PATTERN_KEYS.start + self.shown.len() as KeyIndex
    }
}

/// Difficulty-tiered sequence builder. Every tier produces a periodic
/// sequence whose last element is cut out as the answer.
fn generate(level: u32, rng: &mut SmallRng) -> Puzzle {
    let full: Vec<ColorId> = if level <= 3 {
        // two-color alternation: A B A B ... ?
        cycle_of(2, rng.random_range(6..=8), rng)
    } else if level <= 6 {
        // three-color cycle: A B C A B C ... ?
        cycle_of(3, rng.random_range(7..=10), rng)
    } else if level <= 9 {
        // grouped runs: e.g. A A B A A B ... ?
        let colors = pick_colors(2, rng);
        let run_a = rng.random_range(1..=3);
        let run_b = rng.random_range(1..=2);
        let mut group = vec![colors[0]; run_a];
        group.extend(vec![colors[1]; run_b]);
        tile_group(&group, MAX_SEQUENCE)
    } else {
        match rng.random_range(0..3) {
            0 => cycle_of(4, rng.random_range(9..=13), rng),
            1 => {
                // mirror: A B C B A, repeated
                let colors = pick_colors(3, rng);
                let mut group = colors.clone();
                group.extend(colors.iter().rev().skip(1));
                tile_group(&group, 14)
            }
            _ => {
                // stepped runs: A A B B C C, repeated
                let colors = pick_colors(rng.random_range(3..=4), rng);
                let step = rng.random_range(2..=3);
                let group: Vec<ColorId> = colors
                    .iter()
                    .flat_map(|&c| std::iter::repeat(c).take(step))
                    .collect();
                tile_group(&group, MAX_SEQUENCE)
            }
        }
    };

    let answer = *full.last().expect("generated sequence is never empty");
    let shown = full[..full.len() - 1].to_vec();

    let option_count = if level <= 5 { 3 } else { 4 };
    let pool: Vec<ColorId> = (0..PALETTE_SIZE).filter(|&c| c != answer).collect();
    let mut options = vec![answer];
    for pick in index::sample(rng, pool.len(), (option_count - 1).min(pool.len())) {
        options.push(pool[pick]);
    }
    options.shuffle(rng);

    Puzzle {
        shown,
        answer,
        options,
    }
}

fn pick_colors(count: usize, rng: &mut SmallRng) -> Vec<ColorId> {
    let palette: Vec<ColorId> = (0..PALETTE_SIZE).collect();
    index::sample(rng, palette.len(), count)
        .into_iter()
        .map(|i| palette[i])
        .collect()
}

fn cycle_of(colors: usize, len: usize, rng: &mut SmallRng) -> Vec<ColorId> {
    let picked = pick_colors(colors, rng);
    (0..len).map(|i| picked[i % colors]).collect()
}

/// Repeat `group` until the sequence is at least six cells and at most
/// `cap`, always ending on a full period boundary position.
fn tile_group(group: &[ColorId], cap: usize) -> Vec<ColorId> {
    let mut full = Vec::new();
    while full.len() < 6 || full.len() < group.len() * 3 {
        full.extend_from_slice(group);
        if full.len() >= cap {
            break;
        }
    }
    full.truncate(cap);
    full
}

struct PatternState {
    level: u32,
    score: u32,
    lives: u8,
    best: i64,
    phase: Phase,
    puzzle: Option<Puzzle>,
    /// Option button -> color for the current round.
    option_map: Vec<(KeyIndex, ColorId)>,
    rng: SmallRng,
}

impl PatternState {
    fn new(seed: u64, best: i64) -> Self {
        Self {
            level: 0,
            score: 0,
            lives: MAX_LIVES,
            best,
            phase: Phase::Idle,
            puzzle: None,
            option_map: Vec::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn hud(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        batch.push((0, TileView::Stat(Stat::Title("PATTERN"))));
        batch.push((1, TileView::Stat(Stat::Level(self.level))));
        batch.push((2, TileView::Stat(Stat::Score(self.score))));
        batch.push((
            3,
            TileView::Stat(Stat::Lives {
                left: self.lives,
                max: MAX_LIVES,
            }),
        ));
        batch.push((4, TileView::Stat(Stat::Best(self.best))));
        for key in 5..PATTERN_KEYS.start {
            batch.push((key, TileView::Blank));
        }
        batch
    }

    fn puzzle_batch(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        for key in PATTERN_KEYS.chain(OPTION_KEYS) {
            batch.push((key, TileView::Blank));
        }
        let Some(puzzle) = &self.puzzle else {
            return batch;
        };

        for (i, &color) in puzzle.shown.iter().enumerate() {
            let key = PATTERN_KEYS.start + i as KeyIndex;
            if key >= PATTERN_KEYS.end {
                break;
            }
            batch.push((key, TileView::PatternCell(color)));
        }
        batch.push((puzzle.hole_key(), TileView::PatternHole));

        for &(key, color) in &self.option_map {
            batch.push((key, TileView::PatternOption(color)));
        }
        batch
    }
}

/// Pattern logic: complete the periodic color sequence by picking the
/// missing cell from the bottom-row options. Three lives, endless ramp.
pub struct PatternGame {
    io: GameIo,
    state: Mutex<PatternState>,
    /// Round pauses, answer flashes, the game-over screen.
    effect: TimerSlot,
    weak: Weak<PatternGame>,
}

impl PatternGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, 0);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(PatternState::new(seed, best)),
            effect: TimerSlot::new(),
            weak: weak.clone(),
        })
    }

    fn start(&self) {
        let batch = {
            let mut state = lock(&self.state);
            self.effect.cancel();
            state.level = 0;
            state.score = 0;
            state.lives = MAX_LIVES;
            state.puzzle = None;
            state.option_map.clear();
            state.phase = Phase::RoundTransition;
            self.arm_next_round(ROUND_PAUSE);

            let mut batch = state.hud();
            for key in PATTERN_KEYS.chain(OPTION_KEYS) {
                batch.push((key, TileView::Blank));
            }
            batch
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Start);
        self.io.audio.voice(Voice::Start);
    }

    fn arm_next_round(&self, delay: Duration) {
        let weak = self.weak.clone();
        self.effect.arm(delay, move || {
            if let Some(game) = weak.upgrade() {
                game.next_round();
            }
        });
    }

    fn next_round(&self) {
        let (batch, level_up) = {
            let mut state = lock(&self.state);
            if state.phase != Phase::RoundTransition {
                return;
            }
            state.level += 1;
            let puzzle = generate(state.level, &mut state.rng);

            let option_count = puzzle.options.len() as KeyIndex;
            let start_col = (OPTION_KEYS.end - OPTION_KEYS.start - option_count) / 2;
            state.option_map = puzzle
                .options
                .iter()
                .enumerate()
                .map(|(i, &color)| (OPTION_KEYS.start + start_col + i as KeyIndex, color))
                .collect();
            state.puzzle = Some(puzzle);
            state.phase = Phase::Playing;

            let mut batch = state.hud();
            batch.extend(state.puzzle_batch());
            let level_up = state.level > 1 && (state.level - 1) % 3 == 0;
            (batch, level_up)
        };
        self.io.paint(&batch);
        if level_up {
            self.io.audio.sfx(Sound::LevelUp);
        }
    }

    fn pick(&self, key: KeyIndex) {
        enum Verdict {
            Correct,
            Wrong { lives_left: u8, new_best: bool },
        }

        let (batch, verdict) = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }
            let Some(&(_, color)) = state.option_map.iter().find(|&&(k, _)| k == key) else {
                return;
            };
            let Some(puzzle) = state.puzzle.clone() else {
                return;
            };

            let mut batch = PaintBatch::new();
            if color == puzzle.answer {
                state.score += 1;
                state.phase = Phase::RoundTransition;
                self.arm_next_round(FLASH_TIME);

                for i in 0..=puzzle.shown.len() {
                    let key = PATTERN_KEYS.start + i as KeyIndex;
                    if key >= PATTERN_KEYS.end {
                        break;
                    }
                    batch.push((key, TileView::FlashGood));
                }
                batch.extend(state.hud());
                (batch, Verdict::Correct)
            } else {
                state.lives -= 1;
                let lives_left = state.lives;
                batch.push((puzzle.hole_key(), TileView::FlashBad));
                batch.extend(state.hud());

                let mut new_best = false;
                if lives_left == 0 {
                    state.phase = Phase::Over(Outcome::Lost);
                    new_best =
                        state.score > 0 && POLICY.improves(i64::from(state.score), state.best);
                    if new_best {
                        state.best = i64::from(state.score);
                        self.io.scores.save_best(GAME_ID, state.best);
                    }
                    self.arm_over_screen();
                } else {
                    state.phase = Phase::RoundTransition;
                    self.arm_show_answer();
                }
                (batch, Verdict::Wrong {
                    lives_left,
                    new_best,
                })
            }
        };
        self.io.paint(&batch);

        match verdict {
            Verdict::Correct => self.io.audio.sfx(Sound::Correct),
            Verdict::Wrong {
                lives_left,
                new_best,
            } => {
                self.io.audio.sfx(Sound::Wrong);
                if lives_left == 0 {
                    if new_best {
                        self.io.audio.sfx(Sound::NewBest);
                        self.io.audio.voice(Voice::NewBest);
                    } else {
                        self.io.audio.voice(Voice::GameOver);
                    }
                }
            }
        }
    }

    /// After a miss with lives left: reveal the answer briefly, then the
    /// next round.
    fn arm_show_answer(&self) {
        let weak = self.weak.clone();
        self.effect.arm(FLASH_TIME, move || {
            let Some(game) = weak.upgrade() else { return };
            let reveal = {
                let state = lock(&game.state);
                if state.phase != Phase::RoundTransition {
                    return;
                }
                game.arm_next_round(ANSWER_TIME);
                state
                    .puzzle
                    .as_ref()
                    .map(|p| (p.hole_key(), TileView::PatternCell(p.answer)))
            };
            if let Some((key, view)) = reveal {
                game.io.set_key(key, view);
            }
        });
    }

    fn arm_over_screen(&self) {
        let weak = self.weak.clone();
        self.effect.arm(FLASH_TIME, move || {
            let Some(game) = weak.upgrade() else { return };
            let batch = {
                let state = lock(&game.state);
                if !state.phase.is_over() {
                    return;
                }
                let mut batch = state.hud();
                for key in PATTERN_KEYS.chain(OPTION_KEYS) {
                    let view = match key {
                        11 | 12 => TileView::Banner(Banner::GameOver),
                        START_KEY => TileView::Banner(Banner::Start),
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
    fn rig_puzzle(&self, shown: &[ColorId], answer: ColorId, options: &[ColorId]) {
        let mut state = lock(&self.state);
        state.phase = Phase::Playing;
        let start_col = (OPTION_KEYS.end - OPTION_KEYS.start - options.len() as KeyIndex) / 2;
        state.option_map = options
            .iter()
            .enumerate()
            .map(|(i, &color)| (OPTION_KEYS.start + start_col + i as KeyIndex, color))
            .collect();
        state.puzzle = Some(Puzzle {
            shown: shown.to_vec(),
            answer,
            options: options.to_vec(),
        });
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, u32, u32, u8) {
        let state = lock(&self.state);
        (state.phase, state.level, state.score, state.lives)
    }
}

impl Game for PatternGame {
    fn title(&self) -> &'static str {
        "PATTERN"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            self.effect.cancel();

            let mut batch = state.hud();
            for key in PATTERN_KEYS.chain(OPTION_KEYS) {
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

        if OPTION_KEYS.contains(&key) {
            self.pick(key);
        }
    }

    fn shutdown(&self) {
        self.effect.cancel();
    }
}
