use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;

use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, Ramp, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::{Coord2, Dir, GridMap, KeyIndex};
use crate::view::{Banner, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "snake";
const GRID: GridMap = GridMap::new(3, 8, 1);
const START_KEY: KeyIndex = 20;
const POLICY: ScorePolicy = ScorePolicy::HigherIsBetter;
const MILESTONE_EVERY: u32 = 5;

const DEATH_FLASH: Duration = Duration::from_millis(500);

/// 0.8 s per move at the start, 30 ms faster per food, 0.3 s floor.
fn tick_ramp() -> Ramp {
    Ramp::new(
        Duration::from_millis(800),
        Duration::from_millis(300),
        Duration::from_millis(30),
    )
}

struct SnakeState {
    body: VecDeque<Coord2>,
    direction: Dir,
    next_direction: Dir,
    food: Option<Coord2>,
    score: u32,
    best: i64,
    phase: Phase,
    rng: SmallRng,
}

impl SnakeState {
    fn new(seed: u64, best: i64) -> Self {
        Self {
            body: VecDeque::new(),
            direction: Dir::Right,
            next_direction: Dir::Right,
            food: None,
            score: 0,
            best,
            phase: Phase::Idle,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn spawn_food(&mut self) {
        let free: Vec<Coord2> = GRID
            .cells()
            .filter(|cell| !self.body.contains(cell))
            .collect();
        self.food = free.choose(&mut self.rng).copied();
    }

    fn tick_interval(&self) -> Duration {
        tick_ramp().interval(i64::from(self.score))
    }

    fn hud(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        batch.push((0, TileView::Stat(Stat::Title("SNAKE"))));
        batch.push((1, TileView::Stat(Stat::Score(self.score))));
        batch.push((2, TileView::Stat(Stat::Best(self.best))));
        batch.push((
            3,
            TileView::Stat(Stat::SpeedMs(self.tick_interval().as_millis() as u32)),
        ));
        for key in 4..GRID.first_key() {
            batch.push((key, TileView::Blank));
        }
        batch
    }

    fn full_board(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        for cell in GRID.cells() {
            let view = if Some(&cell) == self.body.front() {
                TileView::SnakeHead(self.direction)
            } else if self.body.contains(&cell) {
                TileView::SnakeBody
            } else if Some(cell) == self.food {
                TileView::Food
            } else {
                TileView::Blank
            };
            batch.push((GRID.cell_to_key(cell), view));
        }
        batch
    }
}

/// Snake on the 3×8 region. Tap any cell to steer toward it; the tick
/// self-reschedules and speeds up with every food eaten.
pub struct SnakeGame {
    io: GameIo,
    state: Mutex<SnakeState>,
    tick: TimerSlot,
    effect: TimerSlot,
    weak: Weak<SnakeGame>,
}

impl SnakeGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, 0);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(SnakeState::new(seed, best)),
            tick: TimerSlot::new(),
            effect: TimerSlot::new(),
            weak: weak.clone(),
        })
    }

    fn start(&self) {
        let batch = {
            let mut state = lock(&self.state);
            self.tick.cancel();
            self.effect.cancel();

            state.score = 0;
            state.phase = Phase::Playing;
            let mid = (GRID.rows() / 2, GRID.cols() / 2);
            state.body = VecDeque::from([mid, (mid.0, mid.1 - 1), (mid.0, mid.1 - 2)]);
            state.direction = Dir::Right;
            state.next_direction = Dir::Right;
            state.spawn_food();
            self.arm_tick(state.tick_interval());

            let mut batch = state.hud();
            batch.extend(state.full_board());
            batch
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Start);
        self.io.audio.voice(Voice::Start);
    }

    fn arm_tick(&self, delay: Duration) {
        let weak = self.weak.clone();
        self.tick.arm(delay, move || {
            if let Some(game) = weak.upgrade() {
                game.advance();
            }
        });
    }

    /// One tick: move the snake one step in the buffered direction.
    fn advance(&self) {
        let mut ate = false;
        let mut milestone = false;
        let mut died = false;
        let batch = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }

            state.direction = state.next_direction;
            let head = *state.body.front().expect("snake is never empty");
            let (dr, dc) = state.direction.delta();
            let new_head = match (
                head.0.checked_add_signed(dr),
                head.1.checked_add_signed(dc),
            ) {
                (Some(row), Some(col))
                    if row < GRID.rows()
                        && col < GRID.cols()
                        && !state.body.contains(&(row, col)) =>
                {
                    Some((row, col))
                }
                _ => None, // wall or self collision
            };

            match new_head {
                None => {
                    died = true;
                    self.die(&mut state);
                    self.death_flash(&state)
                }
                Some(new_head) => {
                    let mut batch = PaintBatch::new();
                    state.body.push_front(new_head);

                    if state.food == Some(new_head) {
                        ate = true;
                        state.score += 1;
                        milestone = state.score % MILESTONE_EVERY == 0;
                        state.spawn_food();
                        if let Some(food) = state.food {
                            batch.push((GRID.cell_to_key(food), TileView::Food));
                        }
                        batch.extend(state.hud());
                    } else {
                        let tail = state.body.pop_back().expect("snake is never empty");
                        batch.push((GRID.cell_to_key(tail), TileView::Blank));
                    }

                    batch.push((
                        GRID.cell_to_key(new_head),
                        TileView::SnakeHead(state.direction),
                    ));
                    if let Some(&neck) = state.body.get(1) {
                        batch.push((GRID.cell_to_key(neck), TileView::SnakeBody));
                    }

                    self.arm_tick(state.tick_interval());
                    batch
                }
            }
        };
        self.io.paint(&batch);

        if died {
            return;
        }
        if milestone {
            self.io.audio.voice(Voice::Milestone);
        }
        if ate {
            self.io.audio.sfx(Sound::Eat);
        }
    }

    /// Must hold the lock. Flips to the terminal phase and commits a new
    /// best; painting stays with the caller.
    fn die(&self, state: &mut SnakeState) {
        state.phase = Phase::Over(Outcome::Lost);
        self.tick.cancel();

        let new_best = POLICY.improves(i64::from(state.score), state.best) && state.score > 0;
        if new_best {
            state.best = i64::from(state.score);
            self.io.scores.save_best(GAME_ID, state.best);
        }
        self.arm_game_over_screen();
    }

    /// Red flash over the dead snake; the full screen follows shortly.
    fn death_flash(&self, state: &SnakeState) -> PaintBatch {
        let mut batch = state.hud();
        for &cell in &state.body {
            batch.push((GRID.cell_to_key(cell), TileView::FlashBad));
        }
        batch
    }

    fn arm_game_over_screen(&self) {
        let weak = self.weak.clone();
        self.effect.arm(DEATH_FLASH, move || {
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
                        18 | 19 | 21 => TileView::Banner(Banner::GameOver),
                        _ => TileView::Blank,
                    };
                    batch.push((key, view));
                }
                batch
            };
            game.io.paint(&batch);
            game.io.audio.sfx(Sound::Die);
            game.io.audio.voice(Voice::GameOver);
        });
    }

    /// Tap-to-steer: turn toward the tapped cell, preferring the axis
    /// perpendicular to the current heading. 180° reversals are ignored.
    fn steer(&self, target: Coord2) {
        let mut state = lock(&self.state);
        if !state.phase.is_playing() {
            return;
        }
        let head = *state.body.front().expect("snake is never empty");
        if target == head {
            return;
        }

        let dr = i16::from(target.0) - i16::from(head.0);
        let dc = i16::from(target.1) - i16::from(head.1);
        let horizontal_first = matches!(state.direction, Dir::Up | Dir::Down);

        let wanted = if horizontal_first {
            if dc > 0 {
                Dir::Right
            } else if dc < 0 {
                Dir::Left
            } else if dr > 0 {
                Dir::Down
            } else {
                Dir::Up
            }
        } else if dr > 0 {
            Dir::Down
        } else if dr < 0 {
            Dir::Up
        } else if dc > 0 {
            Dir::Right
        } else {
            Dir::Left
        };

        if wanted != state.direction.opposite() {
            state.next_direction = wanted;
        }
    }

    #[cfg(test)]
    fn place(&self, body: &[Coord2], direction: Dir, food: Option<Coord2>) {
        let mut state = lock(&self.state);
        state.body = body.iter().copied().collect();
        state.direction = direction;
        state.next_direction = direction;
        state.food = food;
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, Vec<Coord2>, Dir, u32) {
        let state = lock(&self.state);
        (
            state.phase,
            state.body.iter().copied().collect(),
            state.direction,
            state.score,
        )
    }

    #[cfg(test)]
    fn force_tick(&self) {
        self.advance();
    }
}

impl Game for SnakeGame {
    fn title(&self) -> &'static str {
        "SNAKE"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            self.tick.cancel();
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
            self.steer(cell);
        }
    }

    fn shutdown(&self) {
        self.tick.cancel();
        self.effect.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::ScoreStore;
    use crate::testutil::rig;

    fn playing_game() -> (Arc<SnakeGame>, crate::testutil::TestRig) {
        let rig = rig();
        let game = SnakeGame::new(rig.io.clone(), 7);
        game.on_key(START_KEY, true);
        game.tick.cancel(); // tests drive ticks by hand
        (game, rig)
    }

    #[test]
    fn reversal_steer_is_ignored_and_snake_keeps_moving() {
        let (game, _rig) = playing_game();
        game.place(&[(1, 4), (1, 3), (1, 2)], Dir::Right, None);

        // (1, 3) is the neck: steering there means a 180° reversal
        game.on_key(GRID.cell_to_key((1, 3)), true);
        game.force_tick();

        let (phase, body, direction, _) = game.snapshot();
        assert_eq!(direction, Dir::Right);
        assert_eq!(body[0], (1, 5));
        assert!(phase.is_playing());
        game.shutdown();
    }

    #[test]
    fn steering_prefers_the_perpendicular_axis() {
        let (game, _rig) = playing_game();
        game.place(&[(1, 4), (1, 3), (1, 2)], Dir::Right, None);

        game.on_key(GRID.cell_to_key((2, 6)), true);
        game.force_tick();

        let (_, body, direction, _) = game.snapshot();
        assert_eq!(direction, Dir::Down);
        assert_eq!(body[0], (2, 4));
        game.shutdown();
    }

    #[test]
    fn eating_food_grows_and_scores() {
        let (game, _rig) = playing_game();
        game.place(&[(1, 4), (1, 3), (1, 2)], Dir::Right, Some((1, 5)));

        game.force_tick();

        let (_, body, _, score) = game.snapshot();
        assert_eq!(score, 1);
        assert_eq!(body.len(), 4);
        assert_eq!(body[0], (1, 5));
        game.shutdown();
    }

    #[test]
    fn wall_collision_is_terminal() {
        let (game, _rig) = playing_game();
        game.place(&[(1, 7), (1, 6), (1, 5)], Dir::Right, None);

        game.force_tick();

        let (phase, _, _, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Lost));
        game.shutdown();
    }

    #[test]
    fn self_collision_is_terminal() {
        let (game, _rig) = playing_game();
        // U-shaped body: moving up hits (0, 4)
        game.place(
            &[(1, 4), (2, 4), (2, 5), (1, 5), (0, 5), (0, 4)],
            Dir::Left,
            None,
        );
        game.on_key(GRID.cell_to_key((0, 4)), true); // steer up

        game.force_tick();

        let (phase, _, _, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Lost));
        game.shutdown();
    }

    #[test]
    fn best_score_is_committed_on_death() {
        let (game, rig) = playing_game();
        game.place(&[(1, 4), (1, 3), (1, 2)], Dir::Right, Some((1, 5)));
        game.force_tick(); // eat: score 1
        game.place(&[(1, 7), (1, 6), (1, 5)], Dir::Right, None);

        game.force_tick(); // wall

        assert_eq!(rig.scores.load_best(GAME_ID, 0), 1);
        game.shutdown();
    }

    #[test]
    fn steering_while_idle_changes_nothing() {
        let rig = rig();
        let game = SnakeGame::new(rig.io.clone(), 9);
        game.show_idle();
        rig.sink.clear_log();

        game.on_key(GRID.cell_to_key((1, 1)), true);

        assert_eq!(rig.sink.paint_count(), 0);
    }
}
