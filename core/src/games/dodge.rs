use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::index;
use rand::Rng;
use rand::SeedableRng;

use crate::board::Board;
use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, Ramp, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::{Coord, GridMap, KeyIndex};
use crate::view::{Banner, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "dodge";
// The whole panel is playable; the HUD borrows grid cells on the idle
// and results screens instead of a reserved row.
const GRID: GridMap = GridMap::new(4, 8, 0);
const START_KEY: KeyIndex = 28;
const PLAYER_ROW: Coord = 3;
const POLICY: ScorePolicy = ScorePolicy::HigherIsBetter;

const RESULTS_DELAY: Duration = Duration::from_millis(1000);

/// 0.8 s per fall step, 20 ms faster per 5 points, 0.25 s floor.
fn tick_ramp() -> Ramp {
    Ramp::new(
        Duration::from_millis(800),
        Duration::from_millis(250),
        Duration::from_millis(20),
    )
}

struct DodgeState {
    meteors: Board<bool>,
    player_col: Coord,
    score: u32,
    best: i64,
    phase: Phase,
    rng: SmallRng,
}

impl DodgeState {
    fn new(seed: u64, best: i64) -> Self {
        Self {
            meteors: Board::new(GRID),
            player_col: GRID.cols() / 2,
            score: 0,
            best,
            phase: Phase::Idle,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn tick_interval(&self) -> Duration {
        tick_ramp().interval(i64::from(self.score / 5))
    }

    /// How many meteors enter the top row this tick, denser as the score
    /// climbs.
    fn spawn_count(&mut self) -> usize {
        match self.score {
            0..=9 => self.rng.random_range(1..=2),
            10..=24 => self.rng.random_range(1..=3),
            25..=49 => self.rng.random_range(2..=3),
            _ => self.rng.random_range(2..=4),
        }
    }

    fn full_board(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        for cell in GRID.cells() {
            let view = if cell == (PLAYER_ROW, self.player_col) {
                TileView::Ship
            } else if self.meteors[cell] {
                TileView::Meteor
            } else {
                TileView::Blank
            };
            batch.push((GRID.cell_to_key(cell), view));
        }
        batch
    }
}

/// Dodge the falling meteors from the bottom row of the full 4×8 panel.
/// Score counts survived ticks; the fall accelerates every 5 points.
pub struct DodgeGame {
    io: GameIo,
    state: Mutex<DodgeState>,
    tick: TimerSlot,
    effect: TimerSlot,
    weak: Weak<DodgeGame>,
}

impl DodgeGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, 0);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(DodgeState::new(seed, best)),
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
            state.player_col = GRID.cols() / 2;
            state.meteors.reset();
            state.phase = Phase::Playing;
            self.arm_tick(state.tick_interval());
            state.full_board()
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

    /// One fall step: shift every meteor down a row, spawn a new wave,
    /// check the player's cell.
    fn advance(&self) {
        let mut hit = false;
        let mut milestone = false;
        let batch = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }

            for row in (1..GRID.rows()).rev() {
                for col in 0..GRID.cols() {
                    let above = state.meteors[(row - 1, col)];
                    state.meteors[(row, col)] = above;
                }
            }
            for col in 0..GRID.cols() {
                state.meteors[(0, col)] = false;
            }

            if state.meteors[(PLAYER_ROW, state.player_col)] {
                hit = true;
                self.crash(&mut state);
                let mut batch = PaintBatch::new();
                batch.push((
                    GRID.cell_to_key((PLAYER_ROW, state.player_col)),
                    TileView::FlashBad,
                ));
                batch
            } else {
                let mut count = state.spawn_count();
                let mut open: Vec<Coord> = (0..GRID.cols()).collect();
                if state.score == 0 {
                    // never drop one straight onto a fresh player
                    open.retain(|&col| col != state.player_col);
                }
                count = count.min(open.len());
                for pick in index::sample(&mut state.rng, open.len(), count) {
                    state.meteors[(0, open[pick])] = true;
                }

                state.score += 1;
                milestone = state.score % 10 == 0;
                self.arm_tick(state.tick_interval());

                let mut batch = state.full_board();
                batch.push((GRID.cell_to_key((0, 3)), TileView::Stat(Stat::Score(state.score))));
                batch
            }
        };
        self.io.paint(&batch);

        if hit {
            self.io.audio.sfx(Sound::Die);
        } else if milestone {
            self.io.audio.sfx(Sound::Milestone);
            self.io.audio.voice(Voice::Milestone);
        }
    }

    /// Must hold the lock. Ends the round and schedules the results
    /// screen after the crash flash.
    fn crash(&self, state: &mut DodgeState) {
        state.phase = Phase::Over(Outcome::Lost);
        self.tick.cancel();

        let new_best = state.score > 0 && POLICY.improves(i64::from(state.score), state.best);
        if new_best {
            state.best = i64::from(state.score);
            self.io.scores.save_best(GAME_ID, state.best);
        }

        let weak = self.weak.clone();
        self.effect.arm(RESULTS_DELAY, move || {
            let Some(game) = weak.upgrade() else { return };
            game.show_results(new_best);
        });
    }

    fn show_results(&self, new_best: bool) {
        let batch = {
            let state = lock(&self.state);
            if !state.phase.is_over() {
                return;
            }
            let mut batch = PaintBatch::new();
            for key in GRID.keys() {
                batch.push((key, TileView::Blank));
            }
            batch.push((GRID.cell_to_key((0, 3)), TileView::Banner(Banner::GameOver)));
            batch.push((GRID.cell_to_key((1, 3)), TileView::Stat(Stat::Score(state.score))));
            batch.push((GRID.cell_to_key((1, 4)), TileView::Stat(Stat::Best(state.best))));
            if new_best {
                batch.push((GRID.cell_to_key((1, 5)), TileView::Banner(Banner::NewBest)));
            }
            batch.push((
                GRID.cell_to_key((2, 3)),
                TileView::Stat(Stat::SpeedMs(state.tick_interval().as_millis() as u32)),
            ));
            batch.push((START_KEY, TileView::Banner(Banner::Start)));
            batch
        };
        self.io.paint(&batch);

        if new_best {
            self.io.audio.sfx(Sound::NewBest);
            self.io.audio.voice(Voice::NewBest);
        } else {
            self.io.audio.voice(Voice::GameOver);
        }
    }

    /// Move the player along the bottom row. Stepping into a meteor is
    /// an immediate crash.
    fn move_player(&self, col: Coord) {
        let mut hit = false;
        let batch = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }
            let from = state.player_col;
            if col == from {
                return;
            }

            state.player_col = col;
            let mut batch = PaintBatch::new();
            batch.push((GRID.cell_to_key((PLAYER_ROW, from)), TileView::Blank));

            if state.meteors[(PLAYER_ROW, col)] {
                hit = true;
                self.crash(&mut state);
                batch.push((GRID.cell_to_key((PLAYER_ROW, col)), TileView::FlashBad));
            } else {
                batch.push((GRID.cell_to_key((PLAYER_ROW, col)), TileView::Ship));
            }
            batch
        };
        self.io.paint(&batch);

        self.io.audio.sfx(if hit { Sound::Die } else { Sound::Move });
    }

    #[cfg(test)]
    fn rig_meteors(&self, meteors: &[(Coord, Coord)]) {
        let mut state = lock(&self.state);
        state.meteors.reset();
        for &cell in meteors {
            state.meteors[cell] = true;
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, Vec<(Coord, Coord)>, Coord, u32) {
        let state = lock(&self.state);
        let meteors = GRID.cells().filter(|&c| state.meteors[c]).collect();
        (state.phase, meteors, state.player_col, state.score)
    }
}

impl Game for DodgeGame {
    fn title(&self) -> &'static str {
        "DODGE"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            self.tick.cancel();
            self.effect.cancel();

            let mut batch = PaintBatch::new();
            for key in GRID.keys() {
                batch.push((key, TileView::Blank));
            }
            batch.push((GRID.cell_to_key((0, 3)), TileView::Stat(Stat::Title("DODGE"))));
            let best = if state.best > 0 {
                TileView::Stat(Stat::Best(state.best))
            } else {
                TileView::Stat(Stat::BestUnset)
            };
            batch.push((GRID.cell_to_key((0, 4)), best));
            batch.push((START_KEY, TileView::Banner(Banner::Start)));
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

        match GRID.key_to_cell(key) {
            Some((PLAYER_ROW, col)) => self.move_player(col),
            _ => {}
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
    use crate::testutil::rig;

    fn playing_game() -> (Arc<DodgeGame>, crate::testutil::TestRig) {
        let rig = rig();
        let game = DodgeGame::new(rig.io.clone(), 21);
        game.on_key(START_KEY, true);
        game.tick.cancel(); // tests drive ticks by hand
        (game, rig)
    }

    #[test]
    fn meteors_shift_down_one_row_per_tick() {
        let (game, _rig) = playing_game();
        game.rig_meteors(&[(0, 0), (1, 5)]);

        game.advance();

        let (_, meteors, _, score) = game.snapshot();
        assert!(meteors.contains(&(1, 0)));
        assert!(meteors.contains(&(2, 5)));
        assert_eq!(score, 1);
        game.shutdown();
    }

    #[test]
    fn meteor_reaching_the_player_is_terminal() {
        let (game, _rig) = playing_game();
        let col = { lock(&game.state).player_col };
        game.rig_meteors(&[(2, col)]);

        game.advance();

        let (phase, _, _, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Lost));
        assert!(game.effect.is_armed(), "results screen is pending");
        game.shutdown();
    }

    #[test]
    fn moving_into_a_meteor_is_terminal() {
        let (game, _rig) = playing_game();
        game.rig_meteors(&[(PLAYER_ROW, 0)]);

        game.on_key(GRID.cell_to_key((PLAYER_ROW, 0)), true);

        let (phase, _, player, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Lost));
        assert_eq!(player, 0);
        game.shutdown();
    }

    #[test]
    fn player_moves_only_along_the_bottom_row() {
        let (game, rig) = playing_game();

        game.on_key(GRID.cell_to_key((PLAYER_ROW, 6)), true);
        let (_, _, player, _) = game.snapshot();
        assert_eq!(player, 6);

        rig.sink.clear_log();
        game.on_key(GRID.cell_to_key((1, 2)), true); // not the player row
        assert_eq!(rig.sink.paint_count(), 0);
        game.shutdown();
    }

    #[test]
    fn first_wave_avoids_the_player_column() {
        for seed in 0..32 {
            let rig = rig();
            let game = DodgeGame::new(rig.io.clone(), seed);
            game.on_key(START_KEY, true);
            game.tick.cancel();
            game.rig_meteors(&[]);

            game.advance();

            let (_, meteors, player, _) = game.snapshot();
            assert!(
                !meteors.contains(&(0, player)),
                "seed {seed}: wave spawned on the player column"
            );
            game.shutdown();
        }
    }

    #[test]
    fn survival_score_feeds_the_speed_ramp() {
        let (game, _rig) = playing_game();
        {
            let mut state = lock(&game.state);
            state.score = 0;
            assert_eq!(state.tick_interval(), Duration::from_millis(800));
            state.score = 25;
            assert_eq!(state.tick_interval(), Duration::from_millis(700));
            state.score = 10_000;
            assert_eq!(state.tick_interval(), Duration::from_millis(250));
        }
        game.shutdown();
    }
}
