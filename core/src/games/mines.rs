use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::board::Board;
use crate::game::{Game, GameIo};
use crate::phase::{Outcome, Phase};
use crate::sched::{lock, TimerSlot};
use crate::scores::ScorePolicy;
use crate::types::{Adjacency, Coord2, GridMap, KeyIndex};
use crate::view::{Banner, PaintBatch, Stat, TileView};
use crate::{Sound, Voice};

const GAME_ID: &str = "mines";
const GRID: GridMap = GridMap::new(3, 8, 1);
const MINE_COUNT: u8 = 5;
const START_KEY: KeyIndex = 20;
const BANNER_KEY: KeyIndex = 19;
const BEST_DEFAULT: i64 = 999;
const POLICY: ScorePolicy = ScorePolicy::LowerIsBetter;

const CLOCK_TICK: Duration = Duration::from_secs(1);
const REVEAL_LEAD: Duration = Duration::from_millis(400);
const REVEAL_STEP: Duration = Duration::from_millis(80);
const OVER_SCREEN_DELAY: Duration = Duration::from_millis(300);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MinesCell {
    Hidden,
    Open(u8),
}

impl Default for MinesCell {
    fn default() -> Self {
        Self::Hidden
    }
}

impl MinesCell {
    const fn view(self) -> TileView {
        match self {
            Self::Hidden => TileView::Covered,
            Self::Open(count) => TileView::Open(count),
        }
    }
}

struct MinesState {
    cells: Board<MinesCell>,
    mines: Board<bool>,
    phase: Phase,
    awaiting_first_reveal: bool,
    started: Option<Instant>,
    elapsed: u32,
    opened: u16,
    best: i64,
    pending_mines: VecDeque<Coord2>,
    rng: SmallRng,
}

impl MinesState {
    fn new(seed: u64, best: i64) -> Self {
        Self {
            cells: Board::new(GRID),
            mines: Board::new(GRID),
            phase: Phase::Idle,
            awaiting_first_reveal: true,
            started: None,
            elapsed: 0,
            opened: 0,
            best,
            pending_mines: VecDeque::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Places mines so the first-revealed cell and all of its neighbors
    /// stay mine-free, then the regular random fill covers the rest.
    fn generate(&mut self, safe: Coord2) {
        let mut safe_zone: BTreeSet<Coord2> = BTreeSet::from([safe]);
        safe_zone.extend(self.mines.neighbors(safe, Adjacency::Eight));

        let candidates: Vec<Coord2> = GRID
            .cells()
            .filter(|cell| !safe_zone.contains(cell))
            .collect();
        debug_assert!(candidates.len() >= MINE_COUNT as usize);

        self.mines.reset();
        let picked = rand::seq::index::sample(&mut self.rng, candidates.len(), MINE_COUNT.into());
        for index in picked {
            self.mines[candidates[index]] = true;
        }
    }

    fn adjacent_mines(&self, coords: Coord2) -> u8 {
        self.mines
            .neighbors(coords, Adjacency::Eight)
            .filter(|&pos| self.mines[pos])
            .count() as u8
    }

    fn safe_cell_count(&self) -> u16 {
        GRID.cell_count() - u16::from(MINE_COUNT)
    }

    /// Opens `coords` and, for a zero cell, the whole connected empty
    /// region plus its numbered border. Returns the repaints.
    fn flood_open(&mut self, coords: Coord2) -> PaintBatch {
        let mut batch = PaintBatch::new();
        let mut to_visit = VecDeque::from([coords]);
        let mut visited = BTreeSet::new();

        while let Some(visit) = to_visit.pop_front() {
            if !visited.insert(visit) {
                continue;
            }
            if self.mines[visit] || self.cells[visit] != MinesCell::Hidden {
                continue;
            }

            let count = self.adjacent_mines(visit);
            self.cells[visit] = MinesCell::Open(count);
            self.opened += 1;
            batch.push((GRID.cell_to_key(visit), TileView::Open(count)));

            if count == 0 {
                to_visit.extend(
                    self.cells
                        .neighbors(visit, Adjacency::Eight)
                        .filter(|pos| !visited.contains(pos)),
                );
            }
        }

        batch
    }

    fn final_time(&self) -> u32 {
        self.started
            .map(|at| at.elapsed().as_secs() as u32)
            .unwrap_or(0)
    }

    fn hud(&self) -> PaintBatch {
        let mut batch = PaintBatch::new();
        batch.push((0, TileView::Stat(Stat::Title("MINES"))));
        batch.push((1, TileView::Stat(Stat::Title("WEEP"))));
        batch.push((2, TileView::Stat(Stat::TimerSecs(self.elapsed))));
        batch.push((3, TileView::Stat(Stat::Best(self.best))));
        batch.push((4, TileView::Stat(Stat::MinesLeft(MINE_COUNT))));
        for key in 5..GRID.first_key() {
            batch.push((key, TileView::Blank));
        }
        batch
    }
}

/// Minesweeper on the 3×8 region: five mines, guaranteed-safe first
/// reveal, solve-time scoring.
pub struct MinesGame {
    io: GameIo,
    state: Mutex<MinesState>,
    clock: TimerSlot,
    effect: TimerSlot,
    weak: Weak<MinesGame>,
}

impl MinesGame {
    pub fn new(io: GameIo, seed: u64) -> Arc<Self> {
        let best = io.scores.load_best(GAME_ID, BEST_DEFAULT);
        Arc::new_cyclic(|weak| Self {
            io,
            state: Mutex::new(MinesState::new(seed, best)),
            clock: TimerSlot::new(),
            effect: TimerSlot::new(),
            weak: weak.clone(),
        })
    }

    fn start(&self) {
        let batch = {
            let mut state = lock(&self.state);
            self.clock.cancel();
            self.effect.cancel();
            state.cells.reset();
            state.mines.reset();
            state.pending_mines.clear();
            state.awaiting_first_reveal = true;
            state.started = None;
            state.elapsed = 0;
            state.opened = 0;
            state.phase = Phase::Playing;

            let mut batch = state.hud();
            for key in GRID.keys() {
                batch.push((key, TileView::Covered));
            }
            batch
        };
        self.io.paint(&batch);
        self.io.audio.sfx(Sound::Start);
        self.io.audio.voice(Voice::Start);
    }

    fn reveal(&self, cell: Coord2) {
        let mut won = false;
        let mut hit_mine = false;
        let mut flooded = false;
        let batch = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() || state.cells[cell] != MinesCell::Hidden {
                return;
            }

            if state.awaiting_first_reveal {
                state.awaiting_first_reveal = false;
                state.generate(cell);
                state.started = Some(Instant::now());
                self.arm_clock();
            }

            if state.mines[cell] {
                hit_mine = true;
                state.phase = Phase::Over(Outcome::Lost);
                state.elapsed = state.final_time();
                self.clock.cancel();

                let remaining: VecDeque<Coord2> = GRID
                    .cells()
                    .filter(|&pos| state.mines[pos] && pos != cell)
                    .collect();
                state.pending_mines = remaining;
                self.arm_effect(REVEAL_LEAD);

                let mut batch = PaintBatch::new();
                batch.push((GRID.cell_to_key(cell), TileView::Mine { triggered: true }));
                batch
            } else {
                let before = state.opened;
                let mut batch = state.flood_open(cell);
                flooded = state.opened > before + 1;

                if state.opened >= state.safe_cell_count() {
                    won = true;
                    state.phase = Phase::Over(Outcome::Won);
                    state.elapsed = state.final_time();
                    self.clock.cancel();
                    self.effect.cancel();

                    let solve_time = i64::from(state.elapsed);
                    if POLICY.improves(solve_time, state.best) {
                        state.best = solve_time;
                        self.io.scores.save_best(GAME_ID, solve_time);
                    }

                    batch = state.hud();
                    for pos in GRID.cells() {
                        let view = if state.mines[pos] {
                            TileView::Defused
                        } else {
                            state.cells[pos].view()
                        };
                        batch.push((GRID.cell_to_key(pos), view));
                    }
                    batch.push((BANNER_KEY, TileView::Banner(Banner::Win)));
                    batch.push((START_KEY, TileView::Banner(Banner::Start)));
                }
                batch
            }
        };
        self.io.paint(&batch);

        if hit_mine {
            self.io.audio.sfx(Sound::Explosion);
            self.io.audio.voice(Voice::GameOver);
        } else if won {
            self.io.audio.sfx(Sound::Win);
            self.io.audio.voice(Voice::Win);
        } else if flooded {
            self.io.audio.sfx(Sound::Flood);
        } else {
            self.io.audio.sfx(Sound::Reveal);
        }
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
        let update = {
            let mut state = lock(&self.state);
            if !state.phase.is_playing() {
                return;
            }
            state.elapsed = state.final_time();
            self.arm_clock();
            (2, TileView::Stat(Stat::TimerSecs(state.elapsed)))
        };
        self.io.set_key(update.0, update.1);
    }

    fn arm_effect(&self, delay: Duration) {
        let weak = self.weak.clone();
        self.effect.arm(delay, move || {
            if let Some(game) = weak.upgrade() {
                game.reveal_step();
            }
        });
    }

    /// Staged all-mines reveal after a loss, one tile per step so the
    /// cascade reads on the hardware. Canceled wholesale by a restart.
    fn reveal_step(&self) {
        let batch = {
            let mut state = lock(&self.state);
            if state.phase != Phase::Over(Outcome::Lost) {
                return;
            }
            match state.pending_mines.pop_front() {
                Some(pos) => {
                    self.arm_effect(REVEAL_STEP);
                    let mut batch = PaintBatch::new();
                    batch.push((GRID.cell_to_key(pos), TileView::Mine { triggered: false }));
                    batch
                }
                None => {
                    self.arm_over_screen();
                    return;
                }
            }
        };
        self.io.paint(&batch);
    }

    fn arm_over_screen(&self) {
        let weak = self.weak.clone();
        self.effect.arm(OVER_SCREEN_DELAY, move || {
            let Some(game) = weak.upgrade() else { return };
            let batch = {
                let state = lock(&game.state);
                if state.phase != Phase::Over(Outcome::Lost) {
                    return;
                }
                let mut batch = state.hud();
                batch.push((BANNER_KEY, TileView::Banner(Banner::GameOver)));
                batch.push((START_KEY, TileView::Banner(Banner::Start)));
                batch
            };
            game.io.paint(&batch);
        });
    }

    #[cfg(test)]
    fn force_board(&self, mines: &[Coord2]) {
        let mut state = lock(&self.state);
        state.awaiting_first_reveal = false;
        state.started = Some(Instant::now());
        state.mines.reset();
        for &pos in mines {
            state.mines[pos] = true;
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Phase, Vec<Coord2>, u16) {
        let state = lock(&self.state);
        let mines = GRID.cells().filter(|&pos| state.mines[pos]).collect();
        (state.phase, mines, state.opened)
    }
}

impl Game for MinesGame {
    fn title(&self) -> &'static str {
        "MINESWEEP"
    }

    fn show_idle(&self) {
        let batch = {
            let mut state = lock(&self.state);
            state.phase = Phase::Idle;
            self.clock.cancel();
            self.effect.cancel();

            let mut batch = state.hud();
            for key in GRID.keys() {
                let view = if key == START_KEY {
                    TileView::Banner(Banner::Start)
                } else {
                    TileView::Covered
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

        let Some(cell) = GRID.key_to_cell(key) else {
            return;
        };
        self.reveal(cell);
    }

    fn shutdown(&self) {
        self.clock.cancel();
        self.effect.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Outcome;
    use crate::scores::ScoreStore;
    use crate::testutil::rig;

    fn started_game(seed: u64) -> (Arc<MinesGame>, crate::testutil::TestRig) {
        let rig = rig();
        let game = MinesGame::new(rig.io.clone(), seed);
        game.on_key(START_KEY, true);
        (game, rig)
    }

    #[test]
    fn first_reveal_and_its_neighbors_are_never_mined() {
        for seed in 0..64 {
            let (game, _rig) = started_game(seed);

            game.on_key(GRID.cell_to_key((1, 4)), true);

            let (_, mines, _) = game.snapshot();
            assert_eq!(mines.len(), MINE_COUNT as usize, "seed {seed}");
            let zone = crate::types::NeighborIter::new((1, 4), GRID.size(), Adjacency::Eight);
            for pos in zone.chain([(1, 4)]) {
                assert!(!mines.contains(&pos), "seed {seed}: mine at {pos:?}");
            }
            game.shutdown();
        }
    }

    #[test]
    fn revealing_a_mine_loses_and_stages_the_cascade() {
        let (game, rig) = started_game(1);
        game.force_board(&[(0, 0), (0, 1), (2, 6), (2, 7), (1, 7)]);

        game.on_key(GRID.cell_to_key((0, 0)), true);

        let (phase, _, _) = game.snapshot();
        assert_eq!(phase, Phase::Over(Outcome::Lost));
        assert_eq!(
            rig.sink.view_at(GRID.cell_to_key((0, 0))),
            Some(TileView::Mine { triggered: true })
        );
        // the staged reveal of the remaining mines is pending
        assert!(game.effect.is_armed());
        game.shutdown();
    }

    #[test]
    fn flood_fill_opens_the_empty_region_and_its_border() {
        let (game, rig) = started_game(2);
        // mines across the top-right corner leave one connected region
        game.force_board(&[(0, 3), (0, 4), (0, 5), (0, 6), (0, 7)]);
        rig.sink.clear_log();

        game.on_key(GRID.cell_to_key((2, 0)), true);

        let (phase, _, opened) = game.snapshot();
        // every safe cell is reachable, so one tap sweeps the board
        assert_eq!(opened, GRID.cell_count() - u16::from(MINE_COUNT));
        assert_eq!(phase, Phase::Over(Outcome::Won));
        assert_eq!(
            rig.sink.view_at(GRID.cell_to_key((2, 0))),
            Some(TileView::Open(0))
        );
        assert_eq!(
            rig.sink.view_at(GRID.cell_to_key((1, 3))),
            Some(TileView::Open(2)),
            "numbered border cells open with their counts"
        );
        game.shutdown();
    }

    #[test]
    fn winning_commits_a_faster_time() {
        let (game, rig) = started_game(3);
        game.force_board(&[(0, 3), (0, 4), (0, 5), (0, 6), (0, 7)]);

        game.on_key(GRID.cell_to_key((2, 0)), true);

        assert!(rig.scores.load_best(GAME_ID, BEST_DEFAULT) < BEST_DEFAULT);
        game.shutdown();
    }

    #[test]
    fn grid_taps_are_ignored_while_idle() {
        let rig = rig();
        let game = MinesGame::new(rig.io.clone(), 4);
        game.show_idle();
        rig.sink.clear_log();

        game.on_key(GRID.cell_to_key((1, 1)), true);
        game.on_key(9, false); // release events carry no action

        assert_eq!(rig.sink.paint_count(), 0);
        let (phase, _, _) = game.snapshot();
        assert_eq!(phase, Phase::Idle);
    }

    #[test]
    fn restart_resets_the_board_and_cancels_timers() {
        let (game, _rig) = started_game(5);
        game.force_board(&[(0, 0), (0, 1), (0, 2), (0, 3), (0, 4)]);
        game.on_key(GRID.cell_to_key((0, 0)), true); // lose

        game.on_key(START_KEY, true); // restart from the terminal screen

        let (phase, mines, opened) = game.snapshot();
        assert_eq!(phase, Phase::Playing);
        assert!(mines.is_empty(), "board regenerates on first reveal");
        assert_eq!(opened, 0);
        assert!(!game.effect.is_armed(), "stale cascade must be canceled");
        game.shutdown();
    }
}
