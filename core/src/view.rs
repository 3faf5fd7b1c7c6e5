use smallvec::SmallVec;

use crate::types::{Dir, KeyIndex};

/// Palette index shared by the card/pattern games. The renderer owns the
/// actual colors; the engine only ever names them by index.
pub type ColorId = u8;

/// Semantic content of one button. A cell's variant fully determines its
/// rendering: the sink turns a view into pixels, the engine never does.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TileView {
    /// Dark filler / switched-off button.
    Blank,
    /// Raised face-down tile (minesweeper cover, idle preview).
    Covered,
    /// Revealed minesweeper floor with its adjacent-mine count (0 = empty).
    Open(u8),
    Mine {
        triggered: bool,
    },
    /// Celebration tile over a defused mine after a win.
    Defused,
    CardBack,
    CardFace(ColorId),
    CardMatched(ColorId),
    PatternCell(ColorId),
    /// The '?' cell of a pattern puzzle.
    PatternHole,
    PatternOption(ColorId),
    SequenceNumber {
        value: u8,
        color: ColorId,
    },
    /// A number tile hidden behind a '?'.
    SequenceHidden,
    SnakeHead(Dir),
    SnakeBody,
    Food,
    Meteor,
    /// The dodge player's ship.
    Ship,
    Beaver,
    Splash,
    /// Lit reaction target.
    Target,
    /// Reaction hit feedback with the measured time.
    ReactionMs(u16),
    /// Green confirmation flash.
    FlashGood,
    /// Red error/penalty flash.
    FlashBad,
    Banner(Banner),
    Stat(Stat),
}

/// Full-tile text banners.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Banner {
    Start,
    GameOver,
    Win,
    NewBest,
    Logo,
    BackToMenu,
    GameButton(&'static str),
}

/// HUD stat tiles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stat {
    Title(&'static str),
    Score(u32),
    Best(i64),
    BestUnset,
    TimerSecs(u32),
    MinesLeft(u8),
    Moves { used: u32, limit: u32 },
    Pairs { found: u8, total: u8 },
    Lives { left: u8, max: u8 },
    Level(u32),
    SpeedMs(u32),
    Round { current: u8, total: u8 },
    AvgMs(u32),
    LastMs(u16),
    Wait,
    Go,
}

/// Batch of repaints produced by one transition: only the cells whose
/// content changed. Sized for the common steady-state case.
pub type PaintBatch = SmallVec<[(KeyIndex, TileView); 8]>;

/// The process-wide rendering sink. Implementations serialize paints and
/// swallow device errors; painting is best-effort by contract.
pub trait KeySink: Send + Sync {
    fn set_key(&self, key: KeyIndex, view: TileView);

    fn paint(&self, batch: &[(KeyIndex, TileView)]) {
        for &(key, view) in batch {
            self.set_key(key, view);
        }
    }
}
