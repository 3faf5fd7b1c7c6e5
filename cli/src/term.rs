//! Terminal stand-in for the physical button panel: a 4×8 grid of
//! colored cells, one keyboard key per button.

use std::io::{self, Write};
use std::sync::Mutex;

use crossterm::cursor::MoveTo;
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::queue;

use padcade_core::{Dir, KeyIndex, KeySink, TileView, PANEL_COLS};

const CELL_W: u16 = 8;
const CELL_H: u16 = 2;
const TOP: u16 = 1;

/// Keyboard rows mirroring the panel's four button rows.
const KEY_ROWS: [&str; 4] = ["12345678", "qwertyui", "asdfghjk", "zxcvbnm,"];

/// Maps a typed character to its button index.
pub fn key_for_char(c: char) -> Option<KeyIndex> {
    let c = c.to_ascii_lowercase();
    for (row, chars) in KEY_ROWS.iter().enumerate() {
        if let Some(col) = chars.find(c) {
            return Some(row as KeyIndex * PANEL_COLS + col as KeyIndex);
        }
    }
    None
}

/// Best-effort renderer: paint failures are logged and dropped, never
/// surfaced to the engine.
pub struct TermSink {
    // serializes concurrent paints from timer threads
    guard: Mutex<()>,
}

impl TermSink {
    pub fn new() -> Self {
        Self {
            guard: Mutex::new(()),
        }
    }

    pub fn draw_help(&self) {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let row = TOP + 4 * CELL_H + 1;
        let mut out = io::stdout();
        let _ = queue!(
            out,
            MoveTo(0, row),
            ResetColor,
            Print("keys: 1-8 / qwertyui / asdfghjk / zxcvbnm,   esc quits"),
        );
        let _ = out.flush();
    }

    fn draw(&self, key: KeyIndex, view: TileView) -> io::Result<()> {
        let (label, fg, bg) = appearance(view);
        let col = u16::from(key % PANEL_COLS) * CELL_W;
        let row = u16::from(key / PANEL_COLS) * CELL_H + TOP;

        let mut out = io::stdout();
        queue!(
            out,
            MoveTo(col, row),
            SetForegroundColor(fg),
            SetBackgroundColor(bg),
            Print(format!("{label:^7}")),
            ResetColor,
        )?;
        out.flush()
    }
}

impl KeySink for TermSink {
    fn set_key(&self, key: KeyIndex, view: TileView) {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = self.draw(key, view) {
            log::debug!("paint of key {key} failed: {err}");
        }
    }
}

/// Palette backing the engine's color ids.
fn palette(color: u8) -> Color {
    match color % 8 {
        0 => Color::Red,
        1 => Color::Green,
        2 => Color::Yellow,
        3 => Color::Blue,
        4 => Color::Magenta,
        5 => Color::Cyan,
        6 => Color::White,
        _ => Color::DarkYellow,
    }
}

fn appearance(view: TileView) -> (String, Color, Color) {
    use TileView::*;

    match view {
        Blank => (String::new(), Color::White, Color::Black),
        Covered => ("▒▒▒▒▒".into(), Color::DarkGrey, Color::Black),
        Open(0) => (String::new(), Color::White, Color::DarkGrey),
        Open(n) => (n.to_string(), Color::White, Color::DarkGrey),
        Mine { triggered: true } => ("*".into(), Color::Black, Color::Red),
        Mine { triggered: false } => ("*".into(), Color::Black, Color::DarkRed),
        Defused => ("ok".into(), Color::Black, Color::Green),
        CardBack => ("??".into(), Color::White, Color::DarkBlue),
        CardFace(c) => (String::new(), Color::Black, palette(c)),
        CardMatched(c) => ("==".into(), Color::Black, palette(c)),
        PatternCell(c) => (String::new(), Color::Black, palette(c)),
        PatternHole => ("?".into(), Color::White, Color::DarkGrey),
        PatternOption(c) => ("[ ]".into(), Color::Black, palette(c)),
        SequenceNumber { value, color } => (value.to_string(), palette(color), Color::Black),
        SequenceHidden => ("?".into(), Color::White, Color::DarkGrey),
        SnakeHead(dir) => {
            let head = match dir {
                Dir::Up => "^",
                Dir::Down => "v",
                Dir::Left => "<",
                Dir::Right => ">",
            };
            (head.into(), Color::Black, Color::Green)
        }
        SnakeBody => ("o".into(), Color::Black, Color::DarkGreen),
        Food => ("@".into(), Color::Red, Color::Black),
        Meteor => ("#".into(), Color::Yellow, Color::DarkRed),
        Ship => ("A".into(), Color::White, Color::DarkBlue),
        Beaver => ("B".into(), Color::Black, Color::DarkYellow),
        Splash => ("*".into(), Color::Black, Color::Cyan),
        Target => ("GO".into(), Color::Black, Color::Green),
        ReactionMs(ms) => (format!("{ms}ms"), Color::Green, Color::Black),
        FlashGood => ("ok".into(), Color::Black, Color::Green),
        FlashBad => ("X".into(), Color::White, Color::Red),
        Banner(banner) => match banner {
            padcade_core::Banner::Start => ("START".into(), Color::White, Color::DarkGreen),
            padcade_core::Banner::GameOver => ("OVER".into(), Color::White, Color::DarkRed),
            padcade_core::Banner::Win => ("WIN!".into(), Color::Black, Color::Green),
            padcade_core::Banner::NewBest => ("BEST!".into(), Color::Black, Color::Yellow),
            padcade_core::Banner::Logo => ("ARCADE".into(), Color::White, Color::DarkMagenta),
            padcade_core::Banner::BackToMenu => ("<MENU".into(), Color::Yellow, Color::DarkGrey),
            padcade_core::Banner::GameButton(title) => (title.into(), Color::White, Color::DarkBlue),
        },
        Stat(stat) => {
            let label = match stat {
                padcade_core::Stat::Title(t) => t.to_string(),
                padcade_core::Stat::Score(v) => format!("S:{v}"),
                padcade_core::Stat::Best(v) => format!("B:{v}"),
                padcade_core::Stat::BestUnset => "B:--".into(),
                padcade_core::Stat::TimerSecs(v) => format!("{v}s"),
                padcade_core::Stat::MinesLeft(v) => format!("M:{v}"),
                padcade_core::Stat::Moves { used, limit } => format!("{used}/{limit}"),
                padcade_core::Stat::Pairs { found, total } => format!("{found}/{total}"),
                padcade_core::Stat::Lives { left, max } => format!("L:{left}/{max}"),
                padcade_core::Stat::Level(v) => format!("LV{v}"),
                padcade_core::Stat::SpeedMs(v) => format!("{v}ms"),
                padcade_core::Stat::Round { current, total } => format!("R{current}/{total}"),
                padcade_core::Stat::AvgMs(v) => format!("~{v}"),
                padcade_core::Stat::LastMs(v) => format!("{v}ms"),
                padcade_core::Stat::Wait => return ("WAIT".into(), Color::White, Color::DarkRed),
                padcade_core::Stat::Go => return ("GO!".into(), Color::Black, Color::Green),
            };
            (label, Color::Grey, Color::Black)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_keyboard_row_maps_onto_the_panel() {
        assert_eq!(key_for_char('1'), Some(0));
        assert_eq!(key_for_char('8'), Some(7));
        assert_eq!(key_for_char('q'), Some(8));
        assert_eq!(key_for_char('i'), Some(15));
        assert_eq!(key_for_char('a'), Some(16));
        assert_eq!(key_for_char('z'), Some(24));
        assert_eq!(key_for_char(','), Some(31));
        assert_eq!(key_for_char('Q'), Some(8), "case-insensitive");
        assert_eq!(key_for_char('0'), None);
    }

    #[test]
    fn mapping_covers_all_32_buttons_exactly_once() {
        let mut seen: Vec<KeyIndex> = KEY_ROWS
            .iter()
            .flat_map(|row| row.chars())
            .filter_map(key_for_char)
            .collect();
        seen.sort_unstable();
        let expected: Vec<KeyIndex> = (0..32).collect();
        assert_eq!(seen, expected);
    }
}
