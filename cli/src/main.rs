//! Terminal launcher for the button-grid arcade.
//!
//! Emulates the 4×8 panel with crossterm: each button is a colored cell,
//! each keyboard key a button press. The engine itself never knows it is
//! not talking to real hardware.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};

use padcade_core::{AudioPolicy, Channels, GameIo, JsonScoreStore, SilentAudio};

use crate::audio::ProcessAudioSink;
use crate::menu::{registry, Arcade};
use crate::term::{key_for_char, TermSink};

mod audio;
mod menu;
mod term;

#[derive(Parser)]
#[command(name = "padcade", about = "Arcade mini-games on a 4x8 button grid")]
struct Cli {
    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity,

    /// Launch straight into one game instead of the menu.
    #[arg(long)]
    game: Option<String>,

    /// List the available game ids and exit.
    #[arg(long)]
    list: bool,

    /// Directory holding <cue>.wav sound files; silent when omitted.
    #[arg(long)]
    sounds: Option<PathBuf>,

    /// Player command used to play sound files.
    #[arg(long, default_value = "afplay")]
    player: String,

    /// Disable voice lines, keep sound effects.
    #[arg(long)]
    no_voices: bool,

    /// Alternate score-file location.
    #[arg(long)]
    scores: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    if cli.list {
        for entry in registry() {
            println!("{}", entry.id);
        }
        return Ok(());
    }

    let sink = Arc::new(TermSink::new());
    let audio = match &cli.sounds {
        Some(dir) => Arc::new(AudioPolicy::new(Arc::new(ProcessAudioSink::new(
            cli.player.clone(),
            dir.clone(),
        )))),
        None => Arc::new(AudioPolicy::new(Arc::new(SilentAudio))),
    };
    if cli.no_voices {
        audio.set_enabled(Channels::VOICE, false);
    }
    let scores = match &cli.scores {
        Some(path) => Arc::new(JsonScoreStore::at_path(path.clone())),
        None => Arc::new(JsonScoreStore::open_default()),
    };

    let io = GameIo {
        sink: sink.clone(),
        audio: audio.clone(),
        scores,
    };
    let arcade = Arcade::new(io);

    terminal::enable_raw_mode()?;
    execute!(std::io::stdout(), EnterAlternateScreen, cursor::Hide)?;

    let result = run(&arcade, &sink, cli.game.as_deref());

    // Always try to restore terminal state.
    arcade.stop_active();
    audio.stop_all();
    let _ = execute!(std::io::stdout(), LeaveAlternateScreen, cursor::Show);
    let _ = terminal::disable_raw_mode();
    result
}

fn run(arcade: &Arcade, sink: &TermSink, direct: Option<&str>) -> Result<()> {
    match direct {
        Some(id) => {
            if !arcade.launch(id) {
                anyhow::bail!("unknown game {id:?}; try --list");
            }
        }
        None => arcade.show_menu(),
    }
    sink.draw_help();

    loop {
        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(())
                }
                KeyCode::Char(c) => {
                    if let Some(button) = key_for_char(c) {
                        match key.kind {
                            KeyEventKind::Press => arcade.on_key(button, true),
                            KeyEventKind::Release => arcade.on_key(button, false),
                            KeyEventKind::Repeat => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
