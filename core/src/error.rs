use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Coordinates outside the board")]
    OutOfBounds,
}

pub type Result<T> = core::result::Result<T, GameError>;
