//! Game environment contract and registry.
//!
//! Workers drive games exclusively through [`Environment`]. Turn-based
//! games with any number of players fit the contract; single-player games
//! keep the default `turn` and `players`.

pub mod tictactoe;

use std::str::FromStr;

use thiserror::Error;

pub use tictactoe::TicTacToe;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),
    #[error("illegal action {action} for player {player}")]
    IllegalAction { action: usize, player: usize },
    #[error("cannot parse action from {0:?}")]
    InvalidActionString(String),
    #[error("game is already over")]
    GameOver,
}

pub trait Environment: Send {
    /// Start a new game.
    fn reset(&mut self);

    /// Stochastic transition before the next decision, if the game has one.
    fn chance(&mut self) {}

    /// Apply `action` for the current turn player.
    fn play(&mut self, action: usize) -> Result<(), EnvError>;

    fn turn(&self) -> usize {
        0
    }

    fn terminal(&self) -> bool;

    /// Immediate reward of each player after the last transition. Empty when
    /// the game only scores its outcome.
    fn reward(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Final return of each player.
    fn outcome(&self) -> Vec<f32>;

    /// Legal actions of the current turn player.
    fn legal_actions(&self) -> Vec<usize>;

    /// Size of the action space.
    fn action_length(&self) -> usize;

    fn players(&self) -> Vec<usize> {
        vec![0]
    }

    /// Feature vector of the state as seen by `player`.
    fn observation(&self, player: usize) -> Vec<f32>;

    fn observation_size(&self) -> usize;

    fn action_to_str(&self, action: usize, _player: usize) -> String {
        action.to_string()
    }

    fn str_to_action(&self, s: &str, _player: usize) -> Result<usize, EnvError> {
        s.trim()
            .parse()
            .map_err(|_| EnvError::InvalidActionString(s.to_string()))
    }

    /// State delta sent to a remote player in network battles.
    fn diff_info(&self, _player: usize) -> String {
        String::new()
    }

    fn reset_info(&mut self, _info: &str) {
        self.reset();
    }

    fn chance_info(&mut self, _info: &str) {}

    fn play_info(&mut self, info: &str) -> Result<(), EnvError> {
        let action = self.str_to_action(info, self.turn())?;
        self.play(action)
    }
}

/// Registry of environments, keyed by the config string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    TicTacToe,
}

impl EnvKind {
    pub fn make(&self) -> Box<dyn Environment> {
        match self {
            EnvKind::TicTacToe => Box::new(TicTacToe::new()),
        }
    }
}

impl FromStr for EnvKind {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tictactoe" | "tic-tac-toe" => Ok(EnvKind::TicTacToe),
            other => Err(EnvError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Build an environment from its registry key.
pub fn make_env(name: &str) -> Result<Box<dyn Environment>, EnvError> {
    Ok(name.parse::<EnvKind>()?.make())
}
