//! Two-player tic-tac-toe.

use super::{EnvError, Environment};

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Board cells hold 0 (empty), 1 (player 0) or -1 (player 1).
#[derive(Debug, Clone)]
pub struct TicTacToe {
    board: [i8; 9],
    moves: Vec<usize>,
    winner: Option<usize>,
}

impl TicTacToe {
    pub fn new() -> Self {
        Self {
            board: [0; 9],
            moves: Vec::with_capacity(9),
            winner: None,
        }
    }

    fn stone(player: usize) -> i8 {
        if player == 0 {
            1
        } else {
            -1
        }
    }

    fn check_winner(&self) -> Option<usize> {
        LINES.iter().find_map(|line| {
            let sum: i8 = line.iter().map(|&i| self.board[i]).sum();
            match sum {
                3 => Some(0),
                -3 => Some(1),
                _ => None,
            }
        })
    }
}

impl Default for TicTacToe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicTacToe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for row in self.board.chunks(3) {
            for &cell in row {
                let c = match cell {
                    1 => 'O',
                    -1 => 'X',
                    _ => '.',
                };
                write!(f, "{}", c)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Environment for TicTacToe {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn play(&mut self, action: usize) -> Result<(), EnvError> {
        if self.terminal() {
            return Err(EnvError::GameOver);
        }
        let player = self.turn();
        if action >= 9 || self.board[action] != 0 {
            return Err(EnvError::IllegalAction { action, player });
        }
        self.board[action] = Self::stone(player);
        self.moves.push(action);
        self.winner = self.check_winner();
        Ok(())
    }

    fn turn(&self) -> usize {
        self.moves.len() % 2
    }

    fn terminal(&self) -> bool {
        self.winner.is_some() || self.moves.len() == 9
    }

    fn outcome(&self) -> Vec<f32> {
        match self.winner {
            Some(0) => vec![1.0, -1.0],
            Some(_) => vec![-1.0, 1.0],
            None => vec![0.0, 0.0],
        }
    }

    fn legal_actions(&self) -> Vec<usize> {
        (0..9).filter(|&i| self.board[i] == 0).collect()
    }

    fn action_length(&self) -> usize {
        9
    }

    fn players(&self) -> Vec<usize> {
        vec![0, 1]
    }

    /// Own stones, opponent stones, and a to-move flag.
    fn observation(&self, player: usize) -> Vec<f32> {
        let own = Self::stone(player);
        let mut obs = Vec::with_capacity(19);
        obs.extend(self.board.iter().map(|&c| if c == own { 1.0 } else { 0.0 }));
        obs.extend(self.board.iter().map(|&c| if c == -own { 1.0 } else { 0.0 }));
        obs.push(if self.turn() == player { 1.0 } else { 0.0 });
        obs
    }

    fn observation_size(&self) -> usize {
        19
    }

    fn action_to_str(&self, action: usize, _player: usize) -> String {
        let col = (b'A' + (action % 3) as u8) as char;
        format!("{}{}", col, action / 3 + 1)
    }

    fn str_to_action(&self, s: &str, _player: usize) -> Result<usize, EnvError> {
        let bytes = s.trim().as_bytes();
        if bytes.len() != 2 {
            return Err(EnvError::InvalidActionString(s.to_string()));
        }
        let col = bytes[0].to_ascii_uppercase().wrapping_sub(b'A') as usize;
        let row = bytes[1].wrapping_sub(b'1') as usize;
        if col >= 3 || row >= 3 {
            return Err(EnvError::InvalidActionString(s.to_string()));
        }
        Ok(row * 3 + col)
    }

    fn diff_info(&self, _player: usize) -> String {
        self.moves
            .last()
            .map(|&a| self.action_to_str(a, 0))
            .unwrap_or_default()
    }

    fn play_info(&mut self, info: &str) -> Result<(), EnvError> {
        if info.is_empty() {
            return Ok(());
        }
        let action = self.str_to_action(info, self.turn())?;
        self.play(action)
    }
}
