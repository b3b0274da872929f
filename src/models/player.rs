//! AgentStanding: one competing agent's position inside a tournament.

use serde::{Deserialize, Serialize};

/// Ledger address of an agent (hex string).
pub type Address = String;

/// Rating assigned to agents the ledger knows nothing about.
pub const DEFAULT_ELO: i32 = 1200;

/// An agent's standing in one tournament.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AgentStanding {
    pub address: Address,
    /// Display handle; defaults to a shortened address until the ledger supplies one.
    pub handle: String,
    pub elo: i32,
    /// Tournament points (one per match win).
    pub points: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub eliminated: bool,
}

impl AgentStanding {
    /// New standing with default rating and a handle derived from the address.
    pub fn new(address: impl Into<Address>) -> Self {
        let address = address.into();
        let handle = short_handle(&address);
        Self {
            address,
            handle,
            elo: DEFAULT_ELO,
            points: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            eliminated: false,
        }
    }

    pub fn with_elo(mut self, elo: i32) -> Self {
        self.elo = elo;
        self
    }

    /// Record a win: one tournament point.
    pub fn add_win(&mut self) {
        self.wins += 1;
        self.points += 1;
    }

    pub fn add_loss(&mut self) {
        self.losses += 1;
    }

    pub fn add_draw(&mut self) {
        self.draws += 1;
    }

    pub fn eliminate(&mut self) {
        self.eliminated = true;
    }
}

/// First six and last four characters of a long address.
pub fn short_handle(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_shortens_long_addresses() {
        let s = AgentStanding::new("0x1234567890abcdef");
        assert_eq!(s.handle, "0x1234…cdef");
        assert_eq!(AgentStanding::new("0xabc").handle, "0xabc");
    }

    #[test]
    fn win_awards_one_point() {
        let mut s = AgentStanding::new("0xabc");
        s.add_win();
        s.add_loss();
        assert_eq!((s.points, s.wins, s.losses), (1, 1, 1));
    }
}
