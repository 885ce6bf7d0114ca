//! The two player marks.

use serde::{Deserialize, Serialize};

/// A player's mark on the board.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Symbol {
    /// Cross.
    X,
    /// Nought.
    O,
}

impl Symbol {
    /// Returns the other mark.
    pub fn opponent(self) -> Self {
        match self {
            Self::X => Self::O,
            Self::O => Self::X,
        }
    }
}

/// Opposite of an optional mark; no mark has no opposite.
pub fn opposite_symbol(symbol: Option<Symbol>) -> Option<Symbol> {
    symbol.map(Symbol::opponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_is_an_involution() {
        for s in [Symbol::X, Symbol::O] {
            assert_ne!(opposite_symbol(Some(s)), Some(s));
            assert_eq!(opposite_symbol(opposite_symbol(Some(s))), Some(s));
        }
    }

    #[test]
    fn no_symbol_has_no_opposite() {
        assert_eq!(opposite_symbol(None), None);
    }

    #[test]
    fn parses_wire_strings() {
        assert_eq!("X".parse::<Symbol>().ok(), Some(Symbol::X));
        assert_eq!("O".parse::<Symbol>().ok(), Some(Symbol::O));
        assert!("Z".parse::<Symbol>().is_err());
        assert_eq!(Symbol::O.to_string(), "O");
    }
}
