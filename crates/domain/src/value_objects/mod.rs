//! Value objects - Immutable objects defined by their attributes

mod dice;

pub use dice::{
    DiceExpression, DiceParseError, DiceRollResult, DiceTerm, DieRoll, ParsedNotation,
    RejectedTerm, RollMode, MAX_DICE, SUPPORTED_DIE_SIZES,
};
