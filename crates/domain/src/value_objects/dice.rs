//! Dice notation value objects, parsing and evaluation
//!
//! Supports expressions like "1d20+5", "2d6+1d4-1", "d100" and subtractive
//! pools such as "10-1d6". Rolling takes an injected die roller so the domain
//! layer stays free of RNG state.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Die sizes accepted in a dice term.
pub const SUPPORTED_DIE_SIZES: [u32; 7] = [4, 6, 8, 10, 12, 20, 100];

/// Upper bound on the number of dice a single expression may roll.
pub const MAX_DICE: u32 = 100;

/// Error when parsing a dice formula
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceParseError {
    /// The formula string is empty
    #[error("Empty dice formula")]
    Empty,
    /// Invalid format - expected terms like XdY or integers joined by + and -
    #[error("Invalid dice format: {0}")]
    InvalidFormat(String),
    /// No dice term survived parsing (only modifiers, zero counts or unsupported dice)
    #[error("Dice formula has nothing to roll")]
    NothingToRoll,
    /// More dice than a single roll allows
    #[error("Too many dice: {0} (maximum is 100)")]
    TooManyDice(u32),
    /// Modifier overflow
    #[error("Modifier value overflow")]
    ModifierOverflow,
}

/// One `[N]dS` term. A negative count marks a subtractive pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceTerm {
    pub count: i32,
    pub sides: u32,
}

impl DiceTerm {
    /// Number of physical dice this term rolls.
    pub fn dice(&self) -> u32 {
        self.count.unsigned_abs()
    }

    pub fn is_negative(&self) -> bool {
        self.count < 0
    }

    fn dice_i32(&self) -> i32 {
        i32::try_from(self.dice()).unwrap_or(i32::MAX)
    }

    /// Sum of every face at its maximum
    fn face_total(&self) -> i32 {
        self.dice_i32()
            .saturating_mul(i32::try_from(self.sides).unwrap_or(i32::MAX))
    }
}

impl fmt::Display for DiceTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.dice(), self.sides)
    }
}

/// A term dropped during parsing because its die size is not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTerm {
    /// The term as written (after whitespace removal), including its sign
    pub term: String,
    pub sides: u32,
}

/// Parse output: the usable expression plus any per-term rejections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNotation {
    pub expression: DiceExpression,
    pub rejected: Vec<RejectedTerm>,
}

/// A parsed dice expression like "2d6+3"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    /// Dice terms in the order written
    pub terms: Vec<DiceTerm>,
    /// Sum of all integer modifiers
    pub modifier: i32,
}

enum RawTerm {
    Dice { count: u32, sides: u32 },
    Constant(i32),
}

impl DiceExpression {
    /// Parse a dice formula, discarding unsupported terms.
    ///
    /// Use [`DiceExpression::parse_with_report`] to see which terms were dropped.
    pub fn parse(input: &str) -> Result<Self, DiceParseError> {
        Self::parse_with_report(input).map(|parsed| parsed.expression)
    }

    /// Parse a dice formula and report terms with unsupported die sizes.
    ///
    /// Grammar: terms joined by `+`/`-`, each either `[N]dS` (N defaults to 1)
    /// or a bare integer. Whitespace is ignored and `D` is accepted for `d`.
    /// Terms with a zero count are dropped; an unsupported die size rejects
    /// only that term.
    pub fn parse_with_report(input: &str) -> Result<ParsedNotation, DiceParseError> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if compact.is_empty() {
            return Err(DiceParseError::Empty);
        }

        let mut terms = Vec::new();
        let mut rejected = Vec::new();
        let mut modifier: i32 = 0;
        let mut total_dice: u32 = 0;

        for (negative, body) in split_terms(&compact)? {
            match parse_term(body)? {
                RawTerm::Dice { count: 0, .. } => {}
                RawTerm::Dice { sides, .. } if !SUPPORTED_DIE_SIZES.contains(&sides) => {
                    let sign = if negative { "-" } else { "" };
                    rejected.push(RejectedTerm {
                        term: format!("{sign}{body}"),
                        sides,
                    });
                }
                RawTerm::Dice { count, sides } => {
                    total_dice = total_dice.saturating_add(count);
                    if total_dice > MAX_DICE {
                        return Err(DiceParseError::TooManyDice(total_dice));
                    }
                    // count <= MAX_DICE here
                    let count = count as i32;
                    terms.push(DiceTerm {
                        count: if negative { -count } else { count },
                        sides,
                    });
                }
                RawTerm::Constant(value) => {
                    let value = if negative { -value } else { value };
                    modifier = modifier
                        .checked_add(value)
                        .ok_or(DiceParseError::ModifierOverflow)?;
                }
            }
        }

        if terms.is_empty() {
            return Err(DiceParseError::NothingToRoll);
        }

        Ok(ParsedNotation {
            expression: Self { terms, modifier },
            rejected,
        })
    }

    /// True when the expression is exactly one d20 (the only shape that
    /// honours advantage and disadvantage).
    pub fn is_single_d20(&self) -> bool {
        matches!(self.terms.as_slice(), [DiceTerm { count: 1, sides: 20 }])
    }

    /// Total number of dice rolled (without an advantage re-roll)
    pub fn dice_count(&self) -> u32 {
        self.terms.iter().map(DiceTerm::dice).sum()
    }

    /// Lowest possible total, saturating at the `i32` bounds
    pub fn min_total(&self) -> i32 {
        self.terms
            .iter()
            .map(|t| {
                if t.is_negative() {
                    t.face_total().saturating_neg()
                } else {
                    t.dice_i32()
                }
            })
            .fold(self.modifier, i32::saturating_add)
    }

    /// Highest possible total, saturating at the `i32` bounds
    pub fn max_total(&self) -> i32 {
        self.terms
            .iter()
            .map(|t| {
                if t.is_negative() {
                    t.dice_i32().saturating_neg()
                } else {
                    t.face_total()
                }
            })
            .fold(self.modifier, i32::saturating_add)
    }

    /// Roll the expression.
    ///
    /// `roll_die(sides)` must return a value in `1..=sides`; out-of-range
    /// values are clamped. Advantage/disadvantage only applies when the
    /// expression is a single d20, in which case a second d20 is rolled and
    /// both rolls are recorded.
    pub fn roll_with<F>(&self, mode: RollMode, mut roll_die: F) -> DiceRollResult
    where
        F: FnMut(u32) -> u32,
    {
        let mode = if self.is_single_d20() {
            mode
        } else {
            RollMode::Normal
        };

        let mut rolls = Vec::with_capacity(self.dice_count() as usize + 1);
        for term in &self.terms {
            for _ in 0..term.dice() {
                rolls.push(DieRoll {
                    sides: term.sides,
                    value: roll_die(term.sides).clamp(1, term.sides),
                    negative: term.is_negative(),
                    kept: true,
                });
            }
        }

        if mode != RollMode::Normal {
            let second = roll_die(20).clamp(1, 20);
            if let Some(first) = rolls.first_mut() {
                let keep_first = match mode {
                    RollMode::Advantage => first.value >= second,
                    RollMode::Disadvantage => first.value <= second,
                    RollMode::Normal => true,
                };
                first.kept = keep_first;
                rolls.push(DieRoll {
                    sides: 20,
                    value: second,
                    negative: false,
                    kept: !keep_first,
                });
            }
        }

        let dice_total: i32 = rolls
            .iter()
            .filter(|r| r.kept)
            .map(DieRoll::signed_value)
            .sum();
        let is_critical = rolls.iter().any(|r| r.sides == 20 && r.value == 20);
        let is_fumble = rolls.iter().any(|r| r.sides == 20 && r.value == 1);

        DiceRollResult {
            notation: self.to_string(),
            rolls,
            dice_total,
            modifier: self.modifier,
            total: dice_total.saturating_add(self.modifier),
            mode,
            is_critical,
            is_fumble,
        }
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if term.is_negative() {
                write!(f, "-")?;
            } else if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "{term}")?;
        }
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

fn split_terms(compact: &str) -> Result<Vec<(bool, &str)>, DiceParseError> {
    let mut out = Vec::new();
    let mut rest = compact;
    loop {
        let (negative, after) = match rest.as_bytes().first() {
            Some(b'-') => (true, &rest[1..]),
            Some(b'+') => (false, &rest[1..]),
            _ => (false, rest),
        };
        let end = after
            .find(|c: char| c == '+' || c == '-')
            .unwrap_or(after.len());
        let body = &after[..end];
        if body.is_empty() {
            return Err(DiceParseError::InvalidFormat(format!(
                "Missing term in '{compact}'"
            )));
        }
        out.push((negative, body));
        rest = &after[end..];
        if rest.is_empty() {
            return Ok(out);
        }
    }
}

fn parse_term(body: &str) -> Result<RawTerm, DiceParseError> {
    if let Some((count, sides)) = body.split_once('d') {
        let count = if count.is_empty() {
            1
        } else {
            count.parse::<u32>().map_err(|_| {
                DiceParseError::InvalidFormat(format!("Invalid dice count: '{count}'"))
            })?
        };
        let sides = sides.parse::<u32>().map_err(|_| {
            DiceParseError::InvalidFormat(format!("Invalid die size: '{sides}'"))
        })?;
        Ok(RawTerm::Dice { count, sides })
    } else {
        body.parse::<i32>()
            .map(RawTerm::Constant)
            .map_err(|_| DiceParseError::InvalidFormat(format!("Invalid term: '{body}'")))
    }
}

/// How a lone d20 is rolled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl RollMode {
    /// Build from request flags. Advantage and disadvantage cancel out.
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Self {
        match (advantage, disadvantage) {
            (true, false) => Self::Advantage,
            (false, true) => Self::Disadvantage,
            _ => Self::Normal,
        }
    }
}

/// One physical die result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieRoll {
    pub sides: u32,
    pub value: u32,
    /// Rolled as part of a subtractive pool
    pub negative: bool,
    /// False for the discarded die of an advantage/disadvantage pair
    pub kept: bool,
}

impl DieRoll {
    pub fn signed_value(&self) -> i32 {
        if self.negative {
            -(self.value as i32)
        } else {
            self.value as i32
        }
    }
}

/// Result of rolling dice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRollResult {
    /// Normalized notation that was rolled
    pub notation: String,
    /// Every die rolled, including a discarded advantage/disadvantage die
    pub rolls: Vec<DieRoll>,
    /// Signed sum of kept dice
    pub dice_total: i32,
    pub modifier: i32,
    /// Final total (dice_total + modifier)
    pub total: i32,
    pub mode: RollMode,
    pub is_critical: bool,
    pub is_fumble: bool,
}

impl DiceRollResult {
    /// Raw values of every die, in roll order
    pub fn individual_rolls(&self) -> Vec<u32> {
        self.rolls.iter().map(|r| r.value).collect()
    }

    /// Format as a breakdown string (e.g., "2d6+3: [4, 5] = 12")
    pub fn breakdown(&self) -> String {
        let rolls: Vec<String> = self
            .rolls
            .iter()
            .map(|r| match (r.kept, r.negative) {
                (false, _) => format!("({})", r.value),
                (true, true) => format!("-{}", r.value),
                (true, false) => r.value.to_string(),
            })
            .collect();
        let mode = match self.mode {
            RollMode::Normal => "",
            RollMode::Advantage => " (advantage)",
            RollMode::Disadvantage => " (disadvantage)",
        };
        format!(
            "{}{}: [{}] = {}",
            self.notation,
            mode,
            rolls.join(", "),
            self.total
        )
    }
}
