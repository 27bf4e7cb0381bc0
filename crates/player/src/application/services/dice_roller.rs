//! Local dice rolling backed by `rand`

use rand::Rng;
use tavern_domain::{DiceExpression, DiceRollResult, RollMode};

/// Roll `expression` with the thread-local RNG
pub fn roll(expression: &DiceExpression, mode: RollMode) -> DiceRollResult {
    roll_with_rng(expression, mode, &mut rand::thread_rng())
}

/// Roll with a caller-provided RNG (seeded in tests)
pub fn roll_with_rng<R: Rng + ?Sized>(
    expression: &DiceExpression,
    mode: RollMode,
    rng: &mut R,
) -> DiceRollResult {
    expression.roll_with(mode, |sides| rng.gen_range(1..=sides.max(1)))
}
