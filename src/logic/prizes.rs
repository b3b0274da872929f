//! Prize pool split at tournament completion. Integer math only.

use crate::models::{Address, AgentStanding, Amount, TournamentFormat};

/// Basis-point denominator.
pub const BPS: u32 = 10_000;

/// Protocol fee taken off the pool before distribution (5%).
pub const DEFAULT_FEE_BPS: u32 = 500;

/// Single-elimination shares for first, second and third place.
pub const PODIUM_SHARES_BPS: [u32; 3] = [6_000, 2_500, 1_500];

/// `amount * num / den` without overflowing the intermediate product.
fn mul_div(amount: Amount, num: Amount, den: Amount) -> Amount {
    if den == 0 {
        return 0;
    }
    (amount / den) * num + (amount % den) * num / den
}

/// Pool left after the protocol fee.
pub fn distributable_pool(pool: Amount, fee_bps: u32) -> Amount {
    let fee = mul_div(pool, fee_bps.min(BPS) as Amount, BPS as Amount);
    pool - fee
}

/// Who gets paid what. `ranked` must already be ordered best first.
/// Zero payouts are left out; rounding dust stays in the pool.
pub fn compute_payouts(
    format: TournamentFormat,
    ranked: &[AgentStanding],
    distributable: Amount,
) -> Vec<(Address, Amount)> {
    let payouts: Vec<(Address, Amount)> = match format {
        TournamentFormat::SingleElimination => ranked
            .iter()
            .zip(PODIUM_SHARES_BPS)
            .map(|(s, bps)| {
                (
                    s.address.clone(),
                    mul_div(distributable, bps as Amount, BPS as Amount),
                )
            })
            .collect(),
        _ => {
            let total_points: Amount = ranked.iter().map(|s| s.points as Amount).sum();
            if total_points == 0 {
                let n = ranked.len() as Amount;
                ranked
                    .iter()
                    .map(|s| (s.address.clone(), mul_div(distributable, 1, n)))
                    .collect()
            } else {
                ranked
                    .iter()
                    .map(|s| {
                        (
                            s.address.clone(),
                            mul_div(distributable, s.points as Amount, total_points),
                        )
                    })
                    .collect()
            }
        }
    };
    payouts.into_iter().filter(|(_, amount)| *amount > 0).collect()
}
