use crate::models::{FeeSample, Position, RangeStatus};

/// Band (in percent-through-range) inside which a position counts as
/// comfortably in range; at or outside it the position is near an edge
const NEAR_EDGE_LOW_PCT: f64 = 30.0;
const NEAR_EDGE_HIGH_PCT: f64 = 70.0;

/// Raw pool-side inputs for valuing one position.
///
/// `bin_price` is the price of one X in Y at the active bin; `quote_usd`
/// is the oracle USD price of Y. X's USD price is derived from the pool's
/// own bin price rather than an independent oracle, keeping the valuation
/// consistent with on-chain state. `quote_usd == None` means the oracle
/// lookup failed this cycle.
#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    pub active_bin: i32,
    pub bin_price: f64,
    pub quote_usd: Option<f64>,
    pub amount_x: f64,
    pub amount_y: f64,
}

/// Percent of the way through [min, max] the active bin sits; below the
/// range this goes negative, above it exceeds 100
pub fn percentage_through_range(active_bin: i32, min_bin: i32, max_bin: i32) -> f64 {
    if max_bin <= min_bin {
        // Single-bin range: the position is either on it or outside it
        return if active_bin < min_bin {
            0.0
        } else if active_bin > max_bin {
            100.0
        } else {
            50.0
        };
    }
    (active_bin - min_bin) as f64 / (max_bin - min_bin) as f64 * 100.0
}

/// Pure function of (active, min, max); see the scenario tests below
pub fn range_status(active_bin: i32, min_bin: i32, max_bin: i32) -> RangeStatus {
    if active_bin < min_bin || active_bin > max_bin {
        return RangeStatus::OutOfRange;
    }
    let pct = percentage_through_range(active_bin, min_bin, max_bin);
    if pct <= NEAR_EDGE_LOW_PCT || pct >= NEAR_EDGE_HIGH_PCT {
        RangeStatus::NearEdge
    } else {
        RangeStatus::InRange
    }
}

/// Compute the current USD value, range status and P&L of a position from
/// a fresh pool snapshot.
///
/// On missing price data the valuation fields are left unset rather than
/// failing: one bad position must never block the rest of a scan.
pub fn valuate(position: &Position, snapshot: &PoolSnapshot) -> Position {
    let mut enriched = position.clone();

    enriched.current_active_bin = Some(snapshot.active_bin);
    enriched.percentage_through_range = Some(percentage_through_range(
        snapshot.active_bin,
        position.min_bin,
        position.max_bin,
    ));
    enriched.status = Some(range_status(
        snapshot.active_bin,
        position.min_bin,
        position.max_bin,
    ));

    if let Some(quote_usd) = snapshot.quote_usd {
        let x_usd = snapshot.bin_price * quote_usd;
        let value = snapshot.amount_x * x_usd + snapshot.amount_y * quote_usd;
        enriched.current_value_usd = Some(value);

        if position.snapshot_value_usd != 0.0 {
            enriched.percentage_change = Some(
                (value - position.snapshot_value_usd) / position.snapshot_value_usd * 100.0,
            );
        }
    }

    enriched
}

/// USD value of unclaimed fees at current prices
pub fn fees_usd(fee_x: f64, fee_y: f64, bin_price: f64, quote_usd: f64) -> f64 {
    fee_x * bin_price * quote_usd + fee_y * quote_usd
}

/// Annualized APR from fees earned over the trailing 24h, measured against
/// the position's current value. None until there are at least two samples
/// or while the value is unknown.
pub fn daily_apr(samples: &[FeeSample], current_value_usd: f64) -> Option<f64> {
    if samples.len() < 2 || current_value_usd <= 0.0 {
        return None;
    }

    // Samples are cumulative unclaimed-fee checkpoints; fee growth over the
    // window is last minus first, floored at zero for a claim in between.
    let earned = (samples.last()?.fees_usd - samples.first()?.fees_usd).max(0.0);
    Some(earned / current_value_usd * 365.0 * 100.0)
}
