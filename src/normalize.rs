use crate::{
    error::{ParseError, ParseErrorKind},
    types::{NormalizedTransaction, RawTransaction},
};
use alloy_primitives::U256;
use chrono::{DateTime, NaiveDateTime};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// 1 unit = 10^18 wei.
pub const WEI_DECIMALS: u32 = 18;

// Largest mantissa a Decimal holds exactly.
const MAX_DECIMAL_BITS: usize = 96;

// Rows beyond this many parse failures are only logged at debug level.
const LOGGED_PARSE_FAILURES: usize = 5;

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parses a timestamp to whole Unix seconds (UTC).
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` with an optional numeric offset or trailing
/// `UTC`, the same with a `T` separator and no zone (read as UTC), and bare epoch seconds.
/// Fractional seconds are dropped toward the earlier second.
pub fn parse_instant(raw: &str) -> Result<i64, ParseError> {
    let s = raw.trim();
    let invalid = || ParseError::InvalidTimestamp(raw.to_string());
    if s.is_empty() {
        return Err(ParseError::MissingField("block_timestamp"));
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = s.parse().map_err(|_| invalid())?;
        return DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.timestamp())
            .ok_or_else(invalid);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Ok(dt.timestamp());
        }
    }

    let naive = s.strip_suffix("UTC").map(str::trim_end).unwrap_or(s);
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    Err(invalid())
}

/// Converts a base-unit (wei) integer string to the target unit, exactly.
///
/// The string must be a non-negative base-10 integer, optionally followed by an all-zero
/// fraction (`"5.0"`). Values above 2^96 - 1 wei cannot be represented exactly and are
/// rejected rather than rounded.
pub fn wei_to_unit(raw: &str) -> Result<Decimal, ParseError> {
    let trimmed = raw.trim();
    let invalid = || ParseError::InvalidValue(raw.to_string());
    let out_of_range = || ParseError::ValueOutOfRange(raw.to_string());
    if trimmed.is_empty() {
        return Err(ParseError::MissingField("value_wei"));
    }

    let digits = match trimmed.split_once('.') {
        Some((int, frac)) if !frac.is_empty() && frac.bytes().all(|b| b == b'0') => int,
        Some(_) => return Err(invalid()),
        None => trimmed,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    // Only digits remain, so a failure here means more than 256 bits.
    let wei = U256::from_str_radix(digits, 10).map_err(|_| out_of_range())?;
    if wei.bit_len() > MAX_DECIMAL_BITS {
        return Err(out_of_range());
    }
    let mantissa = wei.to::<u128>() as i128;
    Decimal::try_from_i128_with_scale(mantissa, WEI_DECIMALS)
        .map(|amount| amount.normalize())
        .map_err(|_| out_of_range())
}

/// A transaction with absolute time, before the run-wide origin is known.
#[derive(Debug)]
struct ParsedTransaction {
    row: usize,
    tx_hash: String,
    from_address: String,
    to_address: String,
    instant: i64,
    amount: Decimal,
}

fn parse_row(tx: RawTransaction) -> Result<ParsedTransaction, (usize, ParseError)> {
    let row = tx.row;
    if tx.from_address.is_empty() {
        return Err((row, ParseError::MissingField("from_address")));
    }
    if tx.to_address.is_empty() {
        return Err((row, ParseError::MissingField("to_address")));
    }
    let instant = parse_instant(&tx.timestamp).map_err(|e| (row, e))?;
    let amount = wei_to_unit(&tx.value).map_err(|e| (row, e))?;
    Ok(ParsedTransaction {
        row,
        tx_hash: tx.tx_hash,
        from_address: tx.from_address,
        to_address: tx.to_address,
        instant,
        amount,
    })
}

/// Row counts from one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub input: usize,
    pub kept: usize,
    pub dropped_by_kind: BTreeMap<ParseErrorKind, usize>,
    /// Earliest surviving instant, in Unix seconds. Relative timestamps count from here.
    pub origin: Option<i64>,
    /// Surviving rows whose tx_hash was already seen. They are kept as distinct edges.
    pub duplicate_tx_hashes: usize,
}

impl NormalizeStats {
    pub fn dropped(&self) -> usize {
        self.dropped_by_kind.values().sum()
    }
}

///
/// normalize
///
/// Parses every row (in parallel), drops and counts the malformed ones, rebases timestamps on
/// the earliest surviving instant and sorts by (timestamp, original row). The returned order
/// is the canonical chronological order for the rest of the run.
///
pub fn normalize(transactions: Vec<RawTransaction>) -> (Vec<NormalizedTransaction>, NormalizeStats) {
    let mut stats = NormalizeStats {
        input: transactions.len(),
        ..Default::default()
    };

    let results: Vec<Result<ParsedTransaction, (usize, ParseError)>> =
        transactions.into_par_iter().map(parse_row).collect();

    let mut parsed = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(tx) => parsed.push(tx),
            Err((row, error)) => {
                let dropped = stats.dropped();
                if dropped < LOGGED_PARSE_FAILURES {
                    warn!("Dropping row {}: {}", row, error);
                } else {
                    debug!("Dropping row {}: {}", row, error);
                }
                *stats.dropped_by_kind.entry(error.kind()).or_insert(0) += 1;
            }
        }
    }

    let origin = parsed.iter().map(|tx| tx.instant).min();
    stats.origin = origin;
    let origin = origin.unwrap_or_default();

    let mut normalized: Vec<NormalizedTransaction> = parsed
        .into_iter()
        .map(|tx| NormalizedTransaction {
            row: tx.row,
            tx_hash: tx.tx_hash,
            from_address: tx.from_address,
            to_address: tx.to_address,
            timestamp: tx.instant - origin,
            amount: tx.amount,
        })
        .collect();
    // Rows are unique, so the key is a total order and an unstable sort is deterministic.
    normalized.par_sort_unstable_by_key(|tx| (tx.timestamp, tx.row));

    let mut seen: HashSet<&str> = HashSet::with_capacity(normalized.len());
    stats.duplicate_tx_hashes = normalized
        .iter()
        .filter(|tx| !tx.tx_hash.is_empty() && !seen.insert(tx.tx_hash.as_str()))
        .count();
    stats.kept = normalized.len();

    info!(
        "Normalized {} of {} transactions ({} dropped by parse failures)",
        stats.kept,
        stats.input,
        stats.dropped()
    );
    if stats.duplicate_tx_hashes > 0 {
        warn!(
            "{} transactions repeat an earlier tx_hash; keeping them as distinct edges",
            stats.duplicate_tx_hashes
        );
    }

    (normalized, stats)
}
