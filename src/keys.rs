//! Expansion of a submitted key range into the ordered list of keys.
//!
//! A key is `<prefix><digits>`. The digit run of the start key fixes the
//! zero-padding width, so `21UCSE4001..21UCSE4003` expands to
//! `21UCSE4001, 21UCSE4002, 21UCSE4003`.

use crate::error::{Result, RollcallError};
use crate::state_machine::JobConfig;

/// Split a key into its prefix and trailing ASCII digit run.
fn split_key(key: &str) -> Option<(&str, &str)> {
    let digits_at = key
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some(key.split_at(digits_at))
}

/// A validated range: shared prefix, numeric bounds and padding width.
struct Range<'a> {
    prefix: &'a str,
    start: u64,
    end: u64,
    width: usize,
}

fn parse_range(config: &JobConfig) -> Result<Range<'_>> {
    let (start_prefix, start_digits) = split_key(config.start_key.trim()).ok_or_else(|| {
        RollcallError::InvalidRange(format!("{} has no numeric suffix", config.start_key))
    })?;
    let (end_prefix, end_digits) = split_key(config.end_key.trim()).ok_or_else(|| {
        RollcallError::InvalidRange(format!("{} has no numeric suffix", config.end_key))
    })?;

    if start_prefix != end_prefix {
        return Err(RollcallError::InvalidRange(format!(
            "prefixes differ: {start_prefix:?} vs {end_prefix:?}"
        )));
    }

    let parse = |digits: &str| {
        digits
            .parse::<u64>()
            .map_err(|e| RollcallError::InvalidRange(format!("{digits}: {e}")))
    };
    let start = parse(start_digits)?;
    let end = parse(end_digits)?;
    if end < start {
        return Err(RollcallError::InvalidRange(format!(
            "{} comes before {}",
            config.end_key, config.start_key
        )));
    }

    Ok(Range {
        prefix: start_prefix,
        start,
        end,
        width: start_digits.len(),
    })
}

/// Expand `config.start_key ..= config.end_key` into individual keys.
///
/// Callers bound the range with [`count`] first; this allocates every key.
pub fn expand(config: &JobConfig) -> Result<Vec<String>> {
    let Range {
        prefix,
        start,
        end,
        width,
    } = parse_range(config)?;
    Ok((start..=end).map(|n| format!("{prefix}{n:0width$}")).collect())
}

/// Number of keys a range covers, without materialising them.
pub fn count(config: &JobConfig) -> Result<usize> {
    let range = parse_range(config)?;
    (range.end - range.start)
        .checked_add(1)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            RollcallError::InvalidRange(format!(
                "{}..{} covers too many keys",
                config.start_key, config.end_key
            ))
        })
}

/// [`count`], rejecting ranges larger than `limit`.
pub fn count_within(config: &JobConfig, limit: usize) -> Result<usize> {
    let total = count(config)?;
    if total > limit {
        return Err(RollcallError::InvalidRange(format!(
            "{total} keys exceeds the limit of {limit} per job"
        )));
    }
    Ok(total)
}
