//! Duration strings such as `30m`, `1.5h` or `3d`.

use crate::error::Error;
use crate::Result;
use std::time::Duration;

/// Parse `<number><unit>` where unit is `m`, `h` or `d`.
///
/// The number may be fractional; surrounding whitespace is ignored.
pub fn parse_duration(spec: &str) -> Result<Duration> {
    let invalid = || Error::InvalidDuration(spec.to_string());
    let trimmed = spec.trim();

    let mut chars = trimmed.chars();
    let unit = chars.next_back().ok_or_else(invalid)?;
    let number = chars.as_str();

    let unit_secs = match unit {
        'm' => 60.0,
        'h' => 3600.0,
        'd' => 86400.0,
        _ => return Err(invalid()),
    };

    let well_formed = number.chars().any(|c| c.is_ascii_digit())
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.matches('.').count() <= 1;
    if !well_formed {
        return Err(invalid());
    }

    let value: f64 = number.parse().map_err(|_| invalid())?;
    Duration::try_from_secs_f64(value * unit_secs).map_err(|_| invalid())
}
