use std::collections::BTreeSet;

use crate::error::ScanError;

pub const LOWEST_PORT: u16 = 1;

/// Highest port accepted by validation.
///
/// NOTE: this is 65335, not the TCP maximum of 65535. Ports 65336..=65535 are
/// dropped unless a caller raises the limit (see `ScanConfig::highest_port`).
pub const HIGHEST_PORT: u16 = 65335;

/// Ports that always get a chunk of their own, ahead of everything else.
pub const FIRST_CLASS_PORTS: [u16; 2] = [80, 443];

/// Well-known ports scanned early, mixed in with the main pool.
pub const SECOND_CLASS_PORTS: [u16; 18] = [
    139, 53, 23, 111, 995, 22, 993, 143, 135, 110, 445, 587, 25, 199, 113, 21, 256, 554,
];

/// Port list used when the user doesn't ask for specific ports.
pub const DEFAULT_PORT_LIST: &str = "1-65535";

#[inline]
pub fn is_valid(port: i64, highest: u16) -> bool {
    (LOWEST_PORT as i64..=highest as i64).contains(&port)
}

/// Parses a comma separated list of ports and inclusive `lo-hi` ranges,
/// e.g. `1,2-8,9,10-20`.
///
/// The values are de-duplicated but not range checked, that's left to the
/// chunker which silently drops anything outside the valid port range.
pub fn parse_list(raw: &str) -> Result<Vec<i64>, ScanError> {
    let mut ports = BTreeSet::new();

    for section in raw.split(',') {
        let section = section.trim();
        let syntax_err = || ScanError::InvalidPortSyntax(section.into());

        match section.split_once('-') {
            None => {
                let port = section.parse::<i64>().map_err(|_| syntax_err())?;
                ports.insert(port);
            }
            Some((lo, hi)) => {
                let lo = lo.trim().parse::<i64>().map_err(|_| syntax_err())?;
                let hi = hi.trim().parse::<i64>().map_err(|_| syntax_err())?;
                if lo > hi {
                    return Err(ScanError::InvalidPortRange(section.into()));
                }
                ports.extend(lo..=hi);
            }
        }
    }

    Ok(ports.into_iter().collect())
}
