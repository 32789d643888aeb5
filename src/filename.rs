//! Log file naming and UTC day-bucket arithmetic.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Seconds in a day; rolls are also triggered on a UTC day-boundary crossing.
pub const ROLL_PERIOD_SECONDS: i64 = 86_400;

/// Hostnames longer than this are truncated when building a filename.
const MAX_HOSTNAME_LEN: usize = 63;

/// Builds `basename + "." + YYYYmmdd-HHMMSS + "." + hostname + "." + pid + ".log"`,
/// with the timestamp derived from `now` (UTC) and hostname truncated at 63
/// characters. This format is a stable, external contract (spec §6): do not
/// change field order or separators.
pub fn make_filename(basename: &Path, now_unix_secs: i64) -> PathBuf {
    let dt: DateTime<Utc> = DateTime::from_timestamp(now_unix_secs, 0).unwrap_or_else(Utc::now);
    let timestamp = dt.format("%Y%m%d-%H%M%S");

    let mut host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknownhost".to_string());
    if host.len() > MAX_HOSTNAME_LEN {
        host.truncate(MAX_HOSTNAME_LEN);
    }

    let pid = std::process::id();

    let mut name = basename.as_os_str().to_owned();
    name.push(format!(".{timestamp}.{host}.{pid}.log"));
    PathBuf::from(name)
}

/// Current wall-clock time as whole seconds since the Unix epoch.
pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Floors `now` down to the start of its UTC day, per `ROLL_PERIOD_SECONDS`.
pub fn period_start(now_unix_secs: i64) -> i64 {
    now_unix_secs.div_euclid(ROLL_PERIOD_SECONDS) * ROLL_PERIOD_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_start_floors_to_day() {
        assert_eq!(period_start(0), 0);
        assert_eq!(period_start(86_399), 0);
        assert_eq!(period_start(86_400), 86_400);
        assert_eq!(period_start(86_401), 86_400);
    }

    #[test]
    fn filename_contains_expected_fields() {
        let name = make_filename(Path::new("/tmp/test"), 1_700_000_000);
        let name = name.to_string_lossy();
        assert!(name.starts_with("/tmp/test."));
        assert!(name.ends_with(".log"));
        let pid = std::process::id().to_string();
        assert!(name.contains(&pid));
    }
}
