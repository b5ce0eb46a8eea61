//! Timestamp rendering.

use chrono::{DateTime, SecondsFormat, Utc};

/// RFC 3339 with whole seconds and a `Z` suffix, e.g. `1970-01-01T00:00:00Z`.
#[must_use]
pub fn rfc3339(epoch: DateTime<Utc>) -> String {
    epoch.to_rfc3339_opts(SecondsFormat::Secs, true)
}
