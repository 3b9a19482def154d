use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current instant in UTC.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// RFC3339 rendering for wire timestamps (`meta.lastUpdated`).
pub fn format_rfc3339(datetime: OffsetDateTime) -> String {
    datetime
        .format(&Rfc3339)
        .unwrap_or_else(|_| datetime.to_string())
}
