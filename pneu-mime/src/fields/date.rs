use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::headers::unfolded_str;

static MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parse an RFC 5322 date (including the obsolete two-digit-year and
/// named-zone forms) into UTC. Returns None when the value cannot be
/// understood.
pub fn parse_date(value: &[u8]) -> Option<DateTime<Utc>> {
    let text = strip_comments(&unfolded_str(value));
    let mut tokens = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .peekable();

    // Leading day-of-week is optional noise.
    if tokens
        .peek()
        .map_or(false, |t| t.chars().all(char::is_alphabetic) && t.len() <= 3)
    {
        tokens.next();
    }

    let day: u32 = tokens.next()?.parse().ok()?;
    let month = parse_month(tokens.next()?)?;
    let year = parse_year(tokens.next()?)?;
    let (hour, minute, second) = parse_time(tokens.next()?)?;
    let offset_minutes = tokens.next().map(parse_zone).unwrap_or(Some(0))?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc) - Duration::minutes(offset_minutes))
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0u32;
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => (),
        }
    }
    out
}

fn parse_month(token: &str) -> Option<u32> {
    let prefix = token.get(..3)?.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

fn parse_year(token: &str) -> Option<i32> {
    let raw: i32 = token.parse().ok()?;
    // Obsolete forms: two digits below 50 mean 20xx, other two- and
    // three-digit years mean 19xx.
    Some(match token.len() {
        2 if raw < 50 => raw + 2000,
        2 | 3 => raw + 1900,
        _ => raw,
    })
}

fn parse_time(token: &str) -> Option<(u32, u32, u32)> {
    let mut fields = token.split(':');
    let hour = fields.next()?.parse().ok()?;
    let minute = fields.next()?.parse().ok()?;
    let second = match fields.next() {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    Some((hour, minute, second))
}

/// Zone offset in minutes east of UTC.
fn parse_zone(token: &str) -> Option<i64> {
    let token = token.trim();
    if let Some(rest) = token.strip_prefix('+').or_else(|| token.strip_prefix('-')) {
        if rest.len() == 4 && rest.chars().all(|c| c.is_ascii_digit()) {
            let hours: i64 = rest[..2].parse().ok()?;
            let minutes: i64 = rest[2..].parse().ok()?;
            let total = hours * 60 + minutes;
            return Some(if token.starts_with('-') { -total } else { total });
        }
        return None;
    }
    Some(match token.to_ascii_uppercase().as_str() {
        "UT" | "GMT" | "UTC" | "Z" => 0,
        "EST" => -5 * 60,
        "EDT" => -4 * 60,
        "CST" => -6 * 60,
        "CDT" => -5 * 60,
        "MST" => -7 * 60,
        "MDT" => -6 * 60,
        "PST" => -8 * 60,
        "PDT" => -7 * 60,
        // Unknown military or garbage zones carry no offset information.
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_date;

    fn rfc3339(value: &[u8]) -> Option<String> {
        parse_date(value).map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }

    #[test]
    fn parses_standard_dates() {
        assert_eq!(
            rfc3339(b"Sat, 20 Jan 2024 10:00:00 +0000").unwrap(),
            "2024-01-20T10:00:00Z"
        );
        assert_eq!(
            rfc3339(b"20 Jan 2024 10:30:00 +0230").unwrap(),
            "2024-01-20T08:00:00Z"
        );
        assert_eq!(
            rfc3339(b"Thu, 13 Feb 1969 23:32:00 -0330").unwrap(),
            "1969-02-14T03:02:00Z"
        );
    }

    #[test]
    fn parses_obsolete_forms() {
        assert_eq!(
            rfc3339(b"21 Nov 97 09:55:06 GMT").unwrap(),
            "1997-11-21T09:55:06Z"
        );
        assert_eq!(
            rfc3339(b"Mon, 3 Jan 05 08:00 EST").unwrap(),
            "2005-01-03T13:00:00Z"
        );
        assert_eq!(
            rfc3339(b"(today) 21 Nov 1997 09:55:06 -0600").unwrap(),
            "1997-11-21T15:55:06Z"
        );
    }

    #[test]
    fn folded_value() {
        assert_eq!(
            rfc3339(b"Sat, 20 Jan 2024\r\n 10:00:00 +0000").unwrap(),
            "2024-01-20T10:00:00Z"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_date(b"not a date").is_none());
        assert!(parse_date(b"32 Jan 2024 10:00:00 +0000").is_none());
        assert!(parse_date(b"").is_none());
    }
}
