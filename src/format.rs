/// Maximum duration accepted from an edit form: 23:59:59.
pub const MAX_EDIT_DURATION_MS: i64 = 23 * 3_600_000 + 59 * 60_000 + 59_000;

/// Format a millisecond duration as "HH:MM:SS".
///
/// Negative or nonsensical input renders as "00:00:00"; hours grow past
/// two digits without truncation.
pub fn format_hms(ms: i64) -> String {
    if ms < 0 {
        return "00:00:00".to_string();
    }

    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Parse an "HH:MM:SS" edit-form duration into milliseconds.
///
/// Minutes and seconds must be below 60 and the whole value at most
/// [`MAX_EDIT_DURATION_MS`]. Returns `None` for anything else.
pub fn parse_hms(input: &str) -> Option<i64> {
    let mut parts = input.split(':');
    let hours: i64 = parse_field(parts.next()?, 1, 2)?;
    let minutes: i64 = parse_field(parts.next()?, 2, 2)?;
    let secs: i64 = parse_field(parts.next()?, 2, 2)?;
    if parts.next().is_some() {
        return None;
    }

    if minutes >= 60 || secs >= 60 {
        return None;
    }

    let ms = (hours * 3600 + minutes * 60 + secs) * 1000;
    if ms > MAX_EDIT_DURATION_MS {
        return None;
    }
    Some(ms)
}

fn parse_field(field: &str, min_len: usize, max_len: usize) -> Option<i64> {
    if field.len() < min_len || field.len() > max_len || !field.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    field.parse().ok()
}

/// Symbol for a currency code, falling back to the code itself.
pub fn currency_symbol(code: &str) -> &str {
    match code {
        "USD" => "$",
        "EUR" => "\u{20ac}",
        "GBP" => "\u{a3}",
        "JPY" => "\u{a5}",
        "AUD" => "A$",
        "CAD" => "C$",
        other => other,
    }
}

/// Render a monetary amount through a display template.
///
/// The template may reference `{symbol}`, `{code}`, and `{amount}`;
/// the amount is always rendered with two decimal places.
pub fn format_currency(amount: f64, code: &str, template: &str) -> String {
    template
        .replace("{symbol}", currency_symbol(code))
        .replace("{code}", code)
        .replace("{amount}", &format!("{:.2}", amount))
}
