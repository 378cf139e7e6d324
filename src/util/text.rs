use std::borrow::Cow;

/// Strips ASCII control characters from attacker-controlled text.
///
/// Feed titles and descriptions come straight off the wire; terminal escape
/// sequences or NUL bytes embedded there would otherwise persist into the
/// item store and any log line that prints them. Tabs and newlines are
/// collapsed to single spaces, everything else below 0x20 (and DEL) is
/// dropped.
///
/// Returns `Cow::Borrowed` when the input is already clean (no allocation).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(|c| c.is_control()) {
        return Cow::Borrowed(s);
    }

    let cleaned: String = s
        .chars()
        .filter_map(|c| {
            if c == '\n' || c == '\t' || c == '\r' {
                Some(' ')
            } else if c.is_control() {
                None
            } else {
                Some(c)
            }
        })
        .collect();

    Cow::Owned(cleaned)
}
