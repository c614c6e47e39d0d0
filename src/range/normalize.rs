use std::borrow::Cow;

/// Dash spellings found in report descriptions. The first is an en dash that
/// went through a cp437 round trip on its way into the database.
const BROKEN_DASHES: &[&str] = &["ÔÇô", "\u{2013}", "\u{2014}"];

/// Replace every known dash variant with a plain `-`.
///
/// Borrows the input when there is nothing to replace.
pub fn normalize(text: &str) -> Cow<'_, str> {
    if !BROKEN_DASHES.iter().any(|d| text.contains(d)) {
        return Cow::Borrowed(text);
    }
    let mut out = text.to_string();
    for dash in BROKEN_DASHES {
        out = out.replace(dash, "-");
    }
    Cow::Owned(out)
}
