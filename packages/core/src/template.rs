//! Message template rendering and text helpers.

use crate::Contact;

/// Upper bound on persisted error and status text, in characters.
pub const MAX_ERROR_LEN: usize = 500;

/// Substitute `{name}` and `{phone}` for one contact.
///
/// A contact without a name renders `{name}` as the empty string.
pub fn render(template: &str, contact: &Contact) -> String {
    template
        .replace("{name}", contact.display_name().unwrap_or_default())
        .replace("{phone}", &contact.phone)
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
