/// Redaction helpers for log output
///
/// Reminder emails carry the user's mailbox addresses and SMTP secret;
/// logs only ever see the masked forms produced here.

/// Mask placed wherever a secret would appear
pub const SECRET_MASK: &str = "********";

/// Redact an email address, keeping the first character and the domain.
/// Example: "user@example.com" -> "u***@example.com"
pub fn email(address: &str) -> String {
    let Some(at_pos) = address.find('@') else {
        // Not an address; nothing we know how to keep
        return "***".to_string();
    };

    let (local, domain) = address.split_at(at_pos);
    let mut chars = local.chars();
    match (chars.next(), chars.next()) {
        (None, _) => address.to_string(),
        (Some(_), None) => format!("*{}", domain),
        (Some(first), Some(_)) => format!("{}***{}", first, domain),
    }
}

/// Redact a secret entirely; only emptiness is revealed
pub fn secret(value: &str) -> &'static str {
    if value.is_empty() {
        "<empty>"
    } else {
        SECRET_MASK
    }
}
