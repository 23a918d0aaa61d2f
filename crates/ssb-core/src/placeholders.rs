//! Commands that are announced in `/help` but not built yet.
//!
//! Replacing an entry with a real handler only means adding a match arm in
//! the router ahead of the table lookup.

const PLACEHOLDERS: &[(&str, &str)] = &[
    ("stats", "📊 Stats coming soon!"),
    ("level", "🏆 Level system coming soon!"),
    ("roast", "🔥 Roasting system coming soon!"),
    ("tips", "🎯 Tips coming soon!"),
    ("achievements", "🏅 Achievements coming soon!"),
];

/// Fixed reply for a placeholder command, if `name` is one.
pub fn placeholder_reply(name: &str) -> Option<&'static str> {
    PLACEHOLDERS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, reply)| *reply)
}

#[cfg(test)]
fn placeholder_names() -> impl Iterator<Item = &'static str> {
    PLACEHOLDERS.iter().map(|(n, _)| *n)
}
