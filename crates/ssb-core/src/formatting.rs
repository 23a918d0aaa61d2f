//! Formatting helpers for Telegram HTML replies.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One `• item` line per entry, in order.
pub fn bullet_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| format!("• {}", escape_html(s.as_ref())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `story` / `stories` depending on `n`.
pub fn stories_word(n: usize) -> &'static str {
    if n == 1 {
        "story"
    } else {
        "stories"
    }
}
