//! Query normalization applied after a query passes the screen

/// Normalize an allowed query before it is placed in the prompt.
///
/// Removes NUL bytes and `<...>` markup tags, collapses whitespace runs to a
/// single space and trims the ends. A lone `<` or `<>` is kept as text.
pub fn sanitize_query(query: &str) -> String {
    let without_nul: String = query.chars().filter(|&c| c != '\0').collect();
    let without_tags = strip_tags(&without_nul);
    without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('>') {
            // `<` followed by at least one character before `>`
            Some(close) if close > 0 => rest = &after[close + 1..],
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
