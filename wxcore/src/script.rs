//! The login and push hosts answer with tiny JavaScript snippets such as
//! `window.QRLogin.code = 200; window.QRLogin.uuid = "oZZsO0Qv8Q==";` or
//! `window.synccheck={retcode:"0",selector:"2"}`. These helpers pull single
//! assignments out of them without evaluating anything.

/// Returns the value assigned to `key`, with surrounding quotes removed.
///
/// Accepts both `key = value` and `key: value` forms. Unquoted values end at
/// the first `;`, `,`, `}` or whitespace.
pub fn assigned_value<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(found) = body[search_from..].find(key) {
        let key_start = search_from + found;
        let after_key = key_start + key.len();
        search_from = after_key;

        // Reject matches that are a suffix of a longer identifier.
        if let Some(prev) = body[..key_start].chars().next_back()
            && (prev.is_ascii_alphanumeric() || prev == '_')
        {
            continue;
        }

        let rest = body[after_key..].trim_start();
        let Some(rest) = rest
            .strip_prefix('=')
            .or_else(|| rest.strip_prefix(':'))
            .map(str::trim_start)
        else {
            continue;
        };

        return Some(match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let inner = &rest[1..];
                match inner.find(quote) {
                    Some(end) => &inner[..end],
                    None => inner,
                }
            }
            _ => {
                let end = rest
                    .find(|c: char| c == ';' || c == ',' || c == '}' || c.is_whitespace())
                    .unwrap_or(rest.len());
                &rest[..end]
            }
        });
    }
    None
}
