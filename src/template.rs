//! Template Module
//!
//! Minimal `{{key}}` placeholder substitution for the HTML pages the server
//! renders. Keys are lowercase alphanumerics and dashes; an unknown key
//! renders as an empty string.

use std::collections::HashMap;

/// Render a template by substituting `{{key}}` placeholders from `vars`.
pub fn render(input: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        match after_open.find("}}") {
            Some(close) if is_placeholder_key(&after_open[..close]) => {
                let key = &after_open[..close];
                if let Some(value) = vars.get(key) {
                    out.push_str(value);
                }
                rest = &after_open[close + 2..];
            }
            _ => {
                // Not a placeholder; keep the braces literal
                out.push_str("{{");
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_substitutes_known_key() {
        let out = render("id is {{upload-id}}.", &vars(&[("upload-id", "abc123")]));
        assert_eq!(out, "id is abc123.");
    }

    #[test]
    fn test_unknown_key_renders_empty() {
        let out = render("[{{missing}}]", &vars(&[]));
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_multiple_occurrences() {
        let out = render("{{a}}-{{b}}-{{a}}", &vars(&[("a", "x"), ("b", "y")]));
        assert_eq!(out, "x-y-x");
    }

    #[test]
    fn test_invalid_keys_left_literal() {
        let out = render("{{NOT A KEY}} {{}}", &vars(&[]));
        assert_eq!(out, "{{NOT A KEY}} {{}}");
    }

    #[test]
    fn test_unclosed_braces_left_literal() {
        let out = render("tail {{open", &vars(&[]));
        assert_eq!(out, "tail {{open");
    }
}
