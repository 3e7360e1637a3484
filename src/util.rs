//! Shared string helpers.

/// Maximum task title length before an ellipsis is appended.
pub const TITLE_MAX_CHARS: usize = 60;

/// Convert text to a filesystem-safe slug, limited to `max_len` characters.
pub fn slugify(text: &str, max_len: usize) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Truncate on a character boundary, appending `...` when anything was cut.
pub fn truncate_title(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > TITLE_MAX_CHARS {
        let head: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_normal() {
        assert_eq!(slugify("Workflow", 40), "workflow");
        assert_eq!(slugify("My Job/Type!", 40), "my-job-type");
    }

    #[test]
    fn test_slugify_truncation_no_trailing_dash() {
        assert_eq!(slugify("abc def ghi", 4), "abc");
    }

    #[test]
    fn test_slugify_non_ascii_and_empty() {
        assert_eq!(slugify("ação", 40), "a-o");
        assert_eq!(slugify("!!!", 40), "");
    }

    #[test]
    fn test_truncate_title_short() {
        assert_eq!(truncate_title("short title"), "short title");
    }

    #[test]
    fn test_truncate_title_long() {
        let long = "a".repeat(61);
        let title = truncate_title(&long);
        assert_eq!(title, format!("{}...", "a".repeat(60)));
    }

    #[test]
    fn test_truncate_title_multibyte() {
        let long = "ç".repeat(70);
        let title = truncate_title(&long);
        assert_eq!(title.chars().count(), 63);
    }
}
