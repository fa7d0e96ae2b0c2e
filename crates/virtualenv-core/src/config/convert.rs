/// `1/yes/true/on` and `0/no/false/off`, case-insensitive.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Split every line on whitespace, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.lines()
        .flat_map(str::split_whitespace)
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn lists_flatten_lines_and_words() {
        assert_eq!(split_list("pip\n\n  wheel setuptools\n"), vec!["pip", "wheel", "setuptools"]);
        assert!(split_list("").is_empty());
    }
}
