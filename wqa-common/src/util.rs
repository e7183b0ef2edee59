//! Shared utilities for the harness.

/// Assignment prefixes whose values must never reach the logs.
const SECRET_ASSIGNMENTS: &[&str] = &[
    "ARM_CLIENT_SECRET=",
    "ARM_CLIENT_ID=",
    "client_secret=",
    "get_weka_io_token=",
    "code=",
    "--client-secret ",
    "--client-secret=",
    "--get-weka-io-token ",
    "--get-weka-io-token=",
];

fn value_end(s: &str) -> usize {
    let mut in_quote = None;
    for (idx, c) in s.char_indices() {
        match in_quote {
            Some(q) if c == q => in_quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => in_quote = Some(c),
            None if c.is_whitespace() || c == '&' => return idx,
            None => {}
        }
    }
    s.len()
}

/// Mask secret values in a command line or URL before logging.
///
/// Known assignment prefixes keep their key and lose their value; any of the
/// explicitly supplied `secrets` is masked wherever it appears.
pub fn mask_secrets(text: &str, secrets: &[&str]) -> String {
    let mut result = text.to_string();
    for pattern in SECRET_ASSIGNMENTS {
        let mut search_from = 0;
        while let Some(rel) = result[search_from..].find(pattern) {
            let value_start = search_from + rel + pattern.len();
            let end = value_start + value_end(&result[value_start..]);
            result.replace_range(value_start..end, "***");
            search_from = value_start + 3;
        }
    }
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        result = result.replace(secret, "***");
    }
    result
}

/// Keep only characters Azure accepts in resource names, lowercased.
pub fn sanitize_resource_component(raw: &str, max_len: usize) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(max_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_assignments_and_keeps_keys() {
        let masked = mask_secrets(
            "ARM_CLIENT_SECRET=hunter2 terraform apply -var get_weka_io_token='abc def'",
            &[],
        );
        assert_eq!(
            masked,
            "ARM_CLIENT_SECRET=*** terraform apply -var get_weka_io_token=***"
        );
    }

    #[test]
    fn masks_query_code_until_separator() {
        let masked = mask_secrets("https://x/api/status?code=s3cr3t&other=1", &[]);
        assert_eq!(masked, "https://x/api/status?code=***&other=1");
    }

    #[test]
    fn masks_explicit_secrets_anywhere() {
        let masked = mask_secrets("token is tok-123 really", &["tok-123", ""]);
        assert_eq!(masked, "token is *** really");
    }

    #[test]
    fn sanitize_drops_illegal_characters() {
        assert_eq!(sanitize_resource_component("GW_1-Master!", 8), "gw1maste");
        assert_eq!(sanitize_resource_component("", 8), "");
    }
}
