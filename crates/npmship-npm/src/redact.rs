/// Redact credentials from package-manager output before it reaches a
/// reporter.
pub fn redact_sensitive(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for line in s.lines() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&redact_line(line));
    }
    if s.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Last `n` lines of `s`, redacted.
pub fn tail_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let tail = if lines.len() <= n {
        s.trim_end().to_string()
    } else {
        lines[lines.len() - n..].join("\n")
    };
    redact_sensitive(&tail)
}

const SECRET_KEYS: [&str; 5] = ["_authtoken", "_auth", "_password", "npm_token", "legacy_token"];

fn redact_line(line: &str) -> String {
    let mut out = line.to_string();
    let lower = out.to_ascii_lowercase();

    // Authorization: Bearer <token> / Basic <credentials>
    if let Some(pos) = lower.find("authorization:") {
        let after = &lower[pos..];
        for scheme in ["bearer ", "basic "] {
            if let Some(scheme_pos) = after.find(scheme) {
                let redact_start = pos + scheme_pos + scheme.len();
                out = format!("{}[REDACTED]", &out[..redact_start]);
                return out;
            }
        }
    }

    // <key> = <value>, where the key ends with a secret name. Placeholders
    // such as `${NPM_TOKEN}` carry no secret and are kept.
    for key in SECRET_KEYS {
        let Some(pos) = lower.find(key) else {
            continue;
        };
        let after_key = &out[pos + key.len()..];
        let trimmed = after_key.trim_start();
        if !trimmed.starts_with('=') {
            continue;
        }
        let value = trimmed.trim_start_matches('=').trim_start();
        if value.is_empty() || value.starts_with("${") {
            continue;
        }
        let eq_offset = pos + key.len() + (after_key.len() - trimmed.len());
        out = format!("{}=[REDACTED]", out[..eq_offset].trim_end());
        break;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn redact_authorization_headers() {
        assert_eq!(
            redact_sensitive("Authorization: Bearer npm_abc123"),
            "Authorization: Bearer [REDACTED]"
        );
        assert_eq!(
            redact_sensitive("authorization: Basic dXNlcjpwYXNz"),
            "authorization: Basic [REDACTED]"
        );
    }

    #[test]
    fn redact_npmrc_token_lines() {
        assert_eq!(
            redact_sensitive("//registry.npmjs.org/:_authToken=npm_secret"),
            "//registry.npmjs.org/:_authToken=[REDACTED]"
        );
        assert_eq!(redact_sensitive("_auth = dXNlcjpwYXNz"), "_auth=[REDACTED]");
        assert_eq!(redact_sensitive("NPM_TOKEN=npm_secret"), "NPM_TOKEN=[REDACTED]");
    }

    #[test]
    fn placeholders_are_kept() {
        let line = "//registry.npmjs.org/:_authToken = ${NPM_TOKEN}";
        assert_eq!(redact_sensitive(line), line);
    }

    #[test]
    fn non_sensitive_content_is_untouched() {
        let input = "npm notice Publishing to https://registry.npmjs.org/\n+ pkg@1.0.0\n";
        assert_eq!(redact_sensitive(input), input);
        assert_eq!(redact_sensitive(""), "");
    }

    #[test]
    fn tail_lines_keeps_last_lines_redacted() {
        let input = "one\ntwo\nNPM_TOKEN=secret\nfour";
        let tail = tail_lines(input, 2);
        assert_eq!(tail, "NPM_TOKEN=[REDACTED]\nfour");
        assert_eq!(tail_lines("a\nb\n", 10), "a\nb");
    }

    proptest! {
        #[test]
        fn redacted_tokens_never_leak(secret in "[a-zA-Z0-9]{8,32}") {
            let input = format!("//r.example/:_authToken={secret}\nAuthorization: Bearer {secret}");
            let out = redact_sensitive(&input);
            prop_assert!(!out.contains(&secret));
        }
    }
}
