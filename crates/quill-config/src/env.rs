// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! `${NAME}` environment-variable expansion.
//!
//! Used for API keys in the model config and for `env` values in
//! `mcp.json`.  Unset variables expand to the empty string so that a
//! missing key fails where it is *used* (with a useful provider error)
//! rather than at config-load time.

/// Expand every `${NAME}` occurrence in `s` from the process environment.
///
/// The expansion is a single left-to-right pass: values substituted in are
/// never re-scanned, so `expand(expand(s)) == expand(s)` for any input
/// whose environment values do not themselves contain `${…}` references.
pub fn expand_env_vars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                if let Ok(val) = std::env::var(name) {
                    out.push_str(&val);
                }
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                // Unterminated reference: keep the literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_unchanged() {
        assert_eq!(expand_env_vars("no refs here"), "no refs here");
    }

    #[test]
    fn known_variable_expanded() {
        std::env::set_var("QUILL_TEST_ENV_A", "value-a");
        assert_eq!(expand_env_vars("key=${QUILL_TEST_ENV_A}"), "key=value-a");
    }

    #[test]
    fn unknown_variable_expands_to_empty() {
        assert_eq!(expand_env_vars("x${QUILL_TEST_ENV_MISSING_XYZ}y"), "xy");
    }

    #[test]
    fn multiple_references_in_one_string() {
        std::env::set_var("QUILL_TEST_ENV_B", "b");
        std::env::set_var("QUILL_TEST_ENV_C", "c");
        assert_eq!(
            expand_env_vars("${QUILL_TEST_ENV_B}-${QUILL_TEST_ENV_C}"),
            "b-c"
        );
    }

    #[test]
    fn unterminated_reference_kept_literal() {
        assert_eq!(expand_env_vars("x${OOPS"), "x${OOPS");
    }

    #[test]
    fn expansion_is_idempotent() {
        std::env::set_var("QUILL_TEST_ENV_D", "plain-token-123");
        let inputs = [
            "no refs",
            "${QUILL_TEST_ENV_D}",
            "pre ${QUILL_TEST_ENV_D} post",
            "${QUILL_TEST_ENV_MISSING_XYZ}",
            "${A}${QUILL_TEST_ENV_D}${B}",
        ];
        for s in inputs {
            let once = expand_env_vars(s);
            let twice = expand_env_vars(&once);
            assert_eq!(once, twice, "expand must be idempotent for {s:?}");
        }
    }
}
