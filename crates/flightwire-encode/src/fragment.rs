//! Inline payload fragments.
//!
//! Scalars are inlined into their parent's JSON payload. Strings that could
//! collide with `$` markers are escaped by doubling the sigil; numeric edge
//! cases that plain JSON cannot represent get dedicated markers.

/// Escape a user string for embedding in a payload.
pub fn escape_string(s: &str) -> String {
    if s.starts_with('$') {
        format!("${s}")
    } else {
        s.to_string()
    }
}

/// Format epoch milliseconds compactly: integral values without the
/// fractional part, everything else as-is.
pub fn format_millis(ms: f64) -> String {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;
    if ms.is_finite() && ms.fract() == 0.0 && ms.abs() < MAX_SAFE_INTEGER {
        format!("{}", ms as i64)
    } else {
        format!("{ms}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_strings_are_escaped() {
        assert_eq!(escape_string("$100"), "$$100");
        assert_eq!(escape_string("$$already"), "$$$already");
        assert_eq!(escape_string("plain"), "plain");
    }

    #[test]
    fn millis_format() {
        assert_eq!(format_millis(1700000000000.0), "1700000000000");
        assert_eq!(format_millis(-86400000.0), "-86400000");
        assert_eq!(format_millis(1.5), "1.5");
    }
}
