// ── Sandbox: Input Normalizer ──────────────────────────────────────────────
// Validates and sanitizes submitted code and stdin before anything reaches
// Docker. Size checks are byte-based; the dangerous-pattern blacklist is a
// single configurable list (no per-endpoint variation); line endings are
// normalized to LF; Java class names are rewritten to match the expected
// filename. Binary stdin passes through byte-for-byte apart from the line
// ending rule.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::LanguageConfig;
use regex::Regex;
use std::sync::LazyLock;

/// High-risk substrings rejected outright, matched case-insensitively.
/// Coarse by design: real isolation comes from the container profile, this
/// only refuses the obvious.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "os.system(\"rm -rf",
    "os.system('rm -rf",
    "; rm -rf /",
    "| sh -c \"rm",
    "rm -rf /",
    "mkfs",
    ":(){ :|:& };:",
    "> /dev/sda",
    "dd if=/dev/zero of=/dev/",
    "chmod -r 777 /",
];

static JAVA_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"public\s+class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct InputNormalizer {
    max_code_bytes: usize,
    max_stdin_bytes: usize,
    blacklist: Vec<String>,
}

impl InputNormalizer {
    pub fn new(max_code_bytes: usize, max_stdin_bytes: usize) -> Self {
        InputNormalizer {
            max_code_bytes,
            max_stdin_bytes,
            blacklist: DEFAULT_BLACKLIST.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_blacklist(mut self, patterns: Vec<String>) -> Self {
        self.blacklist = patterns;
        self
    }

    /// Validate and normalize source code for a language.
    pub fn normalize_code(&self, code: &str, language: &LanguageConfig) -> EngineResult<String> {
        if code.trim().is_empty() {
            return Err(EngineError::validation("empty_code", "code must not be empty"));
        }
        if code.len() > self.max_code_bytes {
            return Err(EngineError::validation(
                "code_too_large",
                format!("code exceeds {} bytes", self.max_code_bytes),
            ));
        }

        let lowered = code.to_lowercase();
        if let Some(pattern) = self.blacklist.iter().find(|p| lowered.contains(p.to_lowercase().as_str())) {
            log::warn!("[normalize] rejected submission matching blacklisted pattern {pattern:?}");
            return Err(EngineError::validation(
                "dangerous_code",
                "code contains potentially dangerous patterns",
            ));
        }

        let mut normalized = normalize_line_endings(code);

        // The container writes Java source as Main.java; the public class
        // must match or javac refuses it.
        if let Some(class_name) = &language.class_name {
            normalized = JAVA_CLASS_RE
                .replace(&normalized, format!("public class {class_name}").as_str())
                .into_owned();
        }

        Ok(normalized)
    }

    /// Validate and normalize stdin. Text and binary both pass; only the
    /// line-ending rule touches the bytes, and a trailing LF is appended to
    /// non-empty input so `read()`-style consumers terminate.
    pub fn normalize_stdin(&self, stdin: &[u8]) -> EngineResult<Vec<u8>> {
        if stdin.len() > self.max_stdin_bytes {
            return Err(EngineError::validation(
                "stdin_too_large",
                format!("stdin exceeds {} bytes", self.max_stdin_bytes),
            ));
        }

        let mut out = Vec::with_capacity(stdin.len() + 1);
        let mut i = 0;
        while i < stdin.len() {
            match stdin[i] {
                b'\r' if stdin.get(i + 1) == Some(&b'\n') => {
                    out.push(b'\n');
                    i += 2;
                }
                b'\r' => {
                    out.push(b'\n');
                    i += 1;
                }
                byte => {
                    out.push(byte);
                    i += 1;
                }
            }
        }
        if !out.is_empty() && out.last() != Some(&b'\n') {
            out.push(b'\n');
        }
        Ok(out)
    }
}

/// CRLF → LF, lone CR → LF.
fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::languages::LanguageCatalog;

    fn normalizer() -> InputNormalizer {
        InputNormalizer::new(1024, 256)
    }

    fn python() -> LanguageConfig {
        LanguageCatalog::new().get("python").unwrap().clone()
    }

    fn java() -> LanguageConfig {
        LanguageCatalog::new().get("java").unwrap().clone()
    }

    #[test]
    fn rejects_oversized_code() {
        let err = normalizer().normalize_code(&"a".repeat(2048), &python()).unwrap_err();
        assert_eq!(err.code(), "code_too_large");
    }

    #[test]
    fn rejects_dangerous_patterns_case_insensitively() {
        let n = normalizer();
        let err = n.normalize_code("import os\nos.system(\"rm -rf /\")", &python()).unwrap_err();
        assert_eq!(err.code(), "dangerous_code");
        assert!(err.to_string().contains("dangerous patterns"));

        let err = n.normalize_code("x = 1; RM -RF / #", &python()).unwrap_err();
        assert_eq!(err.code(), "dangerous_code");
    }

    #[test]
    fn normalizes_line_endings() {
        let out = normalizer().normalize_code("a = 1\r\nb = 2\rc = 3\n", &python()).unwrap();
        assert_eq!(out, "a = 1\nb = 2\nc = 3\n");
    }

    #[test]
    fn rewrites_java_public_class() {
        let code = "public class HelloWorld {\n  public static void main(String[] a) {}\n}";
        let out = normalizer().normalize_code(code, &java()).unwrap();
        assert!(out.starts_with("public class Main {"));
        assert!(!out.contains("HelloWorld"));
    }

    #[test]
    fn java_rewrite_leaves_other_languages_alone() {
        let code = "print('public class HelloWorld')";
        let out = normalizer().normalize_code(code, &python()).unwrap();
        assert!(out.contains("HelloWorld"));
    }

    #[test]
    fn stdin_crlf_and_trailing_lf() {
        let n = normalizer();
        assert_eq!(n.normalize_stdin(b"Alice\r\nBob").unwrap(), b"Alice\nBob\n");
        assert_eq!(n.normalize_stdin(b"Alice\rBob\r").unwrap(), b"Alice\nBob\n");
        assert_eq!(n.normalize_stdin(b"").unwrap(), b"");
    }

    #[test]
    fn stdin_preserves_binary_bytes() {
        let n = normalizer();
        let input = [0x00u8, 0xFF, 0x7F, b'x', 0x01];
        let out = n.normalize_stdin(&input).unwrap();
        assert_eq!(&out[..5], &input);
        assert_eq!(out.last(), Some(&b'\n'));
    }

    #[test]
    fn stdin_size_cap() {
        let err = normalizer().normalize_stdin(&vec![b'x'; 512]).unwrap_err();
        assert_eq!(err.code(), "stdin_too_large");
    }

    #[test]
    fn custom_blacklist_replaces_default() {
        let n = normalizer().with_blacklist(vec!["forbidden_token".into()]);
        assert!(n.normalize_code("rm -rf /", &python()).is_ok());
        assert!(n.normalize_code("forbidden_token", &python()).is_err());
    }
}
