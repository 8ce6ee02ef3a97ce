// ── Sandbox: Language Catalog ──────────────────────────────────────────────
// Immutable id → LanguageConfig map, built once at startup. Run/compile
// command templates use relative paths because every container gets
// `/tmp` as its working directory; `{src}` expands to the source filename
// and `{bin}` to the compiled artifact.

use crate::atoms::types::{LanguageConfig, LanguageKind};
use std::collections::HashMap;

pub struct LanguageCatalog {
    languages: HashMap<String, LanguageConfig>,
}

impl LanguageCatalog {
    /// Build the default catalog. Panics on an invalid entry — this runs
    /// once at startup and a bad catalog is a programming error.
    pub fn new() -> Self {
        let mut languages = HashMap::new();
        for config in default_languages() {
            assert!(
                config.id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
                "language id '{}' must be lowercase ASCII",
                config.id
            );
            assert!(
                config.extension.starts_with('.'),
                "extension for '{}' must start with '.'",
                config.id
            );
            if matches!(config.kind, LanguageKind::Compiled | LanguageKind::Transpiled) {
                assert!(
                    config.compile_command.is_some(),
                    "compiled language '{}' needs a compile command",
                    config.id
                );
            }
            languages.insert(config.id.clone(), config);
        }
        LanguageCatalog { languages }
    }

    pub fn is_supported(&self, id: &str) -> bool {
        self.languages.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&LanguageConfig> {
        self.languages.get(id)
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// All configs, ordered by id for stable API listings.
    pub fn list(&self) -> Vec<&LanguageConfig> {
        let mut configs: Vec<&LanguageConfig> = self.languages.values().collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    /// Source filename inside the container ("code.py", "Main.java", …).
    pub fn source_filename(config: &LanguageConfig) -> String {
        match &config.class_name {
            Some(class) => format!("{}{}", class, config.extension),
            None => format!("code{}", config.extension),
        }
    }

    /// Interactive entrypoint for terminal sessions: the language REPL when
    /// it has one, a shell otherwise.
    pub fn repl_command(config: &LanguageConfig) -> &'static str {
        match config.id.as_str() {
            "python" => "python3",
            "javascript" | "typescript" => "node",
            "sql" => "sqlite3 /tmp/scratch.db",
            _ => "/bin/sh",
        }
    }
}

impl Default for LanguageCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn lang(
    id: &str,
    name: &str,
    kind: LanguageKind,
    image: &str,
    extension: &str,
    compile: Option<&str>,
    run: &str,
    timeout_ms: u64,
) -> LanguageConfig {
    LanguageConfig {
        id: id.into(),
        name: name.into(),
        kind,
        image: image.into(),
        extension: extension.into(),
        class_name: None,
        compile_command: compile.map(Into::into),
        run_command: run.into(),
        timeout_ms,
        memory_limit: "256m".into(),
        cpu_limit: 0.5,
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        lang(
            "javascript",
            "JavaScript (Node.js)",
            LanguageKind::Interpreted,
            "node:18-alpine",
            ".js",
            None,
            "node {src}",
            10_000,
        ),
        lang(
            "typescript",
            "TypeScript",
            LanguageKind::Transpiled,
            "codejoin/typescript:5",
            ".ts",
            Some("tsc {src} --outFile main.js --target es2020 --module commonjs"),
            "node main.js",
            15_000,
        ),
        lang(
            "python",
            "Python 3",
            LanguageKind::Interpreted,
            "python:3.11-alpine",
            ".py",
            None,
            "python3 {src}",
            10_000,
        ),
        LanguageConfig {
            class_name: Some("Main".into()),
            memory_limit: "512m".into(),
            ..lang(
                "java",
                "Java 17",
                LanguageKind::Compiled,
                "eclipse-temurin:17-jdk-alpine",
                ".java",
                Some("javac {src}"),
                "java Main",
                15_000,
            )
        },
        lang(
            "c",
            "C (GCC)",
            LanguageKind::Compiled,
            "gcc:13",
            ".c",
            Some("gcc {src} -o {bin} -O2 -lm"),
            "{bin}",
            15_000,
        ),
        lang(
            "cpp",
            "C++ (GCC)",
            LanguageKind::Compiled,
            "gcc:13",
            ".cpp",
            Some("g++ {src} -o {bin} -O2"),
            "{bin}",
            15_000,
        ),
        LanguageConfig {
            memory_limit: "512m".into(),
            ..lang(
                "go",
                "Go",
                LanguageKind::Compiled,
                "golang:1.22-alpine",
                ".go",
                Some("GOCACHE=/tmp/.gocache GOPATH=/tmp/go go build -o {bin} {src}"),
                "{bin}",
                20_000,
            )
        },
        lang(
            "rust",
            "Rust",
            LanguageKind::Compiled,
            "rust:1.79-alpine",
            ".rs",
            Some("rustc -O {src} -o {bin}"),
            "{bin}",
            20_000,
        ),
        lang(
            "sql",
            "SQL (SQLite)",
            LanguageKind::Sql,
            "keinos/sqlite3:latest",
            ".sql",
            None,
            // References /tmp itself, so the runner never pipes stdin in.
            "sqlite3 -batch /tmp/scratch.db \".read {src}\"",
            10_000,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_expected_languages() {
        let catalog = LanguageCatalog::new();
        for id in ["javascript", "typescript", "python", "java", "c", "cpp", "go", "rust", "sql"] {
            assert!(catalog.is_supported(id), "missing {id}");
        }
        assert!(!catalog.is_supported("cobol"));
    }

    #[test]
    fn compiled_languages_carry_compile_commands() {
        let catalog = LanguageCatalog::new();
        for config in catalog.list() {
            if matches!(config.kind, LanguageKind::Compiled | LanguageKind::Transpiled) {
                assert!(config.compile_command.is_some(), "{} lacks compile command", config.id);
            }
        }
    }

    #[test]
    fn java_uses_class_filename() {
        let catalog = LanguageCatalog::new();
        let java = catalog.get("java").unwrap();
        assert_eq!(LanguageCatalog::source_filename(java), "Main.java");
        let python = catalog.get("python").unwrap();
        assert_eq!(LanguageCatalog::source_filename(python), "code.py");
    }

    #[test]
    fn list_is_sorted_by_id() {
        let catalog = LanguageCatalog::new();
        let ids: Vec<&str> = catalog.list().iter().map(|c| c.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
