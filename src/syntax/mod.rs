pub mod types;

pub use types::{CommentSyntax, LanguageSyntax, SyntaxTable};

use globset::Glob;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::SyntaxConfig;

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("Failed to read syntax table: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse syntax table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] globset::Error),
}

const HASH: &[&str] = &["#"];

/// (name, extensions, filenames, line prefixes, block delimiters)
type BuiltinEntry = (
    &'static str,
    &'static [&'static str],
    &'static [&'static str],
    &'static [&'static str],
    &'static [(&'static str, &'static str)],
);

/// Shell, config, build, infra and markup file types.
/// Programming languages are left to a dedicated table.
const BUILTIN: &[BuiltinEntry] = &[
    (
        "Shell",
        &["sh", "bash", "zsh", "ksh", "fish"],
        &[".bashrc", ".bash_profile", ".zshrc", ".profile"],
        HASH,
        &[],
    ),
    ("PowerShell", &["ps1", "psm1", "psd1"], &[], HASH, &[("<#", "#>")]),
    ("Batch", &["bat", "cmd"], &[], &["::", "REM "], &[]),
    ("YAML", &["yml", "yaml"], &[".clang-format"], HASH, &[]),
    ("TOML", &["toml"], &[], HASH, &[]),
    (
        "INI",
        &["ini", "cfg", "conf", "properties", "env"],
        &[".editorconfig", ".env", ".env.*", ".npmrc"],
        &["#", ";"],
        &[],
    ),
    (
        "Ignore",
        &[],
        &[".gitignore", ".dockerignore", ".gitattributes", "CODEOWNERS"],
        HASH,
        &[],
    ),
    (
        "Dockerfile",
        &["dockerfile"],
        &["Dockerfile", "Dockerfile.*", "Containerfile"],
        HASH,
        &[],
    ),
    (
        "Makefile",
        &["mk", "mak"],
        &["Makefile", "makefile", "GNUmakefile"],
        HASH,
        &[],
    ),
    (
        "CMake",
        &["cmake"],
        &["CMakeLists.txt"],
        HASH,
        &[("#[[", "]]")],
    ),
    (
        "Starlark",
        &["bzl", "star", "bazel"],
        &["BUILD", "WORKSPACE", "MODULE.bazel", "Tiltfile"],
        HASH,
        &[],
    ),
    (
        "Gradle",
        &["gradle"],
        &["Jenkinsfile"],
        &["//"],
        &[("/*", "*/")],
    ),
    (
        "HCL",
        &["tf", "tfvars", "hcl", "nomad"],
        &[],
        &["#", "//"],
        &[("/*", "*/")],
    ),
    ("Nix", &["nix"], &[], HASH, &[("/*", "*/")]),
    ("Protobuf", &["proto"], &[], &["//"], &[("/*", "*/")]),
    ("SQL", &["sql"], &[], &["--"], &[("/*", "*/")]),
    (
        "Markup",
        &["html", "htm", "xhtml", "xml", "xsd", "xsl", "svg", "plist", "csproj", "md", "markdown"],
        &[],
        &[],
        &[("<!--", "-->")],
    ),
    ("CSS", &["css"], &[], &[], &[("/*", "*/")]),
    ("SCSS", &["scss", "sass", "less"], &[], &["//"], &[("/*", "*/")]),
    ("Jinja", &["j2", "jinja", "jinja2", "twig"], &[], &[], &[("{#", "#}")]),
    ("Handlebars", &["hbs", "handlebars"], &[], &[], &[("{{!--", "--}}")]),
    ("TeX", &["tex", "sty", "cls", "bib"], &[], &["%"], &[]),
];

impl SyntaxTable {
    /// Built-in table covering shell, config, build, infra and markup files.
    pub fn builtin() -> Self {
        let languages = BUILTIN
            .iter()
            .map(|(name, extensions, filenames, prefixes, blocks)| {
                let mut comments: Vec<CommentSyntax> =
                    prefixes.iter().map(|p| CommentSyntax::line(p)).collect();
                comments.extend(blocks.iter().map(|(start, end)| CommentSyntax::block(start, end)));
                LanguageSyntax {
                    name: name.to_string(),
                    extensions: extensions.iter().map(|e| e.to_string()).collect(),
                    filenames: filenames.iter().map(|f| f.to_string()).collect(),
                    comments,
                }
            })
            .collect();
        Self { languages }
    }

    /// Parse a table from its JSON form (`{"languages": [...]}`).
    pub fn from_json(json: &str) -> Result<Self, SyntaxError> {
        let table: Self = serde_json::from_str(json)?;
        for pattern in table.languages.iter().flat_map(|lang| &lang.filenames) {
            if pattern.contains('*') {
                Glob::new(pattern)?;
            }
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, SyntaxError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Table for a run: the built-in entries, extended or replaced by the
    /// configured JSON table (relative to `repo_root`).
    pub fn from_config(repo_root: &Path, config: &SyntaxConfig) -> Result<Self, SyntaxError> {
        let Some(table) = &config.table else {
            return Ok(Self::builtin());
        };
        let custom = Self::load(&repo_root.join(table))?;
        debug!(
            path = %table.display(),
            languages = custom.languages.len(),
            replace = config.replace_defaults,
            "loaded syntax table"
        );
        if config.replace_defaults {
            return Ok(custom);
        }
        let mut merged = Self::builtin();
        merged.extend_with(custom);
        Ok(merged)
    }

    /// Put `other`'s languages ahead of ours so they win on lookup.
    pub fn extend_with(&mut self, other: SyntaxTable) {
        let mut languages = other.languages;
        languages.append(&mut self.languages);
        self.languages = languages;
    }

    /// Find the syntax for a repository-relative path.
    ///
    /// Exact file names are tried first, then `*` patterns, then the extension.
    pub fn lookup(&self, path: &str) -> Option<&LanguageSyntax> {
        let file_name = path.rsplit('/').next().unwrap_or(path);

        if let Some(lang) = self
            .languages
            .iter()
            .find(|lang| lang.filenames.iter().any(|f| !f.contains('*') && f == file_name))
        {
            return Some(lang);
        }

        if let Some(lang) = self.languages.iter().find(|lang| {
            lang.filenames
                .iter()
                .any(|f| f.contains('*') && glob_matches(f, file_name))
        }) {
            return Some(lang);
        }

        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() {
            // dotfiles like ".profile" have no extension
            return None;
        }
        self.languages
            .iter()
            .find(|lang| lang.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

fn glob_matches(pattern: &str, file_name: &str) -> bool {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher().is_match(file_name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_extension() {
        let table = SyntaxTable::builtin();
        assert_eq!(table.lookup("scripts/deploy.sh").unwrap().name, "Shell");
        assert_eq!(table.lookup("ci/config.YML").unwrap().name, "YAML");
        assert_eq!(table.lookup("infra/main.tf").unwrap().name, "HCL");
    }

    #[test]
    fn test_lookup_by_file_name() {
        let table = SyntaxTable::builtin();
        assert_eq!(table.lookup("Dockerfile").unwrap().name, "Dockerfile");
        assert_eq!(table.lookup("docker/Dockerfile.dev").unwrap().name, "Dockerfile");
        assert_eq!(table.lookup("Makefile").unwrap().name, "Makefile");
        assert_eq!(table.lookup("CMakeLists.txt").unwrap().name, "CMake");
    }

    #[test]
    fn test_lookup_unknown() {
        let table = SyntaxTable::builtin();
        assert!(table.lookup("src/main.rs").is_none());
        assert!(table.lookup("README").is_none());
        assert!(table.lookup(".unknownrc").is_none());
    }

    #[test]
    fn test_custom_table_takes_precedence() {
        let mut table = SyntaxTable::builtin();
        let custom = SyntaxTable::from_json(
            r##"{"languages": [
                {"name": "Rust", "extensions": ["rs"], "comments": [{"line_prefix": "//"}, {"block_start": "/*", "block_end": "*/"}]},
                {"name": "Custom YAML", "extensions": ["yml"], "comments": [{"line_prefix": "#"}]}
            ]}"##,
        )
        .unwrap();
        table.extend_with(custom);
        assert_eq!(table.lookup("src/lib.rs").unwrap().name, "Rust");
        assert_eq!(table.lookup("a.yml").unwrap().name, "Custom YAML");
        assert_eq!(table.lookup("a.toml").unwrap().name, "TOML");
    }

    #[test]
    fn test_from_config_extends_or_replaces() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("syntax.json"),
            r#"{"languages": [{"name": "Rust", "extensions": ["rs"], "comments": [{"line_prefix": "//"}]}]}"#,
        )
        .unwrap();

        let mut config = SyntaxConfig {
            table: Some("syntax.json".into()),
            replace_defaults: false,
        };
        let extended = SyntaxTable::from_config(dir.path(), &config).unwrap();
        assert_eq!(extended.lookup("src/lib.rs").unwrap().name, "Rust");
        assert!(extended.lookup("a.sh").is_some());

        config.replace_defaults = true;
        let replaced = SyntaxTable::from_config(dir.path(), &config).unwrap();
        assert!(replaced.lookup("a.sh").is_none());

        let builtin = SyntaxTable::from_config(dir.path(), &SyntaxConfig::default()).unwrap();
        assert!(builtin.lookup("src/lib.rs").is_none());
    }

    #[test]
    fn test_missing_table_file_is_error() {
        let config = SyntaxConfig {
            table: Some("nope.json".into()),
            replace_defaults: false,
        };
        assert!(matches!(
            SyntaxTable::from_config(Path::new("/nonexistent"), &config),
            Err(SyntaxError::FileRead(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            SyntaxTable::from_json("{\"languages\": 3}"),
            Err(SyntaxError::Parse(_))
        ));
    }

    #[test]
    fn test_lookup_by_file_name_glob() {
        let table = SyntaxTable::builtin();
        assert_eq!(table.lookup("deploy/Dockerfile.prod").unwrap().name, "Dockerfile");
        assert_eq!(table.lookup(".env.local").unwrap().name, "INI");
        assert!(table.lookup("Dockerfiles").is_none());

        let custom = SyntaxTable::from_json(
            r##"{"languages": [{"name": "Procfile", "filenames": ["Procfile.*", "*.procfile"], "comments": [{"line_prefix": "#"}]}]}"##,
        )
        .unwrap();
        assert_eq!(custom.lookup("Procfile.dev").unwrap().name, "Procfile");
        assert_eq!(custom.lookup("web.procfile").unwrap().name, "Procfile");
        assert!(custom.lookup("Procfile").is_none());
    }

    #[test]
    fn test_invalid_file_name_pattern_is_error() {
        assert!(matches!(
            SyntaxTable::from_json(
                r##"{"languages": [{"name": "Bad", "filenames": ["[*"], "comments": [{"line_prefix": "#"}]}]}"##
            ),
            Err(SyntaxError::Pattern(_))
        ));
    }

    #[test]
    fn test_block_closers() {
        let table = SyntaxTable::builtin();
        assert_eq!(table.lookup("main.tf").unwrap().block_closers(), vec!["*/"]);
        assert_eq!(table.lookup("index.html").unwrap().block_closers(), vec!["-->"]);
        assert!(table.lookup("build.sh").unwrap().block_closers().is_empty());
    }

    #[test]
    fn test_block_delimiters_require_both_ends() {
        let half = CommentSyntax {
            line_prefix: None,
            block_start: Some("/*".to_string()),
            block_end: None,
        };
        assert!(half.block_delimiters().is_none());
        assert_eq!(CommentSyntax::block("<!--", "-->").block_delimiters(), Some(("<!--", "-->")));
    }
}
