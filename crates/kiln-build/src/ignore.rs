//! `.dockerignore` loading and matching.
//!
//! Patterns follow the Docker build-context rules: later patterns win,
//! `!pattern` re-includes, `**` spans directories, and a path is ignored
//! when it or any of its parent directories matches.

use glob::MatchOptions;
use std::path::Path;

/// Name of the ignore file at the root of the build context.
pub const ROOT_IGNORE_FILE: &str = ".dockerignore";

/// Patterns used when the build context has no ignore file at all.
pub const DEFAULT_DOCKERIGNORE: &str = r#"# Default .dockerignore file for kiln
**/.DS_Store
**/.direnv
**/.envrc
**/.git
**/.github
**/.idea
**/.next
**/.vscode
**/__pycache__
**/compose.yaml
**/compose.yml
**/docker-compose.yml
**/docker-compose.yaml
**/kiln.toml
**/node_modules
**/Thumbs.db
# Ignore our own binary, but only in the root to avoid ignoring subfolders
kiln"#;

/// `*` and `?` never cross a `/`; leading dots need no special handling.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Where the active ignore rules came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreSource {
    /// `<dockerfile>.dockerignore`, next to the build file
    BuildFile(String),
    /// `.dockerignore` at the context root
    Root,
    /// [`DEFAULT_DOCKERIGNORE`]
    Default,
}

impl IgnoreSource {
    /// Context-relative path of the ignore file, if one was read.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            IgnoreSource::BuildFile(name) => Some(name),
            IgnoreSource::Root => Some(ROOT_IGNORE_FILE),
            IgnoreSource::Default => None,
        }
    }
}

#[derive(Debug)]
struct Pattern {
    glob: glob::Pattern,
    exclusion: bool,
}

/// Compiled ignore rules.
#[derive(Debug, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Parse ignore-file content. Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Result<Self, IgnoreError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut patterns = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (exclusion, pattern) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };
            if pattern.is_empty() {
                return Err(IgnoreError::IllegalExclusion);
            }

            let pattern = clean_path(pattern);
            let glob = compile(&pattern)?;
            patterns.push(Pattern { glob, exclusion });
        }

        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any `!pattern` re-inclusions exist. Ignored directories can
    /// only be pruned from the walk when this is false.
    pub fn has_exclusions(&self) -> bool {
        self.patterns.iter().any(|p| p.exclusion)
    }

    /// Returns true when `path` (slash-separated, relative to the context
    /// root) or one of its parent directories is ignored.
    pub fn matches_or_parent_matches(&self, path: &str) -> bool {
        let path = clean_path(path);
        let parent_dirs: Vec<&str> = match path.rsplit_once('/') {
            Some((parent, _)) => parent.split('/').collect(),
            None => Vec::new(),
        };

        let mut matched = false;
        for pattern in &self.patterns {
            // Only exclusions can flip a match, only inclusions can create one.
            if pattern.exclusion != matched {
                continue;
            }

            let hit = pattern.glob.matches_with(&path, MATCH_OPTIONS)
                || (1..=parent_dirs.len()).any(|i| {
                    pattern
                        .glob
                        .matches_with(&parent_dirs[..i].join("/"), MATCH_OPTIONS)
                });

            if hit {
                tracing::trace!(path = %path, pattern = %pattern.glob, exclusion = pattern.exclusion, "ignore pattern hit");
                matched = !pattern.exclusion;
            }
        }
        matched
    }
}

/// Active ignore rules for one packaging run.
#[derive(Debug)]
pub struct ResolvedIgnore {
    pub matcher: IgnoreMatcher,
    pub source: IgnoreSource,
}

/// Load the ignore rules that govern `dockerfile` inside `root`.
///
/// `<dockerfile>.dockerignore` takes precedence over the root
/// `.dockerignore`; when neither exists the built-in defaults apply.
pub fn resolve(root: &Path, dockerfile: &str) -> Result<ResolvedIgnore, IgnoreError> {
    let specific = format!("{dockerfile}.dockerignore");

    let (content, source) = if let Some(content) = read_ignore_file(root, &specific)? {
        (content, IgnoreSource::BuildFile(specific))
    } else if let Some(content) = read_ignore_file(root, ROOT_IGNORE_FILE)? {
        (content, IgnoreSource::Root)
    } else {
        tracing::warn!(
            root = %root.display(),
            "no .dockerignore file found; using defaults"
        );
        (DEFAULT_DOCKERIGNORE.to_owned(), IgnoreSource::Default)
    };

    let matcher = IgnoreMatcher::parse(&content)?;
    Ok(ResolvedIgnore { matcher, source })
}

fn read_ignore_file(root: &Path, name: &str) -> Result<Option<String>, IgnoreError> {
    let path = root.join(name);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            tracing::debug!(file = name, "reading ignore file");
            Ok(Some(content))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IgnoreError::Read { path, source: e }),
    }
}

/// Lexically clean a slash-separated relative path: drop `.` and empty
/// segments, resolve `..`, and strip a leading `/`.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        ".".to_owned()
    } else {
        parts.join("/")
    }
}

/// Compile one cleaned pattern. Backslash escapes become glob literals and
/// `[^...]` is accepted as a negated class alongside `[!...]`.
fn compile(pattern: &str) -> Result<glob::Pattern, IgnoreError> {
    let mut translated = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                translated.push_str(&glob::Pattern::escape(&escaped.to_string()));
            }
            '[' if chars.peek() == Some(&'^') => {
                chars.next();
                translated.push_str("[!");
            }
            c => translated.push(c),
        }
    }

    glob::Pattern::new(&translated).map_err(|e| IgnoreError::BadPattern {
        pattern: pattern.to_owned(),
        detail: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum IgnoreError {
    #[error("failed to read ignore file {path}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("illegal exclusion pattern: \"!\"")]
    IllegalExclusion,
    #[error("invalid ignore pattern {pattern:?}: {detail}")]
    BadPattern { pattern: String, detail: String },
}
