//! Keyword rule tables for issue bucketing and fix-type selection.
//!
//! Both tables are ordered and data-driven: the first rule that matches wins.
//! Keywords cover the English and Portuguese phrasing analyzers emit.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::models::{FixType, Issue, TargetType};

/// Topic bucket an issue falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    Security,
    Performance,
    CodeQuality,
    Architecture,
    Documentation,
    Testing,
    Accessibility,
    Other,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::CodeQuality => "codeQuality",
            Self::Architecture => "architecture",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Accessibility => "accessibility",
            Self::Other => "other",
        }
    }

    /// Agent responsible for tasks in this bucket.
    pub fn agent(&self) -> String {
        format!("{}-agent", self.as_str())
    }
}

pub struct CategoryRule {
    pub bucket: Bucket,
    pub keywords: &'static [&'static str],
}

pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        bucket: Bucket::Security,
        keywords: &[
            "security", "segurança", "seguranca", "vulnerab", "xss", "injection", "csrf",
            "secret", "credential", "firestore.rules", "auth",
        ],
    },
    CategoryRule {
        bucket: Bucket::Performance,
        keywords: &[
            "performance", "desempenho", "slow", "lento", "latency", "latência", "memory leak",
            "bundle size",
        ],
    },
    CategoryRule {
        bucket: Bucket::CodeQuality,
        keywords: &[
            "quality", "qualidade", "lint", "unused", "não utilizado", "duplicat", "complexity",
            "complexidade", "code smell",
        ],
    },
    CategoryRule {
        bucket: Bucket::Architecture,
        keywords: &["architecture", "arquitetura", "coupling", "acoplamento", "refactor", "refator"],
    },
    CategoryRule {
        bucket: Bucket::Documentation,
        keywords: &["documentation", "documentação", "documentacao", "readme", "jsdoc", "docs"],
    },
    CategoryRule {
        bucket: Bucket::Testing,
        keywords: &["test", "teste", "coverage", "cobertura"],
    },
    CategoryRule {
        bucket: Bucket::Accessibility,
        keywords: &["accessibility", "acessibilidade", "a11y", "aria", "contrast"],
    },
];

fn match_bucket(text: &str) -> Option<Bucket> {
    let text = text.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| text.contains(k)))
        .map(|rule| rule.bucket)
}

/// Declared category first, then the message; unmatched issues are `Other`.
pub fn bucket_for(issue: &Issue) -> Bucket {
    match_bucket(&issue.category)
        .or_else(|| match_bucket(&issue.message))
        .unwrap_or(Bucket::Other)
}

/// Group issues by bucket in bucket order, dropping empty buckets.
pub fn bucket_issues(issues: &[Issue]) -> Vec<(Bucket, Vec<&Issue>)> {
    let mut buckets: Vec<(Bucket, Vec<&Issue>)> = Vec::new();
    for issue in issues {
        let bucket = bucket_for(issue);
        match buckets.iter_mut().find(|(b, _)| *b == bucket) {
            Some((_, items)) => items.push(issue),
            None => buckets.push((bucket, vec![issue])),
        }
    }
    buckets.sort_by_key(|(b, _)| *b);
    buckets
}

/// What a fix rule decides for an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixDecision {
    Fix(FixType),
    Drop(&'static str),
}

pub struct FixRule {
    pub name: &'static str,
    pub matches: fn(message: &str, location: Option<&str>) -> bool,
    pub decision: FixDecision,
}

const DEPENDENCY_WORDS: &[&str] = &[
    "package", "pacote", "dependency", "dependência", "dependencia", "dependencies",
];
const MISSING_WORDS: &[&str] = &[
    "missing", "not found", "não encontrado", "não encontrada", "nao encontrado", "ausente",
    "does not exist", "não existe", "faltando",
];
const CONFIG_WORDS: &[&str] = &[
    "config", "configuração", "configuracao", "setting", "environment variable", "env var",
];
const IMPORT_WORDS: &[&str] = &["import", "require"];
const DELETE_WORDS: &[&str] = &[
    "unused", "remove", "delete", "não utilizado", "nao utilizado", "remover", "dead code",
];

fn contains_any(message: &str, words: &[&str]) -> bool {
    words.iter().any(|w| message.contains(w))
}

const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "ini", "env", "conf", "cfg", "properties"];

/// Whether a path names a configuration file.
pub fn is_config_path(path: &str) -> bool {
    let path = Path::new(path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.starts_with(".env")
        || name.contains("config")
        || (name.starts_with('.') && name.ends_with("rc"))
    {
        return true;
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext.as_str()))
}

/// Ordered fix-type rules. `message` is lower-cased before matching.
pub const FIX_RULES: &[FixRule] = &[
    FixRule {
        name: "dependency",
        matches: |message, _| contains_any(message, DEPENDENCY_WORDS),
        decision: FixDecision::Fix(FixType::Command),
    },
    FixRule {
        name: "missing",
        matches: |message, _| contains_any(message, MISSING_WORDS),
        decision: FixDecision::Fix(FixType::Create),
    },
    FixRule {
        name: "config",
        matches: |message, location| {
            contains_any(message, CONFIG_WORDS) || location.is_some_and(is_config_path)
        },
        decision: FixDecision::Fix(FixType::Config),
    },
    FixRule {
        name: "import",
        matches: |message, _| contains_any(message, IMPORT_WORDS),
        decision: FixDecision::Drop("import fixes are not automated yet"),
    },
    FixRule {
        name: "unused",
        matches: |message, _| contains_any(message, DELETE_WORDS),
        decision: FixDecision::Fix(FixType::Delete),
    },
    FixRule {
        name: "located",
        matches: |_, location| location.is_some(),
        decision: FixDecision::Fix(FixType::Create),
    },
];

/// Decide the fix type for an issue. `Drop` carries the reason.
pub fn decide_fix(issue: &Issue) -> (&'static str, FixDecision) {
    let message = issue.message.to_lowercase();
    let path = issue.location().map(|l| split_location(l).0);
    FIX_RULES
        .iter()
        .find(|rule| (rule.matches)(&message, path.as_deref()))
        .map(|rule| (rule.name, rule.decision))
        .unwrap_or(("unlocated", FixDecision::Drop("no location to apply a fix to")))
}

static LOCATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?):(\d+)(?::\d+)?$").expect("valid regex"));
static FILE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w./-]*\w\.[A-Za-z][\w]*").expect("valid regex"));
static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:package|pacote|dependency|dependência|dependencia|module|módulo)\s+['"`]?(@?[a-z0-9][\w.\-]*(?:/[\w.\-]+)?)"#,
    )
    .expect("valid regex")
});
static CONFIG_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)['"`]?([a-z_][\w.\-]*)['"`]?(?:\s*[=:]\s*|\s+(?:to|para|should be|deve ser|must be)\s+)['"`]?([^\s'"`,;]+)"#,
    )
    .expect("valid regex")
});

const NAME_STOPWORDS: &[&str] = &[
    "is", "not", "não", "nao", "was", "has", "the", "a", "an", "de", "do", "da", "em", "in",
    "for", "para", "version", "versão", "missing", "ausente",
];

/// Split `path:line[:col]` into a path and a `line:<n>` locator.
pub fn split_location(location: &str) -> (String, Option<String>) {
    match LOCATION_LINE.captures(location) {
        Some(caps) => (caps[1].to_string(), Some(format!("line:{}", &caps[2]))),
        None => (location.to_string(), None),
    }
}

/// First file-looking token in a message, e.g. `firestore.rules`.
pub fn file_token(message: &str) -> Option<String> {
    FILE_TOKEN.find(message).map(|m| m.as_str().to_string())
}

/// Package name mentioned after a dependency keyword.
pub fn extract_package_name(message: &str) -> Option<String> {
    PACKAGE_NAME
        .captures_iter(message)
        .map(|caps| caps[1].trim_end_matches('.').to_string())
        .find(|name| !NAME_STOPWORDS.contains(&name.to_lowercase().as_str()))
}

/// `key`/`value` pair mentioned in a configuration message.
pub fn extract_config_pair(message: &str) -> Option<(String, String)> {
    CONFIG_PAIR
        .captures_iter(message)
        .map(|caps| (caps[1].to_string(), caps[2].trim_end_matches('.').to_string()))
        .find(|(key, value)| {
            !NAME_STOPWORDS.contains(&key.to_lowercase().as_str()) && !value.is_empty()
        })
}

/// Install command for `package`, scoped to the manifest nearest `location`.
/// Returns the command and the manifest it targets.
pub fn install_command(package: &str, location: Option<&str>) -> Option<(String, String)> {
    let manifest = location.unwrap_or("package.json");
    let path = Path::new(manifest);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty() && p != ".");

    let command = match file_name.as_str() {
        "package.json" => match &dir {
            Some(dir) => format!("npm install {} --prefix {}", package, dir),
            None => format!("npm install {}", package),
        },
        "Cargo.toml" => format!("cargo add {} --manifest-path {}", package, manifest),
        "requirements.txt" | "pyproject.toml" => format!("pip install {}", package),
        "go.mod" => match &dir {
            Some(dir) => format!("cd {} && go get {}", dir, package),
            None => format!("go get {}", package),
        },
        // Not a manifest: assume an npm project rooted at the file's directory.
        _ => {
            return Some(match &dir {
                Some(dir) => (
                    format!("npm install {} --prefix {}", package, dir),
                    format!("{}/package.json", dir),
                ),
                None => (format!("npm install {}", package), "package.json".to_string()),
            });
        }
    };
    Some((command, manifest.to_string()))
}

/// Target type for a file that is about to be created.
pub fn target_type_for_path(path: &str) -> TargetType {
    let lower = path.to_lowercase();
    if lower.ends_with(".md") || lower.ends_with(".rst") || lower.ends_with(".txt") {
        TargetType::Doc
    } else if is_config_path(path) {
        TargetType::Config
    } else {
        TargetType::File
    }
}

/// Starter body for a file created to resolve `message`.
pub fn template_for(path: &str, message: &str) -> String {
    let p = Path::new(path);
    let stem = p
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    let ext = p
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name = p
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name == "firestore.rules" {
        return "rules_version = '2';\n\nservice cloud.firestore {\n  match /databases/{database}/documents {\n    match /{document=**} {\n      allow read, write: if false;\n    }\n  }\n}\n".to_string();
    }
    if name.contains(".test.") || name.contains(".spec.") {
        return format!(
            "describe('{}', () => {{\n  it('exists', () => {{\n    expect(true).toBe(true);\n  }});\n}});\n",
            stem.split('.').next().unwrap_or(&stem)
        );
    }
    match ext.as_str() {
        "md" => format!("# {}\n\n{}\n", stem, message),
        "json" => "{}\n".to_string(),
        "yml" | "yaml" | "toml" | "ini" | "env" | "rules" => format!("# {}\n", message),
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => {
            format!("// Created to resolve: {}\nexport {{}};\n", message)
        }
        "py" => format!("\"\"\"{}\"\"\"\n", message),
        "rs" => format!("//! {}\n", message),
        _ => format!("{}\n", message),
    }
}
