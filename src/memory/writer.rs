//! The write pipeline: quality gate, privacy filter, router, and the
//! similarity-branch decision (reinforce / conflict-replace / append).
//! Store/file IO and locking live in `MemoryEngine::log`; this module holds
//! the decision logic so it stays a deterministic function of its inputs
//! (content, type_hint, route table, best-candidate similarity), per the
//! write-pipeline determinism property.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::PrivacyConfig;
use crate::memory::scope::Scope;

pub const REINFORCE_THRESHOLD: f32 = 0.92;
pub const CONFLICT_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Appended { path: String, memory_type: String },
    Reinforced { path: String, score: f32 },
    ConflictUpdated { path: String, score: f32 },
    Rejected { reason: String },
}

impl WriteOutcome {
    /// Render as the one-line reply described in the external interface.
    pub fn render(&self) -> String {
        match self {
            WriteOutcome::Appended { path, memory_type } => {
                format!("Memory saved to {} (type: {})", path, memory_type)
            }
            WriteOutcome::Reinforced { path, score } => {
                format!("Existing memory reinforced (score={:.2}) in {}", score, path)
            }
            WriteOutcome::ConflictUpdated { path, score } => {
                format!("Conflicting memory updated (score={:.2}) in {}", score, path)
            }
            WriteOutcome::Rejected { reason } => format!("Rejected: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub target_file: String,
    pub scope: Scope,
    pub memory_type: String,
    pub importance: u8,
    pub section: String,
}

const FILLER_PREFIXES: &[&str] = &[
    "ok", "okay", "sure", "let me", "好的", "我来", "明白", "收到",
];

const SPECULATIVE_PREFIXES: &[&str] = &[
    "maybe", "perhaps", "possibly", "probably", "i think", "i guess", "not sure",
    "可能", "也许", "或许", "大概",
];

const CODE_PATTERN_PREFIXES: &[&str] = &["/", "\\", ".", "import ", "from ", "[", "(", "{"];

static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{4E00}-\u{9FFF}]").unwrap());

static INSTRUCTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)必须|不要|always|never|\brule\b|规则").unwrap());
static DECISION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)决定|采用|\bdecided\b|\bchose\b|选择.*方案").unwrap());
static PATTERN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)发现|模式|\bpattern\b|\bsolution\b|解决").unwrap());
static PREFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)偏好|\bprefer\b|\blike\b|喜欢").unwrap());
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[\u{4E00}-\u{9FFF}]{2,4}(?:是|担任))|(?:[A-Z][a-zA-Z]+ (?:is|role))").unwrap()
});

static DEFAULT_PRIVACY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"sk-[A-Za-z0-9]{20,}").unwrap(),
        Regex::new(r"gh[pousr]_[A-Za-z0-9]{30,}").unwrap(),
        Regex::new(r"(?i)(password|secret)\s*[:=]\s*\S+").unwrap(),
        Regex::new(r"\b192\.168\.\d{1,3}\.\d{1,3}\b").unwrap(),
        Regex::new(r"\b10\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap(),
        Regex::new(r"\blocalhost:\d+\b").unwrap(),
    ]
});

pub struct Writer {
    privacy_enabled: bool,
    privacy_patterns: Vec<Regex>,
}

impl Writer {
    pub fn new(config: &PrivacyConfig) -> Self {
        let privacy_patterns = if config.patterns.is_empty() {
            DEFAULT_PRIVACY_PATTERNS.clone()
        } else {
            config
                .patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect()
        };

        Self {
            privacy_enabled: config.enabled,
            privacy_patterns,
        }
    }

    /// Stage 1: reject content that's too short, filler, code-like, or
    /// speculative. Returns the rejection reason on failure.
    pub fn quality_gate(&self, content: &str) -> Result<(), String> {
        let trimmed = content.trim();

        let cjk_count = CJK_RE.find_iter(trimmed).count();
        let is_cjk_dominant = trimmed.chars().count() > 0
            && (cjk_count * 2) >= trimmed.chars().count();
        let min_len = if is_cjk_dominant { 10 } else { 20 };
        if trimmed.chars().count() < min_len {
            return Err("too short".to_string());
        }

        let lowered = trimmed.to_lowercase();
        if FILLER_PREFIXES
            .iter()
            .any(|p| lowered.starts_with(&p.to_lowercase()))
        {
            return Err("filler response".to_string());
        }

        if CODE_PATTERN_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
            return Err("looks like code or a path".to_string());
        }

        if SPECULATIVE_PREFIXES
            .iter()
            .any(|p| lowered.starts_with(&p.to_lowercase()))
        {
            return Err("too speculative".to_string());
        }

        Ok(())
    }

    /// Stage 2: reject content matching a privacy-sensitive pattern.
    pub fn privacy_gate(&self, content: &str) -> Result<(), String> {
        if !self.privacy_enabled {
            return Ok(());
        }
        if self.privacy_patterns.iter().any(|re| re.is_match(content)) {
            return Err("contains sensitive information".to_string());
        }
        Ok(())
    }

    /// Stage 3: decide the target file, scope, memory type, importance, and
    /// section for a piece of content. `type_hint`, if recognized, wins
    /// outright.
    pub fn route(&self, content: &str, type_hint: Option<&str>) -> Route {
        if let Some(hint) = type_hint
            && let Some(route) = route_for_hint(hint)
        {
            return route;
        }

        if INSTRUCTION_RE.is_match(content) {
            return Route {
                target_file: "user/instructions.md".to_string(),
                scope: Scope::Global,
                memory_type: "instruction".to_string(),
                importance: 5,
                section: "Instructions".to_string(),
            };
        }
        if DECISION_RE.is_match(content) {
            return Route {
                target_file: "agent/decisions.md".to_string(),
                scope: Scope::Project,
                memory_type: "decision".to_string(),
                importance: 5,
                section: "Decisions".to_string(),
            };
        }
        if PATTERN_RE.is_match(content) {
            return Route {
                target_file: "agent/patterns.md".to_string(),
                scope: Scope::Project,
                memory_type: "pattern".to_string(),
                importance: 3,
                section: "Patterns".to_string(),
            };
        }
        if PREFERENCE_RE.is_match(content) {
            return Route {
                target_file: "user/preferences.md".to_string(),
                scope: Scope::Global,
                memory_type: "preference".to_string(),
                importance: 4,
                section: "Preferences".to_string(),
            };
        }
        if ENTITY_RE.is_match(content) {
            return Route {
                target_file: "user/entities.md".to_string(),
                scope: Scope::Global,
                memory_type: "entity".to_string(),
                importance: 3,
                section: "Entities".to_string(),
            };
        }

        let today = Utc::now().format("%Y-%m-%d");
        Route {
            target_file: format!("journal/{}.md", today),
            scope: Scope::Project,
            memory_type: "journal".to_string(),
            importance: 1,
            section: "Journal".to_string(),
        }
    }
}

fn route_for_hint(hint: &str) -> Option<Route> {
    match hint {
        "instruction" => Some(Route {
            target_file: "user/instructions.md".to_string(),
            scope: Scope::Global,
            memory_type: "instruction".to_string(),
            importance: 5,
            section: "Instructions".to_string(),
        }),
        "decision" => Some(Route {
            target_file: "agent/decisions.md".to_string(),
            scope: Scope::Project,
            memory_type: "decision".to_string(),
            importance: 5,
            section: "Decisions".to_string(),
        }),
        "pattern" => Some(Route {
            target_file: "agent/patterns.md".to_string(),
            scope: Scope::Project,
            memory_type: "pattern".to_string(),
            importance: 3,
            section: "Patterns".to_string(),
        }),
        "preference" => Some(Route {
            target_file: "user/preferences.md".to_string(),
            scope: Scope::Global,
            memory_type: "preference".to_string(),
            importance: 4,
            section: "Preferences".to_string(),
        }),
        "entity" => Some(Route {
            target_file: "user/entities.md".to_string(),
            scope: Scope::Global,
            memory_type: "entity".to_string(),
            importance: 3,
            section: "Entities".to_string(),
        }),
        "journal" => {
            let today = Utc::now().format("%Y-%m-%d");
            Some(Route {
                target_file: format!("journal/{}.md", today),
                scope: Scope::Project,
                memory_type: "journal".to_string(),
                importance: 1,
                section: "Journal".to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> Writer {
        Writer::new(&PrivacyConfig {
            enabled: true,
            patterns: Vec::new(),
        })
    }

    #[test]
    fn quality_gate_rejects_short_latin_content() {
        let w = writer();
        assert!(w.quality_gate("ok").is_err());
        assert!(w.quality_gate("too short text").is_err());
    }

    #[test]
    fn quality_gate_uses_shorter_threshold_for_cjk() {
        let w = writer();
        assert!(w.quality_gate("好的").is_err());
        assert!(w.quality_gate("用户偏好使用异步编程而不是线程").is_ok());
    }

    #[test]
    fn quality_gate_rejects_code_like_content() {
        let w = writer();
        assert!(w.quality_gate("/usr/local/bin/rustc --version").is_err());
        assert!(w.quality_gate("import numpy as np and then do stuff").is_err());
    }

    #[test]
    fn quality_gate_rejects_speculative_prefix() {
        let w = writer();
        assert!(w.quality_gate("maybe we should use postgres for this").is_err());
        assert!(w.quality_gate("可能需要换一个数据库方案比较好").is_err());
    }

    #[test]
    fn privacy_gate_rejects_openai_style_key() {
        let w = writer();
        let content = "使用 OpenAI API，key 是 sk-ABCDEFGHIJKLMNOPQRSTUVWXYZ012345";
        assert!(w.privacy_gate(content).is_err());
    }

    #[test]
    fn privacy_gate_accepts_clean_content() {
        let w = writer();
        assert!(w.privacy_gate("this project uses FastAPI for the backend").is_ok());
    }

    #[test]
    fn router_matches_instruction_priority_first() {
        let w = writer();
        let route = w.route("必须始终先写测试再写实现", None);
        assert_eq!(route.target_file, "user/instructions.md");
        assert_eq!(route.importance, 5);
    }

    #[test]
    fn router_falls_back_to_journal() {
        let w = writer();
        let route = w.route("今天调试了一个很奇怪的网络超时问题", None);
        assert_eq!(route.memory_type, "journal");
        assert_eq!(route.scope, Scope::Project);
    }

    #[test]
    fn type_hint_wins_over_router_table() {
        let w = writer();
        let route = w.route("随便写点什么偏好的内容", Some("decision"));
        assert_eq!(route.target_file, "agent/decisions.md");
    }
}
