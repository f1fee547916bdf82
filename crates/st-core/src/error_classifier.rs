//! Backend error text -> [`ErrorMeta`].
//!
//! Pure functions only. Text patterns give a first classification, then any
//! structured fields the backend attached override them field by field.

use std::sync::LazyLock;

use regex::Regex;
use st_types::{BackendErrorMeta, ErrorMeta, ErrorType};

/// Raw text longer than this is cut when rendered for unknown errors.
pub const MAX_RAW_ERROR_CHARS: usize = 300;

// ============================================================================
// Patterns
// ============================================================================

/// "Rate limit exceeded, 10 per 60s"
static RATE_LIMIT_SHORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate limit.*?(\d+)\s*per\s*(\d+)s").expect("Invalid rate limit regex")
});

/// "10 per 1 minute"
static RATE_LIMIT_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+per\s+(\d+)\s+(second|minute|hour)")
        .expect("Invalid rate limit unit regex")
});

static WAIT_SECONDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)wait\s+(\d+)\s*seconds?").expect("Invalid wait regex")
});

static MAX_CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)maximum context length.*?(\d{3,})").expect("Invalid context regex")
});

static MAX_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)max size:\s*(\d+)\s*tokens").expect("Invalid max size regex")
});

static REQUESTED_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)requested\s+(\d+)\s*tokens").expect("Invalid requested regex")
});

const RATE_LIMIT_PHRASES: &[&str] = &["rate limit", "too many requests"];
const CONTEXT_PHRASES: &[&str] = &["context length", "context window", "too large", "max_tokens"];
const AUTH_PHRASES: &[&str] = &[
    "unauthorized",
    "authentication",
    "invalid api key",
    "forbidden",
];

fn capture_u64(re: &Regex, text: &str, group: usize) -> Option<u64> {
    re.captures(text)?.get(group)?.as_str().parse().ok()
}

// ============================================================================
// Classification
// ============================================================================

/// Classify an error. Every input yields a non-empty `summary`.
pub fn classify(text: &str, backend: Option<&BackendErrorMeta>) -> ErrorMeta {
    let mut meta = from_text(text);
    if let Some(backend) = backend {
        apply_backend(&mut meta, backend);
    }
    if meta.error_type == ErrorType::Unknown {
        meta.error_type = match meta.status_code {
            Some(429) => ErrorType::RateLimit,
            Some(401) | Some(403) => ErrorType::AuthError,
            _ => ErrorType::Unknown,
        };
    }
    if meta.rate_limit.is_none() {
        if let (Some(count), Some(secs)) = (meta.rate_limit_count, meta.rate_limit_seconds) {
            meta.rate_limit = Some(format!("{count} per {secs}s"));
        }
    }
    meta.summary = summarize(&meta);
    meta
}

fn from_text(text: &str) -> ErrorMeta {
    let mut meta = ErrorMeta::default();
    let mut kind: Option<ErrorType> = None;

    if let Some(caps) = RATE_LIMIT_SHORT.captures(text) {
        let count = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
        let secs = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());
        if let (Some(count), Some(secs)) = (count, secs) {
            meta.rate_limit_count = Some(count);
            meta.rate_limit_seconds = Some(secs);
            kind.get_or_insert(ErrorType::RateLimit);
        }
    }
    if meta.rate_limit_count.is_none() {
        if let Some(caps) = RATE_LIMIT_UNIT.captures(text) {
            let count = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
            let span = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());
            let unit = match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
                Some("minute") => 60,
                Some("hour") => 3_600,
                _ => 1,
            };
            if let (Some(count), Some(span)) = (count, span) {
                meta.rate_limit_count = Some(count);
                meta.rate_limit_seconds = Some(span.saturating_mul(unit));
                kind.get_or_insert(ErrorType::RateLimit);
            }
        }
    }
    if let Some(wait) = capture_u64(&WAIT_SECONDS, text, 1) {
        meta.wait_seconds = Some(wait);
        kind.get_or_insert(ErrorType::RateLimit);
    }

    if let Some(max) = capture_u64(&MAX_CONTEXT, text, 1) {
        meta.max_context_tokens = Some(max);
        kind.get_or_insert(ErrorType::ContextOverflow);
    }
    if let Some(max) = capture_u64(&MAX_SIZE, text, 1) {
        meta.max_context_tokens = Some(max);
        kind.get_or_insert(ErrorType::ContextOverflow);
    }
    meta.requested_tokens = capture_u64(&REQUESTED_TOKENS, text, 1);

    if kind.is_none() {
        let lower = text.to_lowercase();
        let has = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));
        if has(RATE_LIMIT_PHRASES) {
            kind = Some(ErrorType::RateLimit);
        } else if has(CONTEXT_PHRASES) {
            kind = Some(ErrorType::ContextOverflow);
        } else if has(AUTH_PHRASES) {
            kind = Some(ErrorType::AuthError);
        }
    }

    meta.error_type = kind.unwrap_or_default();
    meta
}

/// Backend fields win wherever they are present. A backend `unknown` type
/// carries no information and does not override a text match.
fn apply_backend(meta: &mut ErrorMeta, backend: &BackendErrorMeta) {
    if let Some(kind) = backend.error_type.filter(|k| *k != ErrorType::Unknown) {
        meta.error_type = kind;
    }
    if backend.rate_limit.is_some() {
        meta.rate_limit = backend.rate_limit.clone();
    }
    if backend.rate_limit_count.is_some() {
        meta.rate_limit_count = backend.rate_limit_count;
    }
    if backend.rate_limit_seconds.is_some() {
        meta.rate_limit_seconds = backend.rate_limit_seconds;
    }
    if backend.wait_seconds.is_some() {
        meta.wait_seconds = backend.wait_seconds;
    }
    if backend.max_context_tokens.is_some() {
        meta.max_context_tokens = backend.max_context_tokens;
    }
    if backend.requested_tokens.is_some() {
        meta.requested_tokens = backend.requested_tokens;
    }
    if backend.status_code.is_some() {
        meta.status_code = backend.status_code;
    }
}

fn summarize(meta: &ErrorMeta) -> String {
    match meta.error_type {
        ErrorType::RateLimit => {
            let mut details = Vec::new();
            if let Some(limit) = &meta.rate_limit {
                details.push(limit.clone());
            }
            if let Some(wait) = meta.wait_seconds {
                details.push(format!("wait {wait}s"));
            }
            if details.is_empty() {
                "🚦 Rate limited".to_string()
            } else {
                format!("🚦 Rate limited ({})", details.join(", "))
            }
        }
        ErrorType::ContextOverflow => match meta.max_context_tokens {
            Some(max) => format!("📏 Context window exceeded (max {})", format_tokens(max)),
            None => "📏 Context window exceeded".to_string(),
        },
        ErrorType::AuthError => "🔒 Authentication failed, check your credentials".to_string(),
        ErrorType::Unknown => "⚠️ AI service error".to_string(),
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Compact token count: `950`, `128K`, `1.5M`.
pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.0}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Markdown body of the assistant message that reports a failed task.
pub fn format_error_as_message(text: &str, meta: &ErrorMeta) -> String {
    let mut parts = vec!["**⚠️ AI service error**\n".to_string()];

    match meta.error_type {
        ErrorType::RateLimit => {
            if let (Some(count), Some(secs)) = (meta.rate_limit_count, meta.rate_limit_seconds) {
                parts.push(format!(
                    "> 🚦 **Rate limit**: at most {count} requests every {secs}s"
                ));
            }
            if let Some(wait) = meta.wait_seconds {
                parts.push(format!("> ⏱️ **Wait**: retry in {wait}s"));
            }
            parts.push("\n💡 *Send the message again later, or switch to another model*".into());
        }
        ErrorType::ContextOverflow => {
            if let Some(max) = meta.max_context_tokens {
                parts.push(format!(
                    "> 📏 **Context window exceeded**: model maximum is {} tokens",
                    format_tokens(max)
                ));
            }
            if let Some(requested) = meta.requested_tokens {
                parts.push(format!(
                    "> 📊 **Requested**: {} tokens",
                    format_tokens(requested)
                ));
            }
            parts.push(
                "\n💡 *Delete some earlier messages, or switch to a model with a larger context*"
                    .into(),
            );
        }
        ErrorType::AuthError => {
            parts.push(
                "> 🔒 **Authentication failed**: check the provider credentials in settings".into(),
            );
        }
        ErrorType::Unknown => {
            parts.push(format!("```\n{}\n```", truncate_chars(text, MAX_RAW_ERROR_CHARS)));
        }
    }

    parts.join("\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_with_wait() {
        let meta = classify(
            "Rate limit exceeded, 10 per 60s, please wait 30 seconds",
            None,
        );
        assert_eq!(meta.error_type, ErrorType::RateLimit);
        assert_eq!(meta.rate_limit_count, Some(10));
        assert_eq!(meta.rate_limit_seconds, Some(60));
        assert_eq!(meta.wait_seconds, Some(30));
        assert_eq!(meta.rate_limit.as_deref(), Some("10 per 60s"));
        assert_eq!(meta.summary, "🚦 Rate limited (10 per 60s, wait 30s)");
    }

    #[test]
    fn context_overflow_with_requested() {
        let meta = classify(
            "This model's maximum context length is 128000 tokens, requested 150000 tokens",
            None,
        );
        assert_eq!(meta.error_type, ErrorType::ContextOverflow);
        assert_eq!(meta.max_context_tokens, Some(128_000));
        assert_eq!(meta.requested_tokens, Some(150_000));
        assert_eq!(meta.summary, "📏 Context window exceeded (max 128K)");
    }

    #[test]
    fn max_size_phrase() {
        let meta = classify("Request body too large for gpt-4o. Max size: 8000 tokens.", None);
        assert_eq!(meta.error_type, ErrorType::ContextOverflow);
        assert_eq!(meta.max_context_tokens, Some(8_000));
    }

    #[test]
    fn unit_rate_limit_is_normalised_to_seconds() {
        let meta = classify("Quota: 15 per 1 minute exceeded", None);
        assert_eq!(meta.error_type, ErrorType::RateLimit);
        assert_eq!(meta.rate_limit_count, Some(15));
        assert_eq!(meta.rate_limit_seconds, Some(60));
        assert_eq!(meta.rate_limit.as_deref(), Some("15 per 60s"));
    }

    #[test]
    fn auth_by_phrase_and_status() {
        assert_eq!(
            classify("401 Unauthorized: bad credentials", None).error_type,
            ErrorType::AuthError
        );
        let backend = BackendErrorMeta {
            status_code: Some(403),
            ..Default::default()
        };
        assert_eq!(
            classify("request failed", Some(&backend)).error_type,
            ErrorType::AuthError
        );
    }

    #[test]
    fn status_429_implies_rate_limit() {
        let backend = BackendErrorMeta {
            error_type: Some(ErrorType::Unknown),
            status_code: Some(429),
            ..Default::default()
        };
        let meta = classify("slow down", Some(&backend));
        assert_eq!(meta.error_type, ErrorType::RateLimit);
        assert_eq!(meta.summary, "🚦 Rate limited");
    }

    #[test]
    fn backend_fields_take_precedence() {
        let backend = BackendErrorMeta {
            error_type: Some(ErrorType::ContextOverflow),
            max_context_tokens: Some(64_000),
            wait_seconds: Some(5),
            ..Default::default()
        };
        let meta = classify(
            "Rate limit exceeded, 10 per 60s, please wait 30 seconds",
            Some(&backend),
        );
        assert_eq!(meta.error_type, ErrorType::ContextOverflow);
        assert_eq!(meta.max_context_tokens, Some(64_000));
        assert_eq!(meta.wait_seconds, Some(5));
        assert_eq!(meta.rate_limit_count, Some(10));
    }

    #[test]
    fn backend_unknown_does_not_mask_text_match() {
        let backend = BackendErrorMeta {
            error_type: Some(ErrorType::Unknown),
            ..Default::default()
        };
        let meta = classify("please wait 12 seconds", Some(&backend));
        assert_eq!(meta.error_type, ErrorType::RateLimit);
        assert_eq!(meta.wait_seconds, Some(12));
    }

    #[test]
    fn unrecognised_text_still_has_summary() {
        for text in ["", "segfault in tokenizer", "😵"] {
            let meta = classify(text, None);
            assert_eq!(meta.error_type, ErrorType::Unknown);
            assert!(!meta.summary.is_empty());
        }
    }

    #[test]
    fn format_tokens_units() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(128_000), "128K");
        assert_eq!(format_tokens(1_500_000), "1.5M");
    }

    #[test]
    fn unknown_error_message_truncates_raw_text() {
        let long = "é".repeat(400);
        let meta = classify(&long, None);
        let body = format_error_as_message(&long, &meta);
        assert!(body.starts_with("**⚠️ AI service error**"));
        assert!(body.contains(&format!("{}...", "é".repeat(300))));
        assert!(!body.contains(&"é".repeat(301)));
    }

    #[test]
    fn rate_limit_message_lists_details() {
        let text = "Rate limit exceeded, 10 per 60s, please wait 30 seconds";
        let body = format_error_as_message(text, &classify(text, None));
        assert!(body.contains("at most 10 requests every 60s"));
        assert!(body.contains("retry in 30s"));
        assert!(!body.contains("```"));
    }
}
