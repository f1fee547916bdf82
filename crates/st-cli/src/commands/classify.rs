use st_core::error_classifier::{classify, format_tokens};
use st_types::ErrorType;

/// Classify an error message offline.
pub fn run(text: &str, json: bool) -> anyhow::Result<()> {
    let meta = classify(text, None);
    if json {
        println!("{}", serde_json::to_string_pretty(&meta)?);
        return Ok(());
    }

    println!("{}", meta.summary);
    println!("  type: {}", meta.error_type);
    match meta.error_type {
        ErrorType::RateLimit => {
            if let Some(limit) = &meta.rate_limit {
                println!("  limit: {limit}");
            }
            if let Some(wait) = meta.wait_seconds {
                println!("  retry after: {wait}s");
            }
        }
        ErrorType::ContextOverflow => {
            if let Some(max) = meta.max_context_tokens {
                println!("  max context: {} tokens", format_tokens(max));
            }
            if let Some(requested) = meta.requested_tokens {
                println!("  requested: {} tokens", format_tokens(requested));
            }
        }
        ErrorType::AuthError | ErrorType::Unknown => {}
    }
    Ok(())
}
