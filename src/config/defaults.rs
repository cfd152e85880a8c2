//! Default values for configuration

/// Default request timeout in seconds
pub fn default_fetch_timeout() -> u64 {
    15
}

/// Default user agent
pub fn default_fetch_user_agent() -> String {
    format!("horizons/{} (Followee Archiver)", env!("CARGO_PKG_VERSION"))
}

/// Default cap on stored body length, in characters
pub fn default_max_body_chars() -> usize {
    20_000
}

/// Default number of sources fetched concurrently
pub fn default_fetch_concurrency() -> usize {
    4
}

/// Default: no retries within a run
pub fn default_fetch_retries() -> u32 {
    0
}

/// Default pause between retry attempts (milliseconds)
pub fn default_retry_backoff_ms() -> u64 {
    500
}

/// Default rate limit (requests per second per host)
pub fn default_fetch_rate_limit() -> f64 {
    2.0
}

/// Default chat-completions endpoint
pub fn default_summarizer_api_url() -> String {
    std::env::var("HORIZONS_SUMMARIZER_URL")
        .unwrap_or_else(|_| "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string())
}

/// Default summarizer model
pub fn default_summarizer_model() -> String {
    "glm-4-plus".to_string()
}

/// Default environment variable name for the summarizer API key
pub fn default_summarizer_api_key_env() -> String {
    "GLM_API_KEY".to_string()
}

/// Default summarizer request timeout in seconds
pub fn default_summarizer_timeout() -> u64 {
    60
}

/// Default cap on characters sent to the summarizer
pub fn default_summarizer_max_input_chars() -> usize {
    12_000
}

/// Default sampling temperature
pub fn default_summarizer_temperature() -> f32 {
    0.3
}

/// Default summarizer request budget
pub fn default_summarizer_requests_per_minute() -> u32 {
    20
}

/// Default SMTP relay
pub fn default_smtp_host() -> String {
    "smtp.qq.com".to_string()
}

/// Default SMTP port (implicit TLS)
pub fn default_smtp_port() -> u16 {
    465
}

/// Default environment variable name for the SMTP password
pub fn default_smtp_password_env() -> String {
    "HORIZONS_SMTP_PASSWORD".to_string()
}

/// Default subject prefix for digest emails
pub fn default_subject_prefix() -> String {
    "[Horizons]".to_string()
}

/// Default digest window in days
pub fn default_history_days() -> u32 {
    7
}

/// Default maximum items in one digest
pub fn default_digest_max_items() -> usize {
    50
}
