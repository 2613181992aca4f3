//! HTTP request journal for control-plane calls
//!
//! Appends every control-plane request/response to a file when enabled via
//! environment variable. Set `UPLOAD_ENGINE_HTTP_LOG=1` (or `true`/`yes`/`on`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use tracing::warn;

/// Environment variable to control HTTP logging
pub const ENV_HTTP_LOG: &str = "UPLOAD_ENGINE_HTTP_LOG";

/// Default journal directory, relative to the working directory
pub const DEFAULT_LOG_DIR: &str = ".upload-engine";

const LOG_FILE_NAME: &str = "http_requests.log";

/// Maximum body size to log (10KB)
pub const MAX_BODY_SIZE: usize = 10000;

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "set-cookie",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
];

static LOG_MUTEX: Mutex<()> = Mutex::new(());

/// Check if HTTP logging is enabled (read once per process)
pub fn is_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var(ENV_HTTP_LOG)
            .map(|v| parse_flag(&v))
            .unwrap_or(false)
    })
}

/// Interpret an on/off flag value
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Journal path inside `log_dir`, creating the directory if needed
pub fn log_file_path(log_dir: Option<&Path>) -> PathBuf {
    let dir = log_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    if !dir.exists() {
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create HTTP log directory {}: {}", dir.display(), e);
        }
    }
    dir.join(LOG_FILE_NAME)
}

/// Outbound request as recorded in the journal
#[derive(Debug, Clone)]
pub struct HttpRequestLog {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Response as recorded in the journal
#[derive(Debug, Clone)]
pub struct HttpResponseLog {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Append one exchange to the journal if logging is enabled
pub fn log_request(
    log_dir: Option<&Path>,
    request: &HttpRequestLog,
    response: Option<&HttpResponseLog>,
    duration_ms: u64,
    error: Option<&str>,
) {
    if !is_enabled() {
        return;
    }
    let entry = render_entry(request, response, duration_ms, error);
    if let Err(e) = write_log(&log_file_path(log_dir), &entry) {
        warn!("Failed to write HTTP log: {}", e);
    }
}

/// Render one journal entry; sensitive headers are masked and bodies truncated
pub fn render_entry(
    request: &HttpRequestLog,
    response: Option<&HttpResponseLog>,
    duration_ms: u64,
    error: Option<&str>,
) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let separator = "=".repeat(80);

    let mut out = format!(
        "\n{}\n[{}] {} {}\n{}\n",
        separator, timestamp, request.method, request.url, separator
    );

    out.push_str("\n--- Request Headers ---\n");
    push_headers(&mut out, &request.headers);

    if let Some(body) = &request.body {
        out.push_str("\n--- Request Body ---\n");
        out.push_str(&format_body(body));
        out.push('\n');
    }

    if let Some(resp) = response {
        out.push_str(&format!("\n--- Response ({}ms) ---\n", duration_ms));
        out.push_str(&format!("Status: {}\n", resp.status));
        out.push_str("\n--- Response Headers ---\n");
        push_headers(&mut out, &resp.headers);
        if let Some(body) = &resp.body {
            out.push_str("\n--- Response Body ---\n");
            out.push_str(&format_body(body));
            out.push('\n');
        }
    }

    if let Some(err) = error {
        out.push_str(&format!("\n--- Error ({}ms) ---\n{}\n", duration_ms, err));
    }

    out.push_str(&format!("\n{}\n", separator));
    out
}

fn push_headers(out: &mut String, headers: &[(String, String)]) {
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\n", name, mask_sensitive_header(name, value)));
    }
}

fn write_log(path: &Path, content: &str) -> std::io::Result<()> {
    // Serialize appends from concurrent uploads
    let _guard = LOG_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(content.as_bytes())
}

pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_lowercase();
    SENSITIVE_HEADERS.iter().any(|h| name == *h)
}

pub fn mask_sensitive_header(name: &str, value: &str) -> String {
    if is_sensitive_header(name) {
        mask_token(value)
    } else {
        value.to_string()
    }
}

/// Keep the first and last four characters of a credential
pub fn mask_token(value: &str) -> String {
    let (prefix, token) = match value.strip_prefix("Bearer ") {
        Some(token) => ("Bearer ", token),
        None => ("", value),
    };
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}...{}", prefix, head, tail)
    } else {
        format!("{}****", prefix)
    }
}

/// Pretty-print JSON bodies, then truncate
pub fn format_body(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => {
            let pretty = serde_json::to_string_pretty(&json).unwrap_or_else(|_| body.to_string());
            truncate_utf8_safe(&pretty, MAX_BODY_SIZE)
        }
        Err(_) => truncate_utf8_safe(body, MAX_BODY_SIZE),
    }
}

/// Truncate at a UTF-8 character boundary
pub fn truncate_utf8_safe(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[truncated, total {} bytes]", &s[..end], s.len())
}

/// Collect response headers for the journal
pub fn extract_response_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect()
}
