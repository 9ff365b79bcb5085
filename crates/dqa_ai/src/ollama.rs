use dqa_core::error::AppError;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

impl OllamaClient {
    /// Create a client for Ollama. This is strictly limited to `127.0.0.1`.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !is_loopback_base_url(&base_url) {
            return Err(AppError::new(
                "AI_REMOTE_NOT_ALLOWED",
                "Ollama base URL must be localhost (127.0.0.1)",
            )
            .with_details(format!("base_url={base_url}")));
        }
        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url)
            .timeout(std::time::Duration::from_millis(800))
            .call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(
                AppError::new("AI_OLLAMA_UNHEALTHY", "Ollama health check failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(AppError::new(
                "AI_OLLAMA_UNREACHABLE",
                "Failed to reach Ollama on 127.0.0.1",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}

/// `http://127.0.0.1` with an optional non-zero port and nothing else.
pub(crate) fn is_loopback_base_url(base_url: &str) -> bool {
    let Some(rest) = base_url.strip_prefix("http://127.0.0.1") else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let Some(port) = rest.strip_prefix(':') else {
        return false;
    };
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    matches!(port.parse::<u16>(), Ok(p) if p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_plain_loopback_urls_are_accepted() {
        let cases = [
            ("http://127.0.0.1:11434", true),
            ("http://127.0.0.1", true),
            ("http://127.0.0.1:11434/", true),
            ("http://localhost:11434", false),
            ("http://[::1]:11434", false),
            ("https://api.deepseek.com", false),
            ("http://127.0.0.1.attacker.net:11434", false),
            ("http://127.0.0.1@attacker.net", false),
            ("http://127.0.0.1:", false),
            ("http://127.0.0.1:0", false),
            ("http://127.0.0.1:70000", false),
            ("http://127.0.0.1:11434/v1", false),
        ];
        for (url, ok) in cases {
            let got = OllamaClient::new(url);
            assert_eq!(got.is_ok(), ok, "{url}");
            if let Err(e) = got {
                assert_eq!(e.code, "AI_REMOTE_NOT_ALLOWED");
            }
        }
    }

    #[test]
    fn base_url_is_trimmed() {
        let c = OllamaClient::new("  http://127.0.0.1:11434/ ").expect("client");
        assert_eq!(c.base_url(), "http://127.0.0.1:11434");
    }
}
