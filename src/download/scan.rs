//! Incremental scanning of the download helper's output.

use regex::Regex;
use std::sync::LazyLock;

static OAUTH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://[^\s"'<>]*(?:oauth|device|activate)[^\s"'<>]*"#)
        .expect("valid oauth url pattern")
});

static USER_CODE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]user_code=([A-Za-z0-9-]+)").expect("valid user_code pattern"));

static AUTH_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:authori[sz]ation code|user code|enter (?:the )?code)\s*[:=]?\s*([A-Z0-9]{4,}(?:-[A-Z0-9]{4,})?)\b")
        .expect("valid auth code pattern")
});

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("valid percent pattern"));

static DOWNLOADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:downloading|download started|fetching)\b").expect("valid downloading pattern")
});

/// Something the helper reported.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperSignal {
    OauthUrl(String),
    OauthCode(String),
    /// The helper has moved past authentication and is transferring data
    Downloading,
    Progress(f32),
}

/// Stateful line scanner; the URL and code are each reported once per run.
#[derive(Debug, Default)]
pub struct HelperScanner {
    url: Option<String>,
    code: Option<String>,
    downloading: bool,
}

impl HelperScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Scan one output line.
    pub fn scan(&mut self, line: &str) -> Vec<HelperSignal> {
        let mut signals = Vec::new();

        if self.url.is_none() {
            if let Some(m) = OAUTH_URL.find(line) {
                let url = m.as_str().trim_end_matches(['.', ',', ')']).to_string();
                self.url = Some(url.clone());
                signals.push(HelperSignal::OauthUrl(url));
            }
        }

        if self.code.is_none() {
            let code = AUTH_CODE
                .captures(line)
                .or_else(|| USER_CODE_PARAM.captures(line))
                .map(|caps| caps[1].to_string());
            if let Some(code) = code {
                self.code = Some(code.clone());
                signals.push(HelperSignal::OauthCode(code));
            }
        }

        if !signals.is_empty() {
            return signals;
        }

        if !self.downloading && DOWNLOADING.is_match(line) {
            self.downloading = true;
            signals.push(HelperSignal::Downloading);
        }

        if let Some(caps) = PERCENT.captures(line) {
            if let Ok(percent) = caps[1].parse::<f32>() {
                if (0.0..=100.0).contains(&percent) {
                    if !self.downloading {
                        self.downloading = true;
                        signals.push(HelperSignal::Downloading);
                    }
                    signals.push(HelperSignal::Progress(percent));
                }
            }
        }

        signals
    }
}
