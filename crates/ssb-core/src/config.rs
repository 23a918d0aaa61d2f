use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::warn;

use crate::{errors::Error, Result};

/// How updates reach the bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    /// Long-polling `getUpdates`.
    Polling,
    /// Telegram pushes to `{base_url}/webhook`.
    Webhook { base_url: String },
}

/// Typed configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub users_file: PathBuf,

    // Ingestion
    pub use_webhook: bool,
    pub webhook_url: Option<String>,
    pub port: u16,
    pub webhook_rate_limit: u32,
    pub webhook_rate_window: Duration,
    pub webhook_queue_size: usize,
    pub update_workers: usize,
    pub shutdown_grace: Duration,

    // Story service
    pub story_api_url: Option<String>,
    pub story_api_key: Option<String>,
    pub story_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (tests, embedding).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = get("BOT_TOKEN").unwrap_or_default().trim().to_string();
        if bot_token.is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let users_file = PathBuf::from(
            get("USERS_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "users.json".to_string()),
        );

        let use_webhook = get("USE_WEBHOOK").map(|s| parse_bool(&s)).unwrap_or(false);
        let webhook_url = get("WEBHOOK_URL")
            .and_then(non_empty)
            .map(|s| s.trim().trim_end_matches('/').to_string());
        let port = parse_num::<u16>(&get, "PORT")?.unwrap_or(5005);

        let webhook_rate_limit = parse_num::<u32>(&get, "WEBHOOK_RATE_LIMIT")?
            .unwrap_or(5)
            .max(1);
        let webhook_rate_window = Duration::from_millis(
            parse_num::<u64>(&get, "WEBHOOK_RATE_WINDOW_MS")?.unwrap_or(1000),
        );
        let webhook_queue_size = parse_num::<usize>(&get, "WEBHOOK_QUEUE_SIZE")?
            .unwrap_or(256)
            .max(1);
        let update_workers = parse_num::<usize>(&get, "UPDATE_WORKERS")?.unwrap_or(4).max(1);
        let shutdown_grace = Duration::from_millis(
            parse_num::<u64>(&get, "SHUTDOWN_GRACE_MS")?.unwrap_or(5000),
        );

        let story_api_url = get("STORY_API_URL")
            .and_then(non_empty)
            .map(|s| s.trim().trim_end_matches('/').to_string());
        let story_api_key = get("STORY_API_KEY").and_then(non_empty);
        let story_timeout = Duration::from_millis(
            parse_num::<u64>(&get, "STORY_TIMEOUT_MS")?.unwrap_or(30_000),
        );

        Ok(Self {
            bot_token,
            users_file,
            use_webhook,
            webhook_url,
            port,
            webhook_rate_limit,
            webhook_rate_window,
            webhook_queue_size,
            update_workers,
            shutdown_grace,
            story_api_url,
            story_api_key,
            story_timeout,
        })
    }

    /// Webhook mode needs both the flag and a URL; otherwise poll.
    pub fn mode(&self) -> UpdateMode {
        match (self.use_webhook, &self.webhook_url) {
            (true, Some(url)) => UpdateMode::Webhook {
                base_url: url.clone(),
            },
            (true, None) => {
                warn!("USE_WEBHOOK is set but WEBHOOK_URL is not; falling back to polling mode");
                UpdateMode::Polling
            }
            (false, _) => UpdateMode::Polling,
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }
        out.push((key.to_string(), val.to_string()));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = get(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a number, got {raw:?}")))
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(cfg(&[]), Err(Error::Config(_))));
        assert!(matches!(cfg(&[("BOT_TOKEN", "  ")]), Err(Error::Config(_))));
    }

    #[test]
    fn defaults_apply() {
        let c = cfg(&[("BOT_TOKEN", "123:abc")]).unwrap();
        assert_eq!(c.port, 5005);
        assert_eq!(c.users_file, PathBuf::from("users.json"));
        assert_eq!(c.webhook_rate_limit, 5);
        assert_eq!(c.webhook_rate_window, Duration::from_secs(1));
        assert_eq!(c.update_workers, 4);
        assert!(c.story_api_url.is_none());
        assert_eq!(c.mode(), UpdateMode::Polling);
    }

    #[test]
    fn webhook_needs_flag_and_url() {
        let c = cfg(&[
            ("BOT_TOKEN", "t"),
            ("USE_WEBHOOK", "TRUE"),
            ("WEBHOOK_URL", "https://bot.example.com/"),
        ])
        .unwrap();
        assert_eq!(
            c.mode(),
            UpdateMode::Webhook {
                base_url: "https://bot.example.com".to_string()
            }
        );

        let no_url = cfg(&[("BOT_TOKEN", "t"), ("USE_WEBHOOK", "true")]).unwrap();
        assert_eq!(no_url.mode(), UpdateMode::Polling);

        let no_flag = cfg(&[("BOT_TOKEN", "t"), ("WEBHOOK_URL", "https://x")]).unwrap();
        assert_eq!(no_flag.mode(), UpdateMode::Polling);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let c = cfg(&[
            ("BOT_TOKEN", "t"),
            ("WEBHOOK_RATE_LIMIT", "0"),
            ("WEBHOOK_QUEUE_SIZE", "0"),
            ("UPDATE_WORKERS", "0"),
        ])
        .unwrap();
        assert_eq!(c.webhook_rate_limit, 1);
        assert_eq!(c.webhook_queue_size, 1);
        assert_eq!(c.update_workers, 1);
    }

    #[test]
    fn bad_numbers_are_config_errors() {
        let err = cfg(&[("BOT_TOKEN", "t"), ("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn dotenv_parsing() {
        let parsed = parse_dotenv(
            "# comment\nBOT_TOKEN=\"abc\"\nexport PORT=8080\n\nNOEQUALS\nEMPTY=\nQ='x y'\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("BOT_TOKEN".to_string(), "abc".to_string()),
                ("PORT".to_string(), "8080".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("Q".to_string(), "x y".to_string()),
            ]
        );
    }
}
