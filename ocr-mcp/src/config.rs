use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable set on the server process when it runs under the supervisor.
pub const SUPERVISED_ENV: &str = "OCR_MCP_SUPERVISED";

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ocr: OcrConfig,
    pub download: DownloadConfig,
    pub temp: TempConfig,
    pub supervisor: SupervisorConfig,
}

/// Which OCR engine backs the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Tesseract,
    Leptess,
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tesseract" => Ok(EngineKind::Tesseract),
            "leptess" => Ok(EngineKind::Leptess),
            other => Err(format!("unknown OCR engine '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub engine: EngineKind,
    pub tesseract_path: PathBuf,
    pub tessdata_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
    pub max_bytes: u64,
    pub user_agent: String,
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_bytes: 10 * 1024 * 1024,
            user_agent: format!("ocr-mcp/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TempConfig {
    /// Root directory for every temporary image. Release only ever deletes below it.
    pub root: PathBuf,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            root: env::temp_dir().join("ocr-mcp"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub server_binary: Option<PathBuf>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_restarts: usize,
    pub window_secs: u64,
    pub shutdown_grace_ms: u64,
}

impl SupervisorConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            server_binary: None,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_restarts: 5,
            window_secs: 60,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let download_defaults = DownloadConfig::default();
        let supervisor_defaults = SupervisorConfig::default();

        Self {
            ocr: OcrConfig {
                engine: parse_env_or("OCR_ENGINE", EngineKind::Tesseract),
                tesseract_path: env::var("OCR_TESSERACT_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("tesseract")),
                tessdata_dir: env::var("OCR_TESSDATA_DIR").ok().map(PathBuf::from),
            },
            download: DownloadConfig {
                timeout_secs: parse_env_or(
                    "OCR_DOWNLOAD_TIMEOUT_SECS",
                    download_defaults.timeout_secs,
                ),
                max_bytes: parse_env_or("OCR_DOWNLOAD_MAX_BYTES", download_defaults.max_bytes),
                user_agent: env::var("OCR_DOWNLOAD_USER_AGENT")
                    .unwrap_or(download_defaults.user_agent),
            },
            temp: TempConfig {
                root: parse_env_opt("OCR_TEMP_DIR").unwrap_or_else(|| TempConfig::default().root),
            },
            supervisor: SupervisorConfig {
                server_binary: parse_env_opt("OCR_SERVER_BINARY"),
                initial_delay_ms: parse_env_or(
                    "OCR_RESTART_INITIAL_DELAY_MS",
                    supervisor_defaults.initial_delay_ms,
                ),
                max_delay_ms: parse_env_or(
                    "OCR_RESTART_MAX_DELAY_MS",
                    supervisor_defaults.max_delay_ms,
                ),
                max_restarts: parse_env_or("OCR_MAX_RESTARTS", supervisor_defaults.max_restarts),
                window_secs: parse_env_or(
                    "OCR_RESTART_WINDOW_SECS",
                    supervisor_defaults.window_secs,
                ),
                shutdown_grace_ms: parse_env_or(
                    "OCR_SHUTDOWN_GRACE_MS",
                    supervisor_defaults.shutdown_grace_ms,
                ),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// True when the current process was launched by the supervisor.
pub fn is_supervised() -> bool {
    env::var(SUPERVISED_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "OCR_ENGINE",
        "OCR_TESSERACT_PATH",
        "OCR_DOWNLOAD_TIMEOUT_SECS",
        "OCR_DOWNLOAD_MAX_BYTES",
        "OCR_TEMP_DIR",
        "OCR_MAX_RESTARTS",
        "OCR_RESTART_WINDOW_SECS",
    ];

    fn clear_vars() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_vars();

        let config = Config::default();
        assert_eq!(config.ocr.engine, EngineKind::Tesseract);
        assert_eq!(config.ocr.tesseract_path, PathBuf::from("tesseract"));
        assert_eq!(config.download.timeout_secs, 30);
        assert_eq!(config.download.max_bytes, 10 * 1024 * 1024);
        assert!(config.temp.root.ends_with("ocr-mcp"));
        assert_eq!(config.supervisor.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.supervisor.max_delay(), Duration::from_secs(30));
        assert_eq!(config.supervisor.max_restarts, 5);
        assert_eq!(config.supervisor.window(), Duration::from_secs(60));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_vars();
        std::env::set_var("OCR_ENGINE", "leptess");
        std::env::set_var("OCR_DOWNLOAD_MAX_BYTES", "2048");
        std::env::set_var("OCR_TEMP_DIR", "/var/tmp/ocr-test");
        std::env::set_var("OCR_MAX_RESTARTS", "3");

        let config = Config::from_env();
        assert_eq!(config.ocr.engine, EngineKind::Leptess);
        assert_eq!(config.download.max_bytes, 2048);
        assert_eq!(config.temp.root, PathBuf::from("/var/tmp/ocr-test"));
        assert_eq!(config.supervisor.max_restarts, 3);

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        clear_vars();
        std::env::set_var("OCR_ENGINE", "abbyy");
        std::env::set_var("OCR_RESTART_WINDOW_SECS", "soon");

        let config = Config::from_env();
        assert_eq!(config.ocr.engine, EngineKind::Tesseract);
        assert_eq!(config.supervisor.window_secs, 60);

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_supervised_marker() {
        std::env::remove_var(SUPERVISED_ENV);
        assert!(!is_supervised());
        std::env::set_var(SUPERVISED_ENV, "1");
        assert!(is_supervised());
        std::env::remove_var(SUPERVISED_ENV);
    }
}
