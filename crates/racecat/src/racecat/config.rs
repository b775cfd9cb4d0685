use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use directories::ProjectDirs;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "RACECAT_CONFIG";

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BUFFER_SIZE: usize = 512;
pub const MAX_BUFFER_SIZE: usize = 1 << 20;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

const CANDIDATES: [&str; 3] = ["racecat.toml", "racecat.yaml", "racecat.yml"];

#[derive(Debug, Clone)]
pub struct ResolvedConfigPath {
    pub path: PathBuf,
    pub source: ConfigPathSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPathSource {
    Flag,
    Env,
    Cwd,
    User,
}

impl std::fmt::Display for ConfigPathSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigPathSource::Flag => write!(f, "flag"),
            ConfigPathSource::Env => write!(f, "env"),
            ConfigPathSource::Cwd => write!(f, "cwd"),
            ConfigPathSource::User => write!(f, "user"),
        }
    }
}

/// Find the config file to load, if any.
///
/// Precedence: `--config`, then `RACECAT_CONFIG`, then `racecat.{toml,yaml,yml}` in the
/// working directory, then the per-user config dir. Returns `None` when nothing exists,
/// in which case built-in defaults apply.
pub fn resolve_config_path(
    explicit_flag_path: Option<PathBuf>,
) -> anyhow::Result<Option<ResolvedConfigPath>> {
    let user_dir =
        ProjectDirs::from("dev", "racecat", "racecat").map(|p| p.config_dir().to_path_buf());
    resolve_from(
        explicit_flag_path,
        std::env::var_os(CONFIG_ENV),
        Path::new("."),
        user_dir.as_deref(),
    )
}

fn resolve_from(
    explicit_flag_path: Option<PathBuf>,
    env_path: Option<OsString>,
    cwd: &Path,
    user_dir: Option<&Path>,
) -> anyhow::Result<Option<ResolvedConfigPath>> {
    if let Some(p) = explicit_flag_path {
        return Ok(Some(ResolvedConfigPath {
            path: normalize_explicit_path(&p)?,
            source: ConfigPathSource::Flag,
        }));
    }

    // clap maps RACECAT_CONFIG into the flag already; this covers callers that bypass the CLI.
    if let Some(p) = env_path {
        if !p.is_empty() {
            return Ok(Some(ResolvedConfigPath {
                path: normalize_explicit_path(Path::new(&p))?,
                source: ConfigPathSource::Env,
            }));
        }
    }

    if let Some(p) = discover_config_path(cwd) {
        return Ok(Some(ResolvedConfigPath {
            path: p,
            source: ConfigPathSource::Cwd,
        }));
    }

    Ok(user_dir.and_then(discover_config_path).map(|path| ResolvedConfigPath {
        path,
        source: ConfigPathSource::User,
    }))
}

fn normalize_explicit_path(p: &Path) -> anyhow::Result<PathBuf> {
    if p.as_os_str().is_empty() {
        anyhow::bail!("config: empty config path");
    }

    let meta = fs::metadata(p).with_context(|| format!("config: stat {}", p.display()))?;
    if meta.is_dir() {
        return discover_config_path(p)
            .with_context(|| format!("config: no racecat.* found in {}", p.display()));
    }
    Ok(p.to_path_buf())
}

fn discover_config_path(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|c| dir.join(c))
        .find(|p| fs::metadata(p).map(|m| m.is_file()).unwrap_or(false))
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let s = String::from_utf8_lossy(&data);

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let fc: FileConfig = match ext.as_str() {
        "toml" => toml::from_str(&s).with_context(|| format!("parse toml {}", path.display()))?,
        "yaml" | "yml" => {
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml {}", path.display()))?
        }
        _ => anyhow::bail!(
            "config: unsupported config extension {:?} (expected .toml or .yaml/.yml)",
            ext
        ),
    };

    Config::from_file_config(fc)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub dial_timeout: Duration,
    pub buffer_size: usize,
    pub nodelay: bool,
    pub close_on_peer_eof: bool,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub add_source: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
            output: "stderr".into(),
            add_source: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            nodelay: true,
            close_on_peer_eof: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    logging: Option<FileLogging>,

    #[serde(default)]
    dial_timeout_ms: i64,

    #[serde(default)]
    buffer_size: i64,

    nodelay: Option<bool>,

    #[serde(default)]
    close_on_peer_eof: bool,

    shutdown_grace_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLogging {
    level: Option<String>,
    format: Option<String>,
    output: Option<String>,
    #[serde(default)]
    add_source: bool,
}

impl Config {
    fn from_file_config(fc: FileConfig) -> anyhow::Result<Config> {
        let mut cfg = Config {
            dial_timeout: Duration::from_millis(fc.dial_timeout_ms.max(0) as u64),
            buffer_size: fc.buffer_size.max(0) as usize,
            nodelay: fc.nodelay.unwrap_or(true),
            close_on_peer_eof: fc.close_on_peer_eof,
            shutdown_grace: fc
                .shutdown_grace_ms
                .map(|ms| Duration::from_millis(ms.max(0) as u64))
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE),
            ..Config::default()
        };

        if cfg.dial_timeout == Duration::from_millis(0) {
            cfg.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if cfg.buffer_size == 0 {
            cfg.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if cfg.buffer_size > MAX_BUFFER_SIZE {
            anyhow::bail!(
                "config: buffer_size {} exceeds the {} byte limit",
                cfg.buffer_size,
                MAX_BUFFER_SIZE
            );
        }

        if let Some(l) = &fc.logging {
            if let Some(level) = non_empty(&l.level) {
                cfg.logging.level = level;
            }
            if let Some(fmt) = non_empty(&l.format) {
                let fmt = fmt.to_ascii_lowercase();
                if fmt != "text" && fmt != "json" {
                    anyhow::bail!("config: logging.format {fmt:?} (expected text|json)");
                }
                cfg.logging.format = fmt;
            }
            if let Some(out) = non_empty(&l.output) {
                cfg.logging.output = out;
            }
            cfg.logging.add_source = l.add_source;
        }

        Ok(cfg)
    }
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
