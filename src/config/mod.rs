//! Layered configuration (§10.3): CLI flag > TOML config file > built-in
//! default, with `SECRET_KEY` additionally overridable via an environment
//! variable so it need not be committed to a file or CLI history.

use crate::codec::WireFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SESSION_LIFETIME_SEC: u64 = 600;
const SECRET_KEY_ENV: &str = "URPC_SECRET_KEY";

/// `{data_dir}/config.toml` — every field is an optional override. A
/// missing file is not an error; every field then falls back to
/// CLI-or-built-in-default.
#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    port: Option<u16>,
    secret_key: Option<String>,
    enable_mgmt_api: Option<bool>,
    /// `0` means "disabled"; any other value enables session expiry with
    /// that many seconds of absolute lifetime.
    session_lifetime_sec: Option<u64>,
    wire_format: Option<String>,
    log: Option<String>,
    wifi_ssid: Option<String>,
    wifi_password: Option<String>,
    autostart_webrepl: Option<bool>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub secret_key: [u8; 16],
    pub enable_mgmt_api: bool,
    /// Absolute session lifetime, if enabled (§3, §9 open question: this
    /// is configuration-dependent and defaults to inactive).
    pub session_lifetime: Option<std::time::Duration>,
    pub wire_format: WireFormat,
    pub log: String,
    /// Bring-up-only fields for the out-of-scope Wi-Fi collaborator (§1);
    /// carried as inert configuration, never acted on by this crate.
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
    pub autostart_webrepl: bool,
}

impl Config {
    /// Builds config from CLI-supplied values plus the optional TOML file,
    /// highest priority first: CLI > env (secret key only) > TOML > default.
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        secret_key_hex: Option<String>,
        enable_mgmt_api: Option<bool>,
        session_lifetime_sec: Option<u64>,
        wire_format: Option<String>,
        log: Option<String>,
    ) -> Result<Self, crate::error::Error> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let enable_mgmt_api = enable_mgmt_api.or(toml.enable_mgmt_api).unwrap_or(false);

        let secret_key_hex = secret_key_hex
            .or_else(|| std::env::var(SECRET_KEY_ENV).ok())
            .or(toml.secret_key)
            .ok_or_else(|| {
                crate::error::Error::Config(format!(
                    "no secret key supplied (use --secret-key, ${SECRET_KEY_ENV}, or config.toml)"
                ))
            })?;
        let secret_key = parse_secret_key(&secret_key_hex)?;

        let lifetime_secs = session_lifetime_sec.or(toml.session_lifetime_sec);
        let session_lifetime = match lifetime_secs {
            None | Some(0) => None,
            Some(secs) => Some(std::time::Duration::from_secs(secs)),
        };

        let wire_format = wire_format
            .or(toml.wire_format)
            .map(|s| {
                s.parse::<WireFormat>()
                    .map_err(|e| crate::error::Error::Config(e.to_string()))
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            port,
            data_dir,
            secret_key,
            enable_mgmt_api,
            session_lifetime,
            wire_format,
            log,
            wifi_ssid: toml.wifi_ssid,
            wifi_password: toml.wifi_password,
            autostart_webrepl: toml.autostart_webrepl.unwrap_or(false),
        })
    }

    /// Default session lifetime when enforcement is turned on but no
    /// explicit duration is given (§3: "L defaults to 600s").
    pub fn default_session_lifetime_secs() -> u64 {
        DEFAULT_SESSION_LIFETIME_SEC
    }
}

fn parse_secret_key(hex_str: &str) -> Result<[u8; 16], crate::error::Error> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| crate::error::Error::Config(format!("secret key must be hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| crate::error::Error::Config("secret key must be exactly 16 bytes".into()))
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("urpcd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("urpcd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("urpcd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("urpcd");
        }
    }
    PathBuf::from(".urpcd")
}
