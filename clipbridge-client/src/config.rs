use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clipbridge_core::{OriginTag, ViewId};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::transfer::TRANSFER_TIMEOUT;

pub const CONFIG_DIR_ENV: &str = "CLIPBRIDGE_CONFIG_DIR";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CONSENT_FILE_NAME: &str = "consent.json";

const MAX_WEBSERVER_LEN: usize = 2048;
const MAX_DOC_LEN: usize = 4096;
const MAX_ID_LEN: usize = 128;
const MAX_USER_NAME_LEN: usize = 256;
const MIN_TRANSFER_TIMEOUT_MS: u64 = 100;
const MAX_TRANSFER_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// What a controller needs to know about the editing session it serves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Scheme and authority of the editing server, e.g. `https://office:9980`.
    pub webserver: String,
    #[serde(default)]
    pub service_root: String,
    /// Document identifier (the WOPI source URL).
    pub doc: String,
    pub server_id: String,
    #[serde(default)]
    pub view_id: ViewId,
    pub user_name: String,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default = "default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_transfer_timeout_ms() -> u64 {
    TRANSFER_TIMEOUT.as_millis() as u64
}

fn default_lang() -> String {
    "en-US".to_owned()
}

impl SessionConfig {
    pub fn new(
        webserver: impl Into<String>,
        doc: impl Into<String>,
        server_id: impl Into<String>,
        view_id: ViewId,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            webserver: webserver.into(),
            service_root: String::new(),
            doc: doc.into(),
            server_id: server_id.into(),
            view_id,
            user_name: user_name.into(),
            mobile: false,
            transfer_timeout_ms: default_transfer_timeout_ms(),
            lang: default_lang(),
        }
    }

    /// `webserver + service_root`: the prefix every clipboard endpoint URL of
    /// this session starts with.
    pub fn meta_base(&self) -> String {
        format!(
            "{}{}",
            self.webserver.trim_end_matches('/'),
            self.service_root
        )
    }

    pub fn origin(&self, access_key: &str) -> OriginTag {
        OriginTag {
            base: self.meta_base(),
            document_id: self.doc.clone(),
            server_id: self.server_id.clone(),
            view_id: self.view_id,
            access_key: access_key.to_owned(),
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut errors: Vec<String> = Vec::new();

        let webserver = self.webserver.trim();
        if webserver.is_empty() {
            errors.push("Webserver URL is required.".to_string());
        } else if webserver.len() > MAX_WEBSERVER_LEN {
            errors.push(format!(
                "Webserver URL is too long ({} > {} chars).",
                webserver.len(),
                MAX_WEBSERVER_LEN
            ));
        } else {
            match Url::parse(webserver) {
                Ok(url) => {
                    let scheme = url.scheme();
                    if scheme != "http" && scheme != "https" {
                        errors.push("Webserver URL must start with http:// or https://.".to_string());
                    }
                }
                Err(err) => errors.push(format!("Webserver URL is invalid: {err}")),
            }
        }

        if !self.service_root.is_empty() && !self.service_root.starts_with('/') {
            errors.push("Service root must start with '/'.".to_string());
        }

        check_required(&mut errors, "Document", &self.doc, MAX_DOC_LEN);
        check_required(&mut errors, "Server id", &self.server_id, MAX_ID_LEN);
        check_required(&mut errors, "User name", &self.user_name, MAX_USER_NAME_LEN);

        if !(MIN_TRANSFER_TIMEOUT_MS..=MAX_TRANSFER_TIMEOUT_MS).contains(&self.transfer_timeout_ms)
        {
            errors.push(format!(
                "Transfer timeout must be between {MIN_TRANSFER_TIMEOUT_MS} and {MAX_TRANSFER_TIMEOUT_MS} ms."
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "Please fix the following:\n\n- {}",
                errors.join("\n- ")
            ))
        }
    }
}

fn check_required(errors: &mut Vec<String>, label: &str, value: &str, max: usize) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(format!("{label} is required."));
    } else if value.len() > max {
        errors.push(format!(
            "{label} is too long ({} > {max} chars).",
            value.len()
        ));
    }
}

pub fn config_dir() -> PathBuf {
    let dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(override_dir) => PathBuf::from(override_dir),
        None => std::env::var_os("LOCALAPPDATA")
            .or_else(|| std::env::var_os("XDG_DATA_HOME"))
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ClipBridge"),
    };
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

pub fn load_config_from_path(path: &Path) -> Result<Option<SessionConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config file {}: {err}", path.display()))?;
    let cfg: SessionConfig = serde_json::from_str(&data)
        .map_err(|err| format!("failed to parse config file {}: {err}", path.display()))?;

    cfg.validate()?;
    Ok(Some(cfg))
}

pub fn load_config() -> Result<Option<SessionConfig>, String> {
    load_config_from_path(&config_path())
}

pub fn save_config_to_path(path: &Path, cfg: &SessionConfig) -> Result<(), String> {
    cfg.validate()?;

    let tmp_path = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(cfg).map_err(|err| err.to_string())?;
    fs::write(&tmp_path, payload.as_bytes())
        .map_err(|err| format!("failed to write {}: {err}", tmp_path.display()))?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp_path, path)
        .map_err(|err| format!("failed to move config into place {}: {err}", path.display()))
}
