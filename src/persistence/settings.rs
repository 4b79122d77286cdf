use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::prompt::pipeline::FailurePolicy;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    // If None, use OS default autosave directory
    #[serde(default)]
    pub autosave_override: Option<PathBuf>,
    // If None, item server traffic logs go to OS temp dir
    #[serde(default)]
    pub api_log_override: Option<PathBuf>,
    // Text generation service
    #[serde(default = "AppSettings::default_model")]
    pub generation_model: String,
    #[serde(default = "AppSettings::default_generation_endpoint")]
    pub generation_endpoint: String,
    // Falls back to $GEMINI_API_KEY when unset
    #[serde(default)]
    pub generation_api_key: Option<String>,
    // Item store the transcript is archived to
    #[serde(default = "AppSettings::default_store_url")]
    pub store_url: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    // Embedded item store (actix)
    #[serde(default)]
    pub api_enabled: bool,
    #[serde(default = "AppSettings::default_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "AppSettings::default_port")]
    pub api_port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            autosave_override: None,
            api_log_override: None,
            generation_model: Self::default_model(),
            generation_endpoint: Self::default_generation_endpoint(),
            generation_api_key: None,
            store_url: Self::default_store_url(),
            failure_policy: FailurePolicy::default(),
            api_enabled: false,
            api_bind_addr: Self::default_bind_addr(),
            api_port: Self::default_port(),
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        // Cross-platform user config dir
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/iaGram
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("iaGram");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\iaGram
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("iaGram");
            }
            return PathBuf::from("iaGram");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/iaGram or ~/.config/iaGram
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("iaGram");
            }
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("iaGram");
        }
    }

    fn autosave_default_dir() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            // %LOCALAPPDATA%\iaGram\Autosave else TEMP
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("iaGram").join("Autosave");
            }
            return std::env::temp_dir().join("iaGram");
        }
        #[cfg(not(target_os = "windows"))]
        {
            // $XDG_STATE_HOME/iagram or ~/.local/state/iagram, else {temp}/iaGram
            if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
                return PathBuf::from(xdg).join("iagram");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".local").join("state").join("iagram");
            }
            return std::env::temp_dir().join("iaGram");
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_dir().join("settings.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut f = std::fs::File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        Self::from_json(&s)
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join("settings.json");
        let s = serde_json::to_string_pretty(self)?;
        let mut f = std::fs::File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn autosave_dir(&self) -> PathBuf {
        if let Some(p) = &self.autosave_override { return p.clone(); }
        Self::autosave_default_dir()
    }

    /// Return the directory where the settings file (settings.json) is stored.
    pub fn settings_dir() -> PathBuf {
        Self::config_dir()
    }

    pub(crate) fn default_model() -> String { "gemini-1.5-flash".to_string() }
    pub(crate) fn default_generation_endpoint() -> String { "https://generativelanguage.googleapis.com".to_string() }
    pub(crate) fn default_store_url() -> String { "http://localhost:8000".to_string() }
    pub(crate) fn default_bind_addr() -> String { "127.0.0.1".to_string() }
    pub(crate) fn default_port() -> u16 { 8000 }

    /// Configured key, else the environment. Blank values count as unset.
    pub fn generation_api_key(&self) -> Option<String> {
        self.generation_api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn api_endpoint(&self) -> String {
        format!("{}:{}", self.api_bind_addr, self.api_port)
    }

    /// Default API log directory when no override is set: OS temporary directory.
    /// Example: {temp_dir}/iaGram/api-logs
    pub fn api_log_default_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push("iaGram");
        p.push("api-logs");
        p
    }

    pub fn api_log_dir(&self) -> PathBuf {
        if let Some(p) = &self.api_log_override { return p.clone(); }
        Self::api_log_default_dir()
    }
}
