use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub inbound: InboundSettings,
    #[serde(default)]
    pub repeat: RepeatSettings,
    #[serde(default)]
    pub editor: EditorSettings,
}

/// How to launch the external editing engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    pub command: String,
    pub args: Vec<String>,
    /// Lua chunk that applies an outbound batch inside the engine.
    pub handle_changes_lua: String,
    /// Lua chunk that wipes scratch buffers left over from repeat replays.
    pub cleanup_repeat_lua: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundSettings {
    /// Drains slower than this are reported at info level.
    pub slow_drain_warn_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepeatSettings {
    pub enabled: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Buffer variable marking scratch buffers used for repeat replay.
    pub buffer_var: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditorSettings {
    pub tab_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: "nvim".to_string(),
            args: vec!["--embed".to_string()],
            handle_changes_lua: "return require('bufsync.internal').handle_changes(...)".to_string(),
            cleanup_repeat_lua: "require'bufsync.internal'.delete_repeat_buffers(...)".to_string(),
        }
    }
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self { slow_drain_warn_ms: 1000 }
    }
}

impl Default for RepeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_width: 100,
            window_height: 100,
            buffer_var: "_bufsync_repeat_buffer".to_string(),
        }
    }
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self { tab_size: 4 }
    }
}

impl SyncSettings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bufsync")
            .join("config.toml")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Read settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = std::fs::read_to_string(path) {
                match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Ignoring invalid config {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> Result<(), crate::error::SyncError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), crate::error::SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::error::SyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.inbound.slow_drain_warn_ms, 1000);
        assert!(settings.repeat.enabled);
        assert_eq!(settings.repeat.window_width, 100);
        assert_eq!(settings.editor.tab_size, 4);
        assert_eq!(settings.engine.command, "nvim");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut settings = SyncSettings::default();
        settings.inbound.slow_drain_warn_ms = 250;
        settings.repeat.enabled = false;
        settings.save_to(&path).unwrap();

        let loaded = SyncSettings::load_from(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[editor]\ntab_size = 8\n").unwrap();

        let loaded = SyncSettings::load_from(&path);
        assert_eq!(loaded.editor.tab_size, 8);
        assert_eq!(loaded.repeat, RepeatSettings::default());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        assert_eq!(SyncSettings::load_from(&path), SyncSettings::default());
    }
}
