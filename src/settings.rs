// ============================================================================
// SETTINGS: default engine parameters persisted between runs
// ============================================================================

use std::path::PathBuf;

use crate::ops::inpaint::{DEFAULT_SEED, InpaintParams};

/// Persisted defaults. Command-line flags override every field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub patch_radius: u32,
    pub accuracy: u32,
    pub seed: u64,
    /// Worker threads; 0 uses the global rayon pool.
    pub threads: usize,
    /// Mask images: gray values at or above this mark a hole.
    pub mask_threshold: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            patch_radius: 2,
            accuracy: 50,
            seed: DEFAULT_SEED,
            threads: 0,
            mask_threshold: 1,
        }
    }
}

impl Settings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/smartpatch/smartpatch.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\SmartPatch\smartpatch.cfg
    /// On macOS:   ~/Library/Application Support/SmartPatch/smartpatch.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("SmartPatch").join("smartpatch.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("SmartPatch")
                    .join("smartpatch.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("smartpatch").join("smartpatch.cfg"))
        }
    }

    /// Engine parameters carried by these settings.
    pub fn params(&self) -> InpaintParams {
        InpaintParams {
            patch_radius: self.patch_radius,
            accuracy: self.accuracy,
            seed: self.seed,
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "patch_radius={}\n\
             accuracy={}\n\
             seed={}\n\
             threads={}\n\
             mask_threshold={}\n",
            self.patch_radius, self.accuracy, self.seed, self.threads, self.mask_threshold,
        )
    }

    /// Parse `key=value` lines over the defaults. Unknown keys and values
    /// that fail to parse leave the default in place.
    pub fn parse_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "patch_radius" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v >= 1
                    {
                        s.patch_radius = v;
                    }
                }
                "accuracy" => {
                    if let Ok(v) = val.parse() {
                        s.accuracy = v;
                    }
                }
                "seed" => {
                    if let Ok(v) = val.parse() {
                        s.seed = v;
                    }
                }
                "threads" => {
                    if let Ok(v) = val.parse() {
                        s.threads = v;
                    }
                }
                "mask_threshold" => {
                    if let Ok(v) = val.parse() {
                        s.mask_threshold = v;
                    }
                }
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or unreadable).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse_str(&content),
            Err(_) => Self::default(),
        }
    }
}
