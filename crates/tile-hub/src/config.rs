use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarPosition {
    Top,
    Bottom,
    Left,
    Right,
}

impl BarPosition {
    pub const ALL: [BarPosition; 4] = [
        BarPosition::Top,
        BarPosition::Bottom,
        BarPosition::Left,
        BarPosition::Right,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BarPosition::Top => "top",
            BarPosition::Bottom => "bottom",
            BarPosition::Left => "left",
            BarPosition::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|position| position.as_str() == value)
    }
}

impl fmt::Display for BarPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarConfig {
    pub position: BarPosition,
    #[serde(default = "default_bar_size")]
    pub size: u32,
    #[serde(default)]
    pub widgets: Vec<String>,
}

fn default_bar_size() -> u32 {
    24
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub bars: Vec<BarConfig>,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            bars: Vec::new(),
        }
    }
}

/// Window-manager layout loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WmConfig {
    pub groups: Vec<String>,
    pub layouts: Vec<String>,
    pub screens: Vec<ScreenConfig>,
    pub event_log_capacity: usize,
}

impl Default for WmConfig {
    fn default() -> Self {
        Self {
            groups: vec!["a".to_string(), "b".to_string()],
            layouts: vec!["max".to_string()],
            screens: vec![ScreenConfig::default()],
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config defines no groups")]
    NoGroups,
    #[error("config defines no layouts")]
    NoLayouts,
    #[error("config defines no screens")]
    NoScreens,
    #[error("{screens} screens need at least as many groups, got {groups}")]
    TooManyScreens { screens: usize, groups: usize },
    #[error("duplicate group name '{0}'")]
    DuplicateGroup(String),
    #[error("screen {screen} has more than one {position} bar")]
    DuplicateBar { screen: usize, position: BarPosition },
}

impl WmConfig {
    /// Reads `path`; a missing file yields the built-in default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: WmConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        if self.layouts.is_empty() {
            return Err(ConfigError::NoLayouts);
        }
        if self.screens.is_empty() {
            return Err(ConfigError::NoScreens);
        }
        if self.screens.len() > self.groups.len() {
            return Err(ConfigError::TooManyScreens {
                screens: self.screens.len(),
                groups: self.groups.len(),
            });
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if !seen.insert(group.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.clone()));
            }
        }

        for (screen, config) in self.screens.iter().enumerate() {
            let mut positions = HashSet::new();
            for bar in &config.bars {
                if !positions.insert(bar.position) {
                    return Err(ConfigError::DuplicateBar {
                        screen,
                        position: bar.position,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default_layout() {
        let config = WmConfig::from_toml("").expect("parse");
        assert_eq!(config, WmConfig::default());
        assert_eq!(config.groups, vec!["a", "b"]);
        assert_eq!(config.layouts, vec!["max"]);
        assert_eq!(config.screens.len(), 1);
        assert!(config.screens[0].bars.is_empty());
    }

    #[test]
    fn parses_screens_bars_and_widgets() {
        let config = WmConfig::from_toml(
            r#"
groups = ["web", "code", "chat"]
layouts = ["max", "columns"]
event_log_capacity = 8

[[screens]]
width = 2560
height = 1440

[[screens.bars]]
position = "top"
widgets = ["groupbox", "clock"]

[[screens]]
"#,
        )
        .expect("parse");
        assert_eq!(config.screens.len(), 2);
        assert_eq!(config.screens[0].bars[0].position, BarPosition::Top);
        assert_eq!(config.screens[0].bars[0].size, 24);
        assert_eq!(config.screens[0].bars[0].widgets, vec!["groupbox", "clock"]);
        assert_eq!(config.screens[1].width, 1920);
        assert_eq!(config.event_log_capacity, 8);
    }

    #[test]
    fn rejects_invalid_layouts() {
        assert!(matches!(
            WmConfig::from_toml("groups = []"),
            Err(ConfigError::NoGroups)
        ));
        assert!(matches!(
            WmConfig::from_toml("layouts = []"),
            Err(ConfigError::NoLayouts)
        ));
        assert!(matches!(
            WmConfig::from_toml("groups = [\"a\", \"a\"]"),
            Err(ConfigError::DuplicateGroup(name)) if name == "a"
        ));
        assert!(matches!(
            WmConfig::from_toml("groups = [\"a\"]\n[[screens]]\n[[screens]]\n"),
            Err(ConfigError::TooManyScreens { screens: 2, groups: 1 })
        ));
        assert!(matches!(
            WmConfig::from_toml(
                "[[screens]]\n[[screens.bars]]\nposition = \"top\"\n[[screens.bars]]\nposition = \"top\"\n"
            ),
            Err(ConfigError::DuplicateBar { screen: 0, position: BarPosition::Top })
        ));
        assert!(matches!(
            WmConfig::from_toml("groups = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let path = std::env::temp_dir().join("tile-hub-config-that-does-not-exist.toml");
        let config = WmConfig::load(&path).expect("default");
        assert_eq!(config, WmConfig::default());
    }
}
