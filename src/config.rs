use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sequencer::CountdownConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub display: DisplayConfig,
    pub recognizer: RecognizerConfig,
    pub capture: CaptureConfig,
    pub camera: CameraConfig,
    pub paths: PathConfig,
}

/// The viewport the live feed is rendered into; drives preview size
/// selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// A drawn gesture triggers a capture when a template scores strictly
    /// above this.
    pub match_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Delay between a matched gesture and the shutter.
    pub countdown_ms: u64,
    /// Visual countdown cues within the delay.
    pub countdown_steps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// JPEG quality (0-100)
    pub quality: u8,
    /// Use the simulated camera instead of the Pi camera stack.
    pub simulate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub save_dir: PathBuf,
    pub config_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: DisplayConfig {
                width: 800,
                height: 480,
                fullscreen: true,
            },
            recognizer: RecognizerConfig {
                match_threshold: 3.0,
            },
            capture: CaptureConfig {
                countdown_ms: 3000,
                countdown_steps: 3,
            },
            camera: CameraConfig {
                quality: 85,
                simulate: false,
            },
            paths: PathConfig {
                save_dir: PathBuf::from("gesture_photos"),
                config_file: PathBuf::from("gesturecam_config.toml"),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("gesturecam_config.toml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save()?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self =
            toml::from_str(&contents).with_context(|| "Failed to parse configuration file")?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(&self.paths.config_file)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow::anyhow!("Invalid display dimensions"));
        }

        if self.recognizer.match_threshold <= 0.0 {
            return Err(anyhow::anyhow!(
                "Match threshold must be positive, got {}",
                self.recognizer.match_threshold
            ));
        }

        if self.capture.countdown_steps == 0 {
            return Err(anyhow::anyhow!("Countdown needs at least one step"));
        }

        // Each step must be at least a millisecond long
        if self.capture.countdown_ms < self.capture.countdown_steps as u64 {
            return Err(anyhow::anyhow!(
                "Countdown of {}ms cannot be split into {} steps",
                self.capture.countdown_ms,
                self.capture.countdown_steps
            ));
        }

        if self.camera.quality > 100 {
            return Err(anyhow::anyhow!(
                "JPEG quality must be 0-100, got {}",
                self.camera.quality
            ));
        }

        Ok(())
    }

    pub fn countdown(&self) -> CountdownConfig {
        CountdownConfig::new(
            Duration::from_millis(self.capture.countdown_ms),
            self.capture.countdown_steps,
        )
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.display.width, self.display.height)
    }
}

// Configuration builder for easier setup
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn display_size(mut self, width: u32, height: u32) -> Self {
        self.config.display.width = width;
        self.config.display.height = height;
        self
    }

    pub fn match_threshold(mut self, threshold: f64) -> Self {
        self.config.recognizer.match_threshold = threshold;
        self
    }

    pub fn countdown(mut self, total_ms: u64, steps: u32) -> Self {
        self.config.capture.countdown_ms = total_ms;
        self.config.capture.countdown_steps = steps;
        self
    }

    pub fn simulate_camera(mut self, enabled: bool) -> Self {
        self.config.camera.simulate = enabled;
        self
    }

    pub fn save_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.save_dir = dir;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Environment-specific configuration presets
impl Config {
    pub fn raspberry_pi_7inch() -> Self {
        Config {
            display: DisplayConfig {
                width: 800,
                height: 480,
                fullscreen: true,
            },
            ..Default::default()
        }
    }

    pub fn raspberry_pi_hdmi() -> Self {
        Config {
            display: DisplayConfig {
                width: 1920,
                height: 1080,
                fullscreen: true,
            },
            ..Default::default()
        }
    }

    pub fn development_desktop() -> Self {
        Config {
            display: DisplayConfig {
                width: 1024,
                height: 768,
                fullscreen: false,
            },
            camera: CameraConfig {
                simulate: true,
                ..Config::default().camera
            },
            ..Default::default()
        }
    }
}
