//! Persisted configuration for the ambient background renderer.
//!
//! Two independent keys live in the host's preference store:
//! - `immersive.enabled`: the runtime on/off switch (defaults to enabled).
//! - `immersive.config`: a JSON object merged shallowly over
//!   [`ImmersiveConfig::default`] on every read.
//!
//! Anything missing or unparsable falls back to the built-in defaults so a
//! corrupted preference file can never keep the renderer from starting.

mod store;

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use store::{JsonFileStore, MemoryStore, PreferenceStore};

/// Store key holding the runtime enable flag.
pub const ENABLED_KEY: &str = "immersive.enabled";
/// Store key holding the serialized [`ImmersiveConfig`].
pub const CONFIG_KEY: &str = "immersive.config";

pub const MAX_TARGET_FPS: u32 = 240;
pub const MAX_BLUR_RADIUS: f32 = 64.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to access preference file {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the ambient renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmersiveConfig {
    /// Frame cap for the render loop.
    pub target_fps: u32,
    /// Strength of the slow drift/zoom applied to the artwork, `0.0..=1.0`.
    pub motion_intensity: f32,
    /// Suspend the render loop entirely while the surface is hidden.
    pub pause_when_hidden: bool,
    /// Draw the frame-rate bar along the top edge.
    pub debug_overlay: bool,
    /// Crossfade between successive artwork; zero swaps instantly.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub crossfade: Duration,
    /// Gaussian sigma (in pixels of the downscaled artwork) applied before upload.
    pub blur_radius: f32,
}

impl Default for ImmersiveConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            motion_intensity: 0.5,
            pause_when_hidden: true,
            debug_overlay: false,
            crossfade: Duration::ZERO,
            blur_radius: 18.0,
        }
    }
}

impl ImmersiveConfig {
    /// Merges a stored JSON object shallowly over the defaults.
    ///
    /// Keys absent from `stored` keep their default; unknown keys are ignored.
    /// A known key whose value does not parse keeps its default without
    /// discarding the other stored keys.
    pub fn merge_over_defaults(stored: &Value) -> Result<Self, ConfigError> {
        let overlay = stored.as_object().ok_or_else(|| {
            ConfigError::Invalid(format!("expected a JSON object, found {stored}"))
        })?;
        let Value::Object(mut fields) = serde_json::to_value(Self::default())? else {
            return Err(ConfigError::Invalid("defaults did not serialize to an object".into()));
        };
        for (key, value) in overlay {
            if !fields.contains_key(key) {
                continue;
            }
            let mut candidate = fields.clone();
            candidate.insert(key.clone(), value.clone());
            match serde_json::from_value::<Self>(Value::Object(candidate)) {
                Ok(_) => {
                    fields.insert(key.clone(), value.clone());
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "ignoring unparsable stored value");
                }
            }
        }
        let config: Self = serde_json::from_value(Value::Object(fields))?;
        Ok(config.validated())
    }

    /// Clamps every field into its supported range.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        self.target_fps = self.target_fps.clamp(1, MAX_TARGET_FPS);
        self.motion_intensity = if self.motion_intensity.is_finite() {
            self.motion_intensity.clamp(0.0, 1.0)
        } else {
            defaults.motion_intensity
        };
        self.blur_radius = if self.blur_radius.is_finite() {
            self.blur_radius.clamp(0.0, MAX_BLUR_RADIUS)
        } else {
            defaults.blur_radius
        };
        self
    }
}

/// Partial update applied through the facade's `set_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub target_fps: Option<u32>,
    pub motion_intensity: Option<f32>,
    pub pause_when_hidden: Option<bool>,
    pub debug_overlay: Option<bool>,
    #[serde(deserialize_with = "deserialize_duration_opt")]
    pub crossfade: Option<Duration>,
    pub blur_radius: Option<f32>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `base` with every field present in the patch replaced.
    pub fn apply(&self, base: &ImmersiveConfig) -> ImmersiveConfig {
        ImmersiveConfig {
            target_fps: self.target_fps.unwrap_or(base.target_fps),
            motion_intensity: self.motion_intensity.unwrap_or(base.motion_intensity),
            pause_when_hidden: self.pause_when_hidden.unwrap_or(base.pause_when_hidden),
            debug_overlay: self.debug_overlay.unwrap_or(base.debug_overlay),
            crossfade: self.crossfade.unwrap_or(base.crossfade),
            blur_radius: self.blur_radius.unwrap_or(base.blur_radius),
        }
        .validated()
    }
}

/// Reads the runtime enable flag; absent or unparsable values mean enabled.
pub fn load_enabled(store: &dyn PreferenceStore) -> bool {
    match store.get(ENABLED_KEY) {
        None => true,
        Some(Value::Bool(enabled)) => enabled,
        Some(Value::String(raw)) => match raw.trim().to_ascii_lowercase().as_str() {
            "false" | "0" | "off" | "no" => false,
            "true" | "1" | "on" | "yes" => true,
            other => {
                tracing::warn!(value = other, "unrecognised {ENABLED_KEY} value; assuming enabled");
                true
            }
        },
        Some(other) => {
            tracing::warn!(value = %other, "unrecognised {ENABLED_KEY} value; assuming enabled");
            true
        }
    }
}

/// Reads the stored config, merged over defaults.
pub fn load_config(store: &dyn PreferenceStore) -> ImmersiveConfig {
    let Some(stored) = store.get(CONFIG_KEY) else {
        return ImmersiveConfig::default();
    };
    match ImmersiveConfig::merge_over_defaults(&stored) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "stored {CONFIG_KEY} is unusable; using defaults");
            ImmersiveConfig::default()
        }
    }
}

pub fn save_enabled(store: &mut dyn PreferenceStore, enabled: bool) -> Result<(), ConfigError> {
    store.set(ENABLED_KEY, Value::Bool(enabled))
}

pub fn save_config(
    store: &mut dyn PreferenceStore,
    config: &ImmersiveConfig,
) -> Result<(), ConfigError> {
    store.set(CONFIG_KEY, serde_json::to_value(config)?)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer).map(|d| d.unwrap_or(Duration::ZERO))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as milliseconds or a human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v.trim())
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v / 1000.0)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}
