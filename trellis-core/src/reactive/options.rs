//! Per-signal configuration.
//!
//! [`SignalOptions`] decides when a write counts as a change and whether the
//! signal releases itself once its last listener goes away. The plain-data
//! [`SignalConfig`] carries the serializable subset, for options that come
//! from a config file rather than from code.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Comparator deciding whether two values are the same.
pub type EqualsFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Options attached to a signal or derived signal.
pub struct SignalOptions<T> {
    pub(crate) equals: EqualsFn<T>,
    pub(crate) auto_dispose: bool,
}

impl<T: 'static> SignalOptions<T> {
    /// Options using a custom equality comparator.
    pub fn with_equals<F>(equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            equals: Arc::new(equals),
            auto_dispose: false,
        }
    }

    /// Options under which every write is treated as a change.
    pub fn always_notify() -> Self {
        Self::with_equals(|_, _| false)
    }

    /// Dispose the signal once its last listener is removed.
    pub fn auto_dispose(mut self, enabled: bool) -> Self {
        self.auto_dispose = enabled;
        self
    }

    pub fn is_auto_dispose(&self) -> bool {
        self.auto_dispose
    }

    /// Compare two values under this policy.
    pub fn is_equal(&self, a: &T, b: &T) -> bool {
        (self.equals)(a, b)
    }
}

impl<T: PartialEq + 'static> SignalOptions<T> {
    /// Default options: `PartialEq` equality, no auto-dispose.
    pub fn new() -> Self {
        Self::with_equals(|a: &T, b: &T| a == b)
    }

    /// Build options from a serialized [`SignalConfig`].
    pub fn from_config(config: SignalConfig) -> Self {
        let options = match config.equality {
            EqualityMode::Structural => Self::new(),
            EqualityMode::Never => Self::always_notify(),
        };
        options.auto_dispose(config.auto_dispose)
    }
}

impl<T: PartialEq + 'static> Default for SignalOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SignalOptions<T> {
    fn clone(&self) -> Self {
        Self {
            equals: Arc::clone(&self.equals),
            auto_dispose: self.auto_dispose,
        }
    }
}

impl<T> fmt::Debug for SignalOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalOptions")
            .field("auto_dispose", &self.auto_dispose)
            .finish_non_exhaustive()
    }
}

/// How writes are compared against the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualityMode {
    /// Compare with `PartialEq`; equal writes are no-ops.
    #[default]
    Structural,
    /// Never consider values equal; every write notifies.
    Never,
}

/// Serializable signal configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub auto_dispose: bool,
    pub equality: EqualityMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_partial_eq() {
        let options = SignalOptions::<i32>::default();
        assert!(options.is_equal(&1, &1));
        assert!(!options.is_equal(&1, &2));
        assert!(!options.is_auto_dispose());
    }

    #[test]
    fn custom_equality() {
        let options = SignalOptions::with_equals(|a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });
        assert!(options.is_equal(&"Hello".to_string(), &"hello".to_string()));
    }

    #[test]
    fn always_notify_never_equal() {
        let options = SignalOptions::<i32>::always_notify();
        assert!(!options.is_equal(&3, &3));
    }

    #[test]
    fn config_from_json() {
        let config: SignalConfig =
            serde_json::from_str(r#"{ "auto_dispose": true, "equality": "never" }"#).unwrap();
        assert_eq!(
            config,
            SignalConfig {
                auto_dispose: true,
                equality: EqualityMode::Never,
            }
        );

        let options = SignalOptions::<u8>::from_config(config);
        assert!(options.is_auto_dispose());
        assert!(!options.is_equal(&0, &0));
    }

    #[test]
    fn config_fields_default() {
        let config: SignalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SignalConfig::default());

        let options = SignalOptions::<u8>::from_config(config);
        assert!(!options.is_auto_dispose());
        assert!(options.is_equal(&7, &7));
    }
}
