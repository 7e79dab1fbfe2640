//! Playground entity.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::config::OAuthProvider;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A tenant-scoped configuration namespace keyed by its external domain.
///
/// One playground (the "default") always exists; it is created on first boot
/// when absent and is otherwise immutable-by-policy during runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Playground {
    /// Stable opaque identifier.
    #[serde(default)]
    #[builder(default)]
    pub id: String,

    /// The external domain. Unique across all playgrounds.
    pub domain: String,

    /// Default image for new DinD instances.
    pub default_dind_instance_image: String,

    /// The images a caller may request for DinD instances.
    #[serde(default)]
    #[builder(default)]
    pub available_dind_instance_images: Vec<String>,

    /// Whether Windows-class instances may be requested.
    #[serde(default)]
    #[builder(default)]
    pub allow_windows_instances: bool,

    /// The maximum (and default) session duration.
    #[serde(with = "duration_secs")]
    pub default_session_duration: Duration,

    /// Whether instances run privileged. DinD requires it.
    #[serde(default)]
    #[builder(default = true)]
    pub privileged: bool,

    /// Name patterns of the probing tasks enabled for this playground.
    #[serde(default)]
    #[builder(default)]
    pub tasks: Vec<String>,

    /// Size hint for external DinD volumes, when overriding the service-wide
    /// default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default)]
    pub dind_volume_size: String,

    /// OAuth provider credentials keyed by provider name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[builder(default)]
    pub providers: HashMap<String, OAuthProvider>,

    /// Landing asset directory override for the adapter.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[builder(default)]
    pub assets_dir: String,

    /// Free-form extras surfaced to the front-end.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[builder(default)]
    pub extras: HashMap<String, serde_json::Value>,
}

pub(crate) mod duration_secs {
    //! Durations persist as integral seconds in the snapshot.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Playground {
    /// Whether `image` may be used for instances of this playground. An empty
    /// allow-list admits only the default image.
    pub fn allows_image(&self, image: &str) -> bool {
        image == self.default_dind_instance_image
            || self
                .available_dind_instance_images
                .iter()
                .any(|i| i == image)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_image() {
        let playground = Playground::builder()
            .domain("localhost".to_string())
            .default_dind_instance_image("franela/dind:latest".to_string())
            .available_dind_instance_images(vec!["franela/k8s:latest".to_string()])
            .default_session_duration(Duration::from_secs(3600))
            .build();

        assert!(playground.allows_image("franela/dind:latest"));
        assert!(playground.allows_image("franela/k8s:latest"));
        assert!(!playground.allows_image("evil/image:latest"));
    }

    #[test]
    fn test_duration_round_trips_through_snapshot() -> anyhow::Result<()> {
        let playground = Playground::builder()
            .domain("localhost".to_string())
            .default_dind_instance_image("franela/dind:latest".to_string())
            .default_session_duration(Duration::from_secs(4 * 3600))
            .build();

        let json = serde_json::to_string(&playground)?;
        let back: Playground = serde_json::from_str(&json)?;
        assert_eq!(back.default_session_duration, Duration::from_secs(14400));
        Ok(())
    }
}
