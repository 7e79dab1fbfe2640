//! Instance entity.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One sandbox host: a privileged container running a nested daemon, attached
/// to its session's overlay network.
///
/// Names take the form `<hostname>_<sessionId>` and are globally unique. The
/// per-instance cancellation handle is owned by the core, keyed by this name;
/// it is deliberately not a field here so the entity stays serializable and
/// free of live references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Globally unique name, `<hostname>_<sessionId>`.
    pub name: String,

    /// The image the instance runs.
    pub image: String,

    /// Hostname inside the session ("node1", "node2", ...).
    pub hostname: String,

    /// Primary IP on the session overlay network.
    pub ip: String,

    /// Routable IP, when the instance is reachable from outside the overlay.
    #[serde(default)]
    pub routable_ip: String,

    /// CPU quota in fractional cores.
    pub limit_cpu: f64,

    /// Memory quota in MB.
    pub limit_memory: i64,

    /// PEM server certificate handed to the nested daemon.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_cert: Vec<u8>,

    /// PEM server key handed to the nested daemon.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_key: Vec<u8>,

    /// PEM CA certificate shared by daemon and clients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca_cert: Vec<u8>,

    /// PEM client certificate used when dialing the nested daemon.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert: Vec<u8>,

    /// PEM client key used when dialing the nested daemon.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<u8>,

    /// Whether the nested daemon listens with TLS.
    #[serde(default)]
    pub tls: bool,

    /// The owning session id. Lookup-only; confers no lifetime.
    pub session_id: String,

    /// The externally reachable hostname segment, `ip<hyphenated-IP>`.
    pub proxy_host: String,

    /// The `Host` the owning session was created on.
    #[serde(default)]
    pub session_host: String,

    /// Instance class tag ("linux", "windows").
    #[serde(rename = "type")]
    pub kind: String,
}

/// Parameters for creating an instance.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct InstanceConfig {
    /// Image to run; the playground default when empty.
    #[builder(default)]
    pub image_name: String,

    /// Hostname inside the session; assigned (`nodeN`) when empty.
    #[builder(default)]
    pub hostname: String,

    /// Whether the container runs privileged.
    #[builder(default = true)]
    pub privileged: bool,

    /// PEM server certificate for the nested daemon.
    #[builder(default)]
    pub server_cert: Vec<u8>,

    /// PEM server key for the nested daemon.
    #[builder(default)]
    pub server_key: Vec<u8>,

    /// PEM CA certificate.
    #[builder(default)]
    pub ca_cert: Vec<u8>,

    /// PEM client certificate.
    #[builder(default)]
    pub cert: Vec<u8>,

    /// PEM client key.
    #[builder(default)]
    pub key: Vec<u8>,

    /// The externally reachable FQDN of the playground, exported to the
    /// container as `PWD_HOST_FQDN`.
    #[builder(default)]
    pub playground_fqdn: String,

    /// Instance class tag; "linux" when empty.
    #[builder(default)]
    pub kind: String,

    /// Extra networks to join beyond the session overlay. Honored only in
    /// unsafe mode.
    #[builder(default)]
    pub networks: Vec<String>,

    /// Size hint for the external DinD volume.
    #[builder(default)]
    pub dind_volume_size: String,

    /// CPU quota in fractional cores; the playground default when zero.
    #[builder(default)]
    pub limit_cpu: f64,

    /// Memory quota in MB; the playground default when zero.
    #[builder(default)]
    pub limit_memory: i64,

    /// Extra environment entries, `KEY=value`.
    #[builder(default)]
    pub envs: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Instance {
    /// Whether any server-side TLS material was supplied.
    pub fn has_tls_material(&self) -> bool {
        !self.server_cert.is_empty() || !self.server_key.is_empty() || !self.ca_cert.is_empty()
    }

    /// The proxy host segment for an overlay IP: `10.0.0.2` becomes
    /// `ip10-0-0-2`.
    pub fn proxy_host_for(ip: &str) -> String {
        format!("ip{}", ip.replace('.', "-"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_host_for() {
        assert_eq!(Instance::proxy_host_for("10.0.12.3"), "ip10-0-12-3");
    }

    #[test]
    fn test_tls_material_detection() {
        let mut instance = Instance::default();
        assert!(!instance.has_tls_material());

        instance.server_cert = b"-----BEGIN CERTIFICATE-----".to_vec();
        assert!(instance.has_tls_material());
    }

    #[test]
    fn test_cert_blobs_stay_out_of_empty_serialization() -> anyhow::Result<()> {
        let instance = Instance {
            name: "node1_abcd1234".to_string(),
            session_id: "abcd1234".to_string(),
            ..Default::default()
        };

        let json = serde_json::to_string(&instance)?;
        assert!(!json.contains("server_cert"));
        Ok(())
    }
}
