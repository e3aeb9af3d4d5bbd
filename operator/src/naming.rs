//! Fixed names shared by the renderer, the reconciler and the watches.

/// Base name of every generated resource and the canonical instance name.
pub const RESOURCE_NAME: &str = "mlflow";

/// The ClusterRole shared by all instances. Never suffixed.
pub const CLUSTER_ROLE_NAME: &str = "mlflow";

pub const SERVICE_ACCOUNT_NAME: &str = "mlflow-sa";

/// Serving certificate secret, provisioned through the Service annotation.
pub const TLS_SECRET_NAME: &str = "mlflow-tls";

/// Root path the server is mounted under. Routing rules depend on it, so it
/// is not configurable per instance.
pub const STATIC_PREFIX: &str = "/mlflow";

/// Field manager used for every server-side apply.
pub const FIELD_MANAGER: &str = "mlflow-operator";

pub const PLATFORM_CA_BUNDLE_CONFIGMAP: &str = "odh-trusted-ca-bundle";
pub const PLATFORM_CA_BUNDLE_VOLUME: &str = "platform-ca-bundle";
pub const PLATFORM_CA_BUNDLE_KEY: &str = "ca-bundle.crt";
pub const PLATFORM_CA_BUNDLE_EXTRA_KEY: &str = "odh-ca-bundle.crt";
pub const PLATFORM_CA_BUNDLE_MOUNT_PATH: &str = "/etc/pki/tls/certs/platform";

pub const CUSTOM_CA_BUNDLE_MOUNT_PATH: &str = "/etc/pki/tls/certs/custom-ca-bundle.crt";
pub const COMBINED_CA_BUNDLE_MOUNT_PATH: &str = "/etc/pki/tls/certs/combined";
pub const SYSTEM_CA_BUNDLE_PATH: &str = "/etc/pki/tls/certs/ca-bundle.crt";

/// Suffix appended to every namespaced resource an instance owns.
///
/// The canonical `mlflow` instance gets no suffix, any other instance gets
/// `-<name>`.
pub fn resource_suffix(instance: &str) -> String {
    if instance == RESOURCE_NAME {
        String::new()
    } else {
        format!("-{instance}")
    }
}

/// `mlflow<suffix>`: the name of the Deployment, Service, route and link.
pub fn resource_name(instance: &str) -> String {
    format!("{}{}", RESOURCE_NAME, resource_suffix(instance))
}

pub fn platform_ca_bundle_file() -> String {
    format!("{PLATFORM_CA_BUNDLE_MOUNT_PATH}/{PLATFORM_CA_BUNDLE_KEY}")
}

pub fn platform_ca_bundle_extra_file() -> String {
    format!("{PLATFORM_CA_BUNDLE_MOUNT_PATH}/{PLATFORM_CA_BUNDLE_EXTRA_KEY}")
}

pub fn combined_ca_bundle_file() -> String {
    format!("{COMBINED_CA_BUNDLE_MOUNT_PATH}/ca-bundle.crt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_instance_has_no_suffix() {
        assert_eq!(resource_suffix("mlflow"), "");
        assert_eq!(resource_name("mlflow"), "mlflow");
    }

    #[test]
    fn other_instances_are_suffixed() {
        assert_eq!(resource_suffix("team-a"), "-team-a");
        assert_eq!(resource_name("team-a"), "mlflow-team-a");
        assert_eq!(resource_suffix("mlflow-dev"), "-mlflow-dev");
    }

    #[test]
    fn ca_bundle_paths() {
        assert_eq!(
            platform_ca_bundle_file(),
            "/etc/pki/tls/certs/platform/ca-bundle.crt"
        );
        assert_eq!(
            combined_ca_bundle_file(),
            "/etc/pki/tls/certs/combined/ca-bundle.crt"
        );
    }
}
