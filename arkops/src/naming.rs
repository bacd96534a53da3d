//! Deterministic resource naming.
//!
//! Every Docker resource owned by an instance derives its name from the
//! numeric instance ID here and nowhere else. Both derivation paths for the
//! plugins volume (from the ID, or from an already-known data volume name)
//! funnel through the same function, so they can never disagree.

/// Marker inserted into a data volume name to form its plugins volume name.
const PLUGINS_MARKER: &str = "plugins-";

/// Prefix shared by all instance-owned resources.
const RESOURCE_PREFIX: &str = "ase-server-";

/// Names of the Docker resources belonging to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub container: String,
    pub data_volume: String,
    pub plugins_volume: String,
}

impl ResourceNames {
    /// Derive all resource names for an instance ID.
    pub fn for_instance(id: u64) -> Self {
        let data_volume = data_volume_name(id);
        let plugins_volume = plugins_volume_for(&data_volume);
        Self {
            container: container_name(id),
            data_volume,
            plugins_volume,
        }
    }
}

/// Workload container name: `ase-server-<id>`.
pub fn container_name(id: u64) -> String {
    format!("{}{}", RESOURCE_PREFIX, id)
}

/// Data volume name: `ase-server-<id>`.
pub fn data_volume_name(id: u64) -> String {
    format!("{}{}", RESOURCE_PREFIX, id)
}

/// Plugins volume name: `ase-server-plugins-<id>`.
pub fn plugins_volume_name(id: u64) -> String {
    plugins_volume_for(&data_volume_name(id))
}

/// Derive a plugins volume name from its data volume name.
///
/// Single source of truth for the transformation
/// `ase-server-<id>` -> `ase-server-plugins-<id>`; callers that only hold
/// the data volume name (volume removal) and callers that hold the ID both
/// end up here. A name that does not carry the expected prefix is suffixed
/// wholesale, which keeps removal best-effort for foreign names.
pub fn plugins_volume_for(data_volume: &str) -> String {
    match data_volume.strip_prefix(RESOURCE_PREFIX) {
        Some(id) => format!("{}{}{}", RESOURCE_PREFIX, PLUGINS_MARKER, id),
        None => format!("{}-plugins", data_volume),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_deterministic() {
        let names = ResourceNames::for_instance(7);
        assert_eq!(names.container, "ase-server-7");
        assert_eq!(names.data_volume, "ase-server-7");
        assert_eq!(names.plugins_volume, "ase-server-plugins-7");
    }

    #[test]
    fn test_both_derivation_paths_agree() {
        for id in [0u64, 1, 42, 10_000, u64::MAX] {
            let names = ResourceNames::for_instance(id);
            // ID path and data-volume-name path must yield the same name.
            assert_eq!(plugins_volume_name(id), names.plugins_volume);
            assert_eq!(
                plugins_volume_for(&data_volume_name(id)),
                names.plugins_volume
            );
            assert_eq!(names.plugins_volume, format!("ase-server-plugins-{}", id));
        }
    }
}
