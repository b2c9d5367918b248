//! The `partitions_config` block of a server: reading, checking and casting
//! it to the installer's [`PartitionsConfig`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::api::servers::{
    DefaultPartition, LocalDrives, OperatingSystem, PartitionConfigItem, PartitionsConfig,
};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock};

/// Name of the block in the server schema.
pub const PARTITIONS_CONFIG: &str = "partitions_config";

/// RAID name used for the OS default layout.
pub const DEFAULT_RAID_NAME: &str = "default-raid";

const PARTITION_KEY_PREFIX: &str = "partition-";
const SWAP_MOUNT: &str = "swap";
const FS_TYPE_SWAP: &str = "swap";
const FS_TYPE_DEFAULT: &str = "ext4";

/// `size` value meaning "the rest of the device".
const SIZE_REST: f64 = -1.0;

/// Supported RAID levels and their minimum number of member drives.
const RAID_LEVELS: &[(&str, usize)] = &[
    ("raid0", 2),
    ("raid1", 2),
    ("raid5", 3),
    ("raid6", 4),
    ("raid10", 4),
];

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A soft RAID over all drives of one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SoftRaidInput {
    pub name: String,
    pub level: String,
    pub disk_type: String,
}

/// A partition on a soft RAID.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiskPartitionInput {
    pub mount: String,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub size_percent: Option<f64>,
    pub raid: String,
    #[serde(default)]
    pub fs_type: Option<String>,
}

/// The user's `partitions_config` block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PartitionsInput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub soft_raid_config: Vec<SoftRaidInput>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub disk_partitions: Vec<DiskPartitionInput>,
}

impl PartitionsInput {
    /// Read the block from a resource state; a missing block is empty.
    pub fn from_state(state: &Value) -> Result<Self, ProviderError> {
        let block = match state.get(PARTITIONS_CONFIG) {
            Some(Value::Array(items)) => items.first().cloned(),
            Some(v @ Value::Object(_)) => Some(v.clone()),
            _ => None,
        };
        match block {
            Some(block) => serde_json::from_value(block).map_err(|e| {
                ProviderError::Validation(format!("failed to read partitions config: {}", e))
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.soft_raid_config.is_empty() && self.disk_partitions.is_empty()
    }

    /// Build the installer config.
    ///
    /// An empty input lays the OS default partitions over the most common
    /// drive type.
    pub fn cast_to_api(
        &self,
        local_drives: &LocalDrives,
        default_partitions: &[DefaultPartition],
    ) -> Result<PartitionsConfig, ProviderError> {
        if self.is_empty() {
            return default_layout(local_drives, default_partitions);
        }

        let mut config = PartitionsConfig::new();
        let mut raids: BTreeMap<&str, usize> = BTreeMap::new();
        let mut used_types: BTreeSet<&str> = BTreeSet::new();

        for raid in &self.soft_raid_config {
            let min_members = RAID_LEVELS
                .iter()
                .find(|(level, _)| *level == raid.level)
                .map(|(_, min)| *min)
                .ok_or_else(|| {
                    invalid(format!(
                        "soft raid {}: unknown level {}, expected one of {}",
                        raid.name,
                        raid.level,
                        RAID_LEVELS
                            .iter()
                            .map(|(l, _)| *l)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))
                })?;

            if raids.contains_key(raid.name.as_str()) {
                return Err(invalid(format!("soft raid {} is declared twice", raid.name)));
            }
            if is_reserved_name(&raid.name, local_drives) {
                return Err(invalid(format!(
                    "soft raid {}: the name is taken by a local drive or a generated partition",
                    raid.name
                )));
            }
            if !used_types.insert(raid.disk_type.as_str()) {
                return Err(invalid(format!(
                    "disk type {} is already used by another soft raid",
                    raid.disk_type
                )));
            }

            let members = local_drives.ids_of_type(&raid.disk_type);
            if members.is_empty() {
                return Err(invalid(format!(
                    "soft raid {}: no local drives of type {}",
                    raid.name, raid.disk_type
                )));
            }
            if members.len() < min_members {
                return Err(invalid(format!(
                    "soft raid {}: {} needs at least {} drives, {} of type {} available",
                    raid.name,
                    raid.level,
                    min_members,
                    members.len(),
                    raid.disk_type
                )));
            }

            insert_drives(&mut config, local_drives, &members);
            config.insert(
                raid.name.clone(),
                PartitionConfigItem::SoftRaid {
                    level: raid.level.clone(),
                    members: members.iter().map(|m| m.to_string()).collect(),
                },
            );
            raids.insert(raid.name.as_str(), 0);
        }

        let mut mounts: BTreeSet<&str> = BTreeSet::new();
        for (index, partition) in self.disk_partitions.iter().enumerate() {
            let rest_count = raids.get_mut(partition.raid.as_str()).ok_or_else(|| {
                invalid(format!(
                    "partition {}: soft raid {} is not declared",
                    partition.mount, partition.raid
                ))
            })?;

            if !mounts.insert(partition.mount.as_str()) {
                return Err(invalid(format!(
                    "mount {} is used by more than one partition",
                    partition.mount
                )));
            }

            let size = partition.size.filter(|s| *s != 0.0);
            let size_percent = partition.size_percent.filter(|s| *s != 0.0);
            match (size, size_percent) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(invalid(format!(
                        "partition {}: exactly one of size or size_percent must be set",
                        partition.mount
                    )));
                }
                (Some(size), None) if size == SIZE_REST => {
                    *rest_count += 1;
                    if *rest_count > 1 {
                        return Err(invalid(format!(
                            "soft raid {}: only one partition may take the rest of the device",
                            partition.raid
                        )));
                    }
                }
                (Some(size), None) if size < 0.0 => {
                    return Err(invalid(format!(
                        "partition {}: size must be positive or -1",
                        partition.mount
                    )));
                }
                (None, Some(percent)) if !(percent > 0.0 && percent <= 100.0) => {
                    return Err(invalid(format!(
                        "partition {}: size_percent must be in (0, 100]",
                        partition.mount
                    )));
                }
                _ => {}
            }

            let fs_type = partition
                .fs_type
                .clone()
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| default_fs_type(&partition.mount).to_string());

            config.insert(
                partition_key(index),
                PartitionConfigItem::Partition {
                    device: partition.raid.clone(),
                    mount: partition.mount.clone(),
                    fs_type,
                    size,
                    size_percent,
                },
            );
        }

        Ok(config)
    }
}

/// Whether an order or reinstall sends a partitions config.
///
/// Fails when partitions are configured for an OS without partitioning.
pub fn required_for(input: &PartitionsInput, os: &OperatingSystem) -> Result<bool, ProviderError> {
    match (input.is_empty(), os.partitioning) {
        (_, true) => Ok(true),
        (true, false) => Ok(false),
        (false, false) => Err(ProviderError::FailedPrecondition(format!(
            "os {} does not support partitions config",
            os.os_value
        ))),
    }
}

/// Schema of the `partitions_config` block.
pub fn schema_block() -> NestedBlock {
    let soft_raid = Block::new()
        .with_attribute("name", Attribute::required_string())
        .with_attribute(
            "level",
            Attribute::required_string()
                .with_allowed_values(RAID_LEVELS.iter().map(|(level, _)| *level)),
        )
        .with_attribute("disk_type", Attribute::required_string());

    let partition = Block::new()
        .with_attribute("mount", Attribute::required_string())
        .with_attribute(
            "size",
            Attribute::optional_float64().with_description("Size in GB, -1 for the rest of the device"),
        )
        .with_attribute("size_percent", Attribute::optional_float64())
        .with_attribute("raid", Attribute::required_string())
        .with_attribute(
            "fs_type",
            Attribute::optional_computed_string(),
        );

    NestedBlock::single(
        Block::new()
            .with_block("soft_raid_config", NestedBlock::list(soft_raid))
            .with_block("disk_partitions", NestedBlock::list(partition)),
    )
}

fn default_layout(
    local_drives: &LocalDrives,
    default_partitions: &[DefaultPartition],
) -> Result<PartitionsConfig, ProviderError> {
    let disk_type = local_drives
        .max_presented_type()
        .ok_or_else(|| invalid("the configuration has no local drives".to_string()))?;
    let members = local_drives.ids_of_type(disk_type);
    let first = *members
        .first()
        .ok_or_else(|| invalid(format!("no local drives of type {}", disk_type)))?;

    let mut config = PartitionsConfig::new();
    insert_drives(&mut config, local_drives, &members);

    let device = if members.len() >= 2 {
        config.insert(
            DEFAULT_RAID_NAME.to_string(),
            PartitionConfigItem::SoftRaid {
                level: "raid1".to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        DEFAULT_RAID_NAME.to_string()
    } else {
        first.to_string()
    };

    debug!(disk_type, drives = members.len(), "Using default partitions layout");

    for (index, partition) in default_partitions.iter().enumerate() {
        let fs_type = if partition.fs_type.is_empty() {
            default_fs_type(&partition.mount).to_string()
        } else {
            partition.fs_type.clone()
        };
        config.insert(
            partition_key(index),
            PartitionConfigItem::Partition {
                device: device.clone(),
                mount: partition.mount.clone(),
                fs_type,
                size: Some(partition.size),
                size_percent: None,
            },
        );
    }

    Ok(config)
}

fn insert_drives(config: &mut PartitionsConfig, local_drives: &LocalDrives, ids: &[&str]) {
    for id in ids {
        if let Some(drive) = local_drives.0.get(*id) {
            config.insert(
                id.to_string(),
                PartitionConfigItem::LocalDrive {
                    matcher: drive.matcher.clone(),
                },
            );
        }
    }
}

fn partition_key(index: usize) -> String {
    format!("{}{}", PARTITION_KEY_PREFIX, index)
}

/// RAID names share the config map with drive ids and partition keys.
fn is_reserved_name(name: &str, local_drives: &LocalDrives) -> bool {
    let generated = name
        .strip_prefix(PARTITION_KEY_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    generated || local_drives.0.contains_key(name)
}

fn default_fs_type(mount: &str) -> &'static str {
    if mount == SWAP_MOUNT {
        FS_TYPE_SWAP
    } else {
        FS_TYPE_DEFAULT
    }
}

fn invalid(message: String) -> ProviderError {
    ProviderError::Validation(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::servers::{LocalDrive, LocalDriveMatch};
    use serde_json::json;

    fn drives(types: &[(&str, &str)]) -> LocalDrives {
        LocalDrives(
            types
                .iter()
                .map(|(id, t)| {
                    (
                        id.to_string(),
                        LocalDrive {
                            drive_type: "drive".to_string(),
                            matcher: LocalDriveMatch {
                                size: 960,
                                drive_type: t.to_string(),
                            },
                        },
                    )
                })
                .collect(),
        )
    }

    fn nvme_pair() -> LocalDrives {
        drives(&[("d1", "NVMe"), ("d2", "NVMe"), ("d3", "HDD")])
    }

    fn input(value: Value) -> PartitionsInput {
        PartitionsInput::from_state(&json!({ PARTITIONS_CONFIG: [value] })).unwrap()
    }

    fn raid1_input(partitions: Value) -> PartitionsInput {
        input(json!({
            "soft_raid_config": [{"name": "first-raid", "level": "raid1", "disk_type": "NVMe"}],
            "disk_partitions": partitions
        }))
    }

    #[test]
    fn test_from_state_missing_or_null() {
        assert!(PartitionsInput::from_state(&json!({})).unwrap().is_empty());
        assert!(PartitionsInput::from_state(&json!({PARTITIONS_CONFIG: null}))
            .unwrap()
            .is_empty());
        assert!(PartitionsInput::from_state(&json!({PARTITIONS_CONFIG: [{
            "soft_raid_config": null, "disk_partitions": null
        }]}))
        .unwrap()
        .is_empty());
    }

    #[test]
    fn test_cast_full_layout() {
        let config = raid1_input(json!([
            {"mount": "/boot", "size": 1, "raid": "first-raid"},
            {"mount": "swap", "size_percent": 10.5, "raid": "first-raid"},
            {"mount": "/", "size": -1, "raid": "first-raid"},
            {"mount": "/data", "size": 400, "raid": "first-raid", "fs_type": "xfs"}
        ]))
        .cast_to_api(&nvme_pair(), &[])
        .unwrap();

        assert_eq!(
            config.get("first-raid"),
            Some(&PartitionConfigItem::SoftRaid {
                level: "raid1".to_string(),
                members: vec!["d1".to_string(), "d2".to_string()],
            })
        );
        assert!(config.contains_key("d1"));
        assert!(!config.contains_key("d3"));

        let fs_types: Vec<_> = config
            .values()
            .filter_map(|item| match item {
                PartitionConfigItem::Partition { mount, fs_type, .. } => {
                    Some((mount.as_str(), fs_type.as_str()))
                }
                _ => None,
            })
            .collect();
        assert!(fs_types.contains(&("swap", "swap")));
        assert!(fs_types.contains(&("/", "ext4")));
        assert!(fs_types.contains(&("/data", "xfs")));
    }

    #[test]
    fn test_default_layout_uses_most_common_type() {
        let defaults = vec![
            DefaultPartition { mount: "/boot".to_string(), size: 1.0, fs_type: "ext3".to_string() },
            DefaultPartition { mount: "swap".to_string(), size: 8.0, fs_type: String::new() },
            DefaultPartition { mount: "/".to_string(), size: -1.0, fs_type: String::new() },
        ];

        let config = PartitionsInput::default()
            .cast_to_api(&nvme_pair(), &defaults)
            .unwrap();

        assert!(matches!(
            config.get(DEFAULT_RAID_NAME),
            Some(PartitionConfigItem::SoftRaid { level, .. }) if level == "raid1"
        ));
        assert_eq!(
            config.get("partition-1"),
            Some(&PartitionConfigItem::Partition {
                device: DEFAULT_RAID_NAME.to_string(),
                mount: "swap".to_string(),
                fs_type: "swap".to_string(),
                size: Some(8.0),
                size_percent: None,
            })
        );
    }

    #[test]
    fn test_default_layout_single_drive() {
        let defaults = vec![DefaultPartition {
            mount: "/".to_string(),
            size: -1.0,
            fs_type: String::new(),
        }];
        let config = PartitionsInput::default()
            .cast_to_api(&drives(&[("d1", "SSD")]), &defaults)
            .unwrap();

        assert!(!config.contains_key(DEFAULT_RAID_NAME));
        assert!(matches!(
            config.get("partition-0"),
            Some(PartitionConfigItem::Partition { device, .. }) if device == "d1"
        ));
    }

    #[test]
    fn test_unknown_raid_level() {
        let err = input(json!({
            "soft_raid_config": [{"name": "r", "level": "raid7", "disk_type": "NVMe"}]
        }))
        .cast_to_api(&nvme_pair(), &[])
        .unwrap_err();
        assert!(err.to_string().contains("unknown level raid7"));
    }

    #[test]
    fn test_not_enough_members() {
        let err = input(json!({
            "soft_raid_config": [{"name": "r", "level": "raid5", "disk_type": "NVMe"}]
        }))
        .cast_to_api(&nvme_pair(), &[])
        .unwrap_err();
        assert!(err.to_string().contains("needs at least 3 drives"));
    }

    #[test]
    fn test_unknown_disk_type() {
        let err = input(json!({
            "soft_raid_config": [{"name": "r", "level": "raid1", "disk_type": "SAS"}]
        }))
        .cast_to_api(&nvme_pair(), &[])
        .unwrap_err();
        assert!(err.to_string().contains("no local drives of type SAS"));
    }

    #[test]
    fn test_disk_type_backs_one_raid() {
        let err = input(json!({
            "soft_raid_config": [
                {"name": "a", "level": "raid1", "disk_type": "NVMe"},
                {"name": "b", "level": "raid0", "disk_type": "NVMe"}
            ]
        }))
        .cast_to_api(&nvme_pair(), &[])
        .unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[test]
    fn test_raid_name_cannot_shadow_other_items() {
        for name in ["d1", "d3", "partition-0", "partition-12"] {
            let err = input(json!({
                "soft_raid_config": [{"name": name, "level": "raid1", "disk_type": "NVMe"}],
                "disk_partitions": [{"mount": "/", "size": -1, "raid": name}]
            }))
            .cast_to_api(&nvme_pair(), &[])
            .unwrap_err();
            assert!(err.to_string().contains("name is taken"), "{}: {}", name, err);
        }

        let config = input(json!({
            "soft_raid_config": [{"name": "partition-main", "level": "raid1", "disk_type": "NVMe"}],
            "disk_partitions": [{"mount": "/", "size": -1, "raid": "partition-main"}]
        }))
        .cast_to_api(&nvme_pair(), &[])
        .unwrap();
        assert!(config.contains_key("partition-main"));
        assert!(config.contains_key("partition-0"));
    }

    #[test]
    fn test_partition_rules() {
        let cases = [
            (json!([{"mount": "/", "size": -1, "raid": "missing"}]), "not declared"),
            (json!([{"mount": "/", "raid": "first-raid"}]), "exactly one of"),
            (
                json!([{"mount": "/", "size": 10, "size_percent": 5, "raid": "first-raid"}]),
                "exactly one of",
            ),
            (
                json!([
                    {"mount": "/", "size": -1, "raid": "first-raid"},
                    {"mount": "/var", "size": -1, "raid": "first-raid"}
                ]),
                "rest of the device",
            ),
            (json!([{"mount": "/", "size": -5, "raid": "first-raid"}]), "positive or -1"),
            (json!([{"mount": "/", "size_percent": 120, "raid": "first-raid"}]), "(0, 100]"),
            (
                json!([
                    {"mount": "/", "size": 10, "raid": "first-raid"},
                    {"mount": "/", "size": 20, "raid": "first-raid"}
                ]),
                "more than one partition",
            ),
        ];

        for (partitions, expected) in cases {
            let err = raid1_input(partitions.clone())
                .cast_to_api(&nvme_pair(), &[])
                .unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{} for {}: got {}",
                expected,
                partitions,
                err
            );
        }
    }

    #[test]
    fn test_required_for() {
        let mut os = OperatingSystem::default();
        let configured = raid1_input(json!([{"mount": "/", "size": -1, "raid": "first-raid"}]));

        assert!(!required_for(&PartitionsInput::default(), &os).unwrap());
        let err = required_for(&configured, &os).unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));

        os.partitioning = true;
        assert!(required_for(&PartitionsInput::default(), &os).unwrap());
        assert!(required_for(&configured, &os).unwrap());
    }
}
