//! Partitions config as the installer API expects it.
//!
//! The config is a flat map of named items; soft RAIDs reference drives by
//! key and partitions reference their RAID by key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::models::LocalDriveMatch;

/// Named installer items.
pub type PartitionsConfig = BTreeMap<String, PartitionConfigItem>;

/// One item of a [`PartitionsConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionConfigItem {
    LocalDrive {
        #[serde(rename = "match")]
        matcher: LocalDriveMatch,
    },
    SoftRaid {
        level: String,
        members: Vec<String>,
    },
    Partition {
        device: String,
        mount: String,
        fs_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size_percent: Option<f64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_are_tagged() {
        let mut config = PartitionsConfig::new();
        config.insert(
            "d1".to_string(),
            PartitionConfigItem::LocalDrive {
                matcher: LocalDriveMatch {
                    size: 480,
                    drive_type: "SSD".to_string(),
                },
            },
        );
        config.insert(
            "raid".to_string(),
            PartitionConfigItem::SoftRaid {
                level: "raid1".to_string(),
                members: vec!["d1".to_string()],
            },
        );
        config.insert(
            "p0".to_string(),
            PartitionConfigItem::Partition {
                device: "raid".to_string(),
                mount: "/".to_string(),
                fs_type: "ext4".to_string(),
                size: Some(-1.0),
                size_percent: None,
            },
        );

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({
                "d1": {"type": "local_drive", "match": {"size": 480, "type": "SSD"}},
                "raid": {"type": "soft_raid", "level": "raid1", "members": ["d1"]},
                "p0": {"type": "partition", "device": "raid", "mount": "/", "fs_type": "ext4", "size": -1.0}
            })
        );
    }
}
