//! Dedicated servers API models and lookup helpers.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::partitions::PartitionsConfig;

/// Billing is paid from the main balance.
pub const PAY_CURRENCY_MAIN: &str = "main";
/// Billing is paid from the bonus balance.
pub const PAY_CURRENCY_BONUS: &str = "bonus";

/// Resource states seen while a server is ordered and deployed.
pub const RESOURCE_STATE_PENDING: &str = "PENDING";
pub const RESOURCE_STATE_PROCESSING: &str = "PROCESSING";
pub const RESOURCE_STATE_PAID: &str = "PAID";
pub const RESOURCE_STATE_DEPLOY: &str = "DEPLOY";
pub const RESOURCE_STATE_ACTIVE: &str = "ACTIVE";
pub const RESOURCE_STATE_REINSTALL: &str = "REINSTALL";
pub const RESOURCE_STATE_EXPIRING: &str = "EXPIRING";

/// A data center location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "uuid")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A server configuration (a server or a server chip offering).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "uuid")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub available: Vec<ServerAvailability>,
    #[serde(default)]
    pub prices: Vec<ServerPrice>,
    #[serde(default)]
    pub is_local_network_available: bool,
}

/// Stock of a configuration in one location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAvailability {
    pub location_uuid: String,
    #[serde(default)]
    pub count: i64,
}

/// Price of a configuration under one price plan in one location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerPrice {
    pub location_uuid: String,
    pub price_plan_uuid: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub value: f64,
}

impl Server {
    /// The configuration is in stock at `location_id`.
    pub fn is_location_available(&self, location_id: &str) -> bool {
        self.available
            .iter()
            .any(|a| a.location_uuid == location_id && a.count > 0)
    }

    /// The configuration is sold under `price_plan_id` at `location_id`.
    pub fn is_price_plan_available_for_location(&self, price_plan_id: &str, location_id: &str) -> bool {
        self.prices
            .iter()
            .any(|p| p.location_uuid == location_id && p.price_plan_uuid == price_plan_id)
    }

    /// The configuration can join a private network.
    pub fn is_private_network_available(&self) -> bool {
        self.is_local_network_available
    }
}

/// A list of configurations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Servers(pub Vec<Server>);

impl Servers {
    pub fn find_one_by_name(&self, name: &str) -> Option<&Server> {
        self.0.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Server> {
        self.0.iter()
    }
}

/// A partition the OS installs by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultPartition {
    pub mount: String,
    /// Size in GB, `-1` for the rest of the device.
    pub size: f64,
    #[serde(default)]
    pub fs_type: String,
}

/// An installable operating system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatingSystem {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "os_name")]
    pub name: String,
    pub os_value: String,
    pub arch: String,
    pub version_value: String,
    #[serde(default)]
    pub script_allowed: bool,
    #[serde(default)]
    pub is_ssh_key_allowed: bool,
    #[serde(default)]
    pub partitioning: bool,
    #[serde(default)]
    pub template_version: String,
    #[serde(default)]
    pub default_partitions: Vec<DefaultPartition>,
}

impl OperatingSystem {
    /// Only non-Windows images on the v2 template can join a private network.
    pub fn is_private_network_available(&self) -> bool {
        self.os_value != "windows" && self.template_version == "v2"
    }
}

/// A list of operating systems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatingSystems(pub Vec<OperatingSystem>);

impl OperatingSystems {
    pub fn find_one_by_id(&self, id: &str) -> Option<&OperatingSystem> {
        self.0.iter().find(|os| os.id == id)
    }

    pub fn find_one_by_name_and_version(&self, name: &str, version: &str) -> Option<&OperatingSystem> {
        self.0
            .iter()
            .find(|os| os.name == name && os.version_value == version)
    }

    pub fn find_one_by_arch_and_version_and_os(
        &self,
        arch: &str,
        version: &str,
        os_value: &str,
    ) -> Option<&OperatingSystem> {
        self.0
            .iter()
            .find(|os| os.arch == arch && os.version_value == version && os.os_value == os_value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperatingSystem> {
        self.0.iter()
    }
}

/// The OS currently installed on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystemAtResource {
    #[serde(default)]
    pub user_ssh_key: String,
    #[serde(rename = "userhostname", default)]
    pub user_host_name: String,
    #[serde(default)]
    pub user_script: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "os_template")]
    pub os_value: String,
    pub arch: String,
    pub version: String,
    #[serde(default)]
    pub reinstall: i64,
}

/// A physical drive of a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDrive {
    #[serde(rename = "type")]
    pub drive_type: String,
    #[serde(rename = "match")]
    pub matcher: LocalDriveMatch,
}

/// How the installer recognizes a drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDriveMatch {
    pub size: i64,
    #[serde(rename = "type")]
    pub drive_type: String,
}

/// Drives of a configuration keyed by drive id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalDrives(pub BTreeMap<String, LocalDrive>);

impl LocalDrives {
    /// The most common disk type; ties go to the alphabetically first type.
    pub fn max_presented_type(&self) -> Option<&str> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for drive in self.0.values() {
            *counts.entry(drive.matcher.drive_type.as_str()).or_default() += 1;
        }

        let mut best: Option<(&str, usize)> = None;
        for (drive_type, count) in counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((drive_type, count));
            }
        }
        best.map(|(t, _)| t)
    }

    /// Ids of the drives of `drive_type`, in id order.
    pub fn ids_of_type(&self, drive_type: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, d)| d.matcher.drive_type == drive_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// A price plan (billing period).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePlan {
    #[serde(rename = "uuid", default)]
    pub id: String,
    pub name: String,
}

/// A list of price plans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricePlans(pub Vec<PricePlan>);

impl PricePlans {
    pub fn find_one_by_name(&self, name: &str) -> Option<&PricePlan> {
        self.0.iter().find(|p| p.name == name)
    }
}

/// A stored SSH key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    pub name: String,
    pub public_key: String,
}

/// A list of stored SSH keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SshKeys(pub Vec<SshKey>);

impl SshKeys {
    pub fn find_one_by_name(&self, name: &str) -> Option<&SshKey> {
        self.0.iter().find(|k| k.name == name)
    }
}

/// An address range of a location, public or local.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(rename = "uuid")]
    pub id: String,
    /// CIDR notation, `192.168.0.0/24`.
    pub subnet: String,
    #[serde(default)]
    pub location_uuid: String,
    #[serde(default)]
    pub is_local: bool,
}

/// Subnets of one location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subnets(pub Vec<Subnet>);

impl Subnets {
    pub fn find_one_by_id(&self, id: &str) -> Option<&Subnet> {
        self.0.iter().find(|s| s.id == id)
    }

    pub fn find_one_by_cidr(&self, cidr: &str) -> Option<&Subnet> {
        self.0.iter().find(|s| s.subnet == cidr)
    }
}

/// Result of a billing calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceBilling {
    #[serde(default)]
    pub has_enough_balance: bool,
    #[serde(default)]
    pub final_sum: f64,
    #[serde(default)]
    pub currency: String,
}

/// Order of a new server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerBillingPostPayload {
    pub service_uuid: String,
    pub price_plan_uuid: String,
    pub pay_currency: String,
    pub location_uuid: String,
    pub quantity: u32,
    pub project_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions_config: Option<PartitionsConfig>,
    pub os_version: String,
    pub os_template: String,
    pub os_arch: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_ssh_key: String,
    pub user_hostname: String,
    pub user_desc: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_script: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_list: Vec<IpAddr>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local_ip_list: Vec<IpAddr>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub local_subnet_uuid: String,
}

/// A resource created by a billing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilledResource {
    pub uuid: String,
}

/// Reinstallation of the OS of an existing server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallNewOsPayload {
    pub os_version: String,
    pub os_template: String,
    pub os_arch: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_ssh_key: String,
    pub user_hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions_config: Option<PartitionsConfig>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_script: String,
}

/// Details of an ordered resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDetails {
    pub uuid: String,
    pub state: String,
    #[serde(default)]
    pub location_uuid: String,
    #[serde(default)]
    pub service_uuid: String,
    #[serde(default)]
    pub billing: ResourceBilling,
    #[serde(default)]
    pub service: ResourceService,
}

/// Billing section of [`ResourceDetails`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBilling {
    #[serde(default)]
    pub current_price_plan: PricePlan,
}

/// Service section of [`ResourceDetails`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceService {
    #[serde(default)]
    pub service_type: String,
}

/// Service type of a dedicated server.
pub const SERVICE_TYPE_SERVER: &str = "server";
/// Service type of a server chip.
pub const SERVICE_TYPE_SERVER_CHIP: &str = "serverchip";

impl ResourceDetails {
    pub fn is_server(&self) -> bool {
        self.service.service_type == SERVICE_TYPE_SERVER
    }

    pub fn is_server_chip(&self) -> bool {
        self.service.service_type == SERVICE_TYPE_SERVER_CHIP
    }
}
