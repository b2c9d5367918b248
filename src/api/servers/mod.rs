//! Dedicated servers API.

pub mod models;
pub mod partitions;

use std::net::IpAddr;

use serde_json::{json, Value};

use super::{encode_query, ServiceClient};
use crate::error::ProviderError;

pub use models::*;
pub use partitions::{PartitionConfigItem, PartitionsConfig};

/// Filters of the operating systems listing.
#[derive(Debug, Clone, Default)]
pub struct OperatingSystemsQuery {
    pub location_id: String,
    pub service_id: String,
}

fn subnet_path(is_local: bool) -> &'static str {
    if is_local {
        "network/ipam/local/subnet"
    } else {
        "network/ipam/subnet"
    }
}

fn service_kind(is_server_chip: bool) -> &'static str {
    if is_server_chip {
        SERVICE_TYPE_SERVER_CHIP
    } else {
        SERVICE_TYPE_SERVER
    }
}

impl ServiceClient {
    /// List data center locations.
    pub async fn locations(&self) -> Result<Vec<Location>, ProviderError> {
        self.get_result(&self.url("location")).await
    }

    /// List server or server chip configurations.
    pub async fn servers(&self, is_server_chip: bool) -> Result<Servers, ProviderError> {
        let kind = service_kind(is_server_chip);
        self.get_result(&self.url(&format!("service/{}", kind)))
            .await
    }

    /// Get one configuration.
    pub async fn server_by_id(
        &self,
        id: &str,
        is_server_chip: bool,
    ) -> Result<Server, ProviderError> {
        let kind = service_kind(is_server_chip);
        self.get_result(&self.url(&format!("service/{}/{}", kind, id)))
            .await
    }

    /// List operating systems installable for a location and configuration.
    pub async fn operating_systems(
        &self,
        query: &OperatingSystemsQuery,
    ) -> Result<OperatingSystems, ProviderError> {
        let params = encode_query(&[
            ("location_uuid", query.location_id.as_str()),
            ("service_uuid", query.service_id.as_str()),
        ]);
        self.get_result(&self.url(&format!("boot/template/os/new{}", params)))
            .await
    }

    /// List the drives of a configuration.
    pub async fn local_drives(&self, service_id: &str) -> Result<LocalDrives, ProviderError> {
        let params = encode_query(&[("service_uuid", service_id)]);
        self.get_result(&self.url(&format!("boot/template/local_drives{}", params)))
            .await
    }

    /// Ask the installer to check a partitions config.
    pub async fn partitions_validate(
        &self,
        config: Option<&PartitionsConfig>,
        service_id: &str,
    ) -> Result<Value, ProviderError> {
        let body = json!({
            "partitions_config": config,
            "service_uuid": service_id,
        });
        self.post(&self.url("boot/template/partitions/validate"), &body)
            .await
    }

    /// List price plans.
    pub async fn price_plans(&self) -> Result<PricePlans, ProviderError> {
        self.get_result(&self.url("plan")).await
    }

    /// List the stored SSH keys.
    pub async fn ssh_keys(&self) -> Result<SshKeys, ProviderError> {
        self.get_result(&self.url("ssh/key")).await
    }

    /// List the public or local subnets of a location.
    pub async fn subnets(&self, location_id: &str, is_local: bool) -> Result<Subnets, ProviderError> {
        let params = encode_query(&[("location_uuid", location_id)]);
        self.get_result(&self.url(&format!("{}{}", subnet_path(is_local), params)))
            .await
    }

    /// List the unassigned addresses of a subnet.
    pub async fn subnet_free_ips(&self, subnet: &Subnet) -> Result<Vec<IpAddr>, ProviderError> {
        self.get_result(&self.url(&format!("{}/{}/free", subnet_path(subnet.is_local), subnet.id)))
            .await
    }

    /// Calculate the price of an order and whether the balance covers it.
    pub async fn server_calculate_billing(
        &self,
        service_id: &str,
        location_id: &str,
        price_plan_id: &str,
        pay_currency: &str,
        is_server_chip: bool,
    ) -> Result<ServiceBilling, ProviderError> {
        let params = encode_query(&[
            ("service_uuid", service_id),
            ("location_uuid", location_id),
            ("price_plan_uuid", price_plan_id),
            ("pay_currency", pay_currency),
        ]);
        let kind = service_kind(is_server_chip);
        self.get_result(&self.url(&format!("{}/billing/calculate{}", kind, params)))
            .await
    }

    /// Order a server; returns the created resources.
    pub async fn server_billing(
        &self,
        payload: &ServerBillingPostPayload,
        is_server_chip: bool,
    ) -> Result<Vec<BilledResource>, ProviderError> {
        let kind = service_kind(is_server_chip);
        let envelope: super::Envelope<Vec<BilledResource>> = self
            .post(&self.url(&format!("{}/billing", kind)), payload)
            .await?;
        Ok(envelope.result)
    }

    /// Get details of an ordered resource.
    pub async fn resource_details(&self, id: &str) -> Result<ResourceDetails, ProviderError> {
        self.get_result(&self.url(&format!("resource/{}", id)))
            .await
    }

    /// Get the OS installed on a resource.
    pub async fn operating_system_by_resource(
        &self,
        id: &str,
    ) -> Result<OperatingSystemAtResource, ProviderError> {
        self.get_result(&self.url(&format!("resource/{}/os", id)))
            .await
    }

    /// Refuse to renew a resource; it expires at the end of the paid period.
    pub async fn delete_resource(&self, id: &str) -> Result<(), ProviderError> {
        self.delete(&self.url(&format!("resource/{}", id))).await
    }

    /// Reinstall the OS of a resource.
    pub async fn install_new_os(
        &self,
        payload: &InstallNewOsPayload,
        id: &str,
    ) -> Result<(), ProviderError> {
        self.put(&self.url(&format!("resource/{}/reinstall", id)), payload)
            .await
    }
}
