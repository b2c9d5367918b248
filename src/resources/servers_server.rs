//! `selectel_servers_server_v1`: an ordered dedicated server or server chip.
//!
//! Creating the resource pays for the server and installs the requested OS.
//! Only the OS-level attributes can be changed afterwards; changing them
//! reinstalls the server. Deleting refuses renewal, after which the server
//! expires at the end of the paid period.

use std::net::IpAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::partitions::{self, PartitionsInput, PARTITIONS_CONFIG};
use super::{
    changed, get_bool, get_str, import_project, require_str, set, OperationContext, Resource,
};
use crate::api::servers::{
    InstallNewOsPayload, OperatingSystem, OperatingSystemsQuery, PartitionsConfig, PricePlan,
    Server, ServerBillingPostPayload, ServiceBilling, SshKey, Subnet, PAY_CURRENCY_BONUS,
    PAY_CURRENCY_MAIN, RESOURCE_STATE_ACTIVE, RESOURCE_STATE_DEPLOY, RESOURCE_STATE_EXPIRING,
    RESOURCE_STATE_PAID, RESOURCE_STATE_PENDING, RESOURCE_STATE_PROCESSING,
    RESOURCE_STATE_REINSTALL,
};
use crate::api::ServiceClient;
use crate::config::Timeouts;
use crate::error::{ProviderError, ResultExt};
use crate::schema::{Attribute, Schema};
use crate::waiter::{wait_for_state, Refresh, WaitSpec};

pub const TYPE_NAME: &str = "selectel_servers_server_v1";

/// Default deadline of every operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const KEY_PROJECT_ID: &str = "project_id";
const KEY_LOCATION_ID: &str = "location_id";
const KEY_CONFIGURATION_ID: &str = "configuration_id";
const KEY_OS_ID: &str = "os_id";
const KEY_PRICE_PLAN_NAME: &str = "price_plan_name";
const KEY_IS_SERVER_CHIP: &str = "is_server_chip";
const KEY_OS_HOST_NAME: &str = "os_host_name";
const KEY_SSH_KEY: &str = "ssh_key";
const KEY_SSH_KEY_NAME: &str = "ssh_key_name";
const KEY_OS_PASSWORD: &str = "os_password";
const KEY_USER_SCRIPT: &str = "user_script";
const KEY_PUBLIC_SUBNET_ID: &str = "public_subnet_id";
const KEY_PRIVATE_SUBNET: &str = "private_subnet";

/// Attributes whose change reinstalls the OS.
const OS_KEYS: &[&str] = &[
    KEY_OS_ID,
    KEY_OS_HOST_NAME,
    KEY_SSH_KEY,
    KEY_SSH_KEY_NAME,
    KEY_OS_PASSWORD,
    PARTITIONS_CONFIG,
    KEY_USER_SCRIPT,
];

/// Attributes fixed once the server is ordered.
const FIXED_KEYS: &[&str] = &[
    KEY_PROJECT_ID,
    KEY_LOCATION_ID,
    KEY_CONFIGURATION_ID,
    KEY_PRICE_PLAN_NAME,
    KEY_PUBLIC_SUBNET_ID,
    KEY_PRIVATE_SUBNET,
];

/// Handler of [`TYPE_NAME`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ServersServerV1;

/// The attributes of a server as set by the user.
#[derive(Debug)]
struct ServerInput<'a> {
    project_id: &'a str,
    location_id: &'a str,
    configuration_id: &'a str,
    os_id: &'a str,
    price_plan_name: &'a str,
    is_server_chip: bool,
    host_name: &'a str,
    ssh_key: &'a str,
    ssh_key_name: &'a str,
    password: &'a str,
    user_script: &'a str,
    public_subnet_id: &'a str,
    private_subnet: &'a str,
    partitions: PartitionsInput,
}

impl<'a> ServerInput<'a> {
    fn from_state(state: &'a Value) -> Result<Self, ProviderError> {
        Ok(Self {
            project_id: require_str(state, KEY_PROJECT_ID)?,
            location_id: require_str(state, KEY_LOCATION_ID)?,
            configuration_id: require_str(state, KEY_CONFIGURATION_ID)?,
            os_id: require_str(state, KEY_OS_ID)?,
            price_plan_name: require_str(state, KEY_PRICE_PLAN_NAME)?,
            is_server_chip: get_bool(state, KEY_IS_SERVER_CHIP),
            host_name: get_str(state, KEY_OS_HOST_NAME),
            ssh_key: get_str(state, KEY_SSH_KEY),
            ssh_key_name: get_str(state, KEY_SSH_KEY_NAME),
            password: get_str(state, KEY_OS_PASSWORD),
            user_script: get_str(state, KEY_USER_SCRIPT),
            public_subnet_id: get_str(state, KEY_PUBLIC_SUBNET_ID),
            private_subnet: get_str(state, KEY_PRIVATE_SUBNET),
            partitions: PartitionsInput::from_state(state)?,
        })
    }

    fn object_name(&self) -> &'static str {
        object_name(self.is_server_chip)
    }

    /// The host name to install, generated when not set.
    fn host_name(&self) -> String {
        if self.host_name.is_empty() {
            generate_host_name()
        } else {
            self.host_name.to_string()
        }
    }

    /// The public key to install: a stored key by name wins over `ssh_key`.
    fn public_key(&self, stored: Option<&SshKey>) -> String {
        stored
            .map(|k| k.public_key.clone())
            .unwrap_or_else(|| self.ssh_key.to_string())
    }
}

/// Everything loaded from the API before ordering a server.
#[derive(Debug)]
struct CreateData {
    os: OperatingSystem,
    server: Server,
    partitions: Option<PartitionsConfig>,
    public_ip: Option<IpAddr>,
    private_ip: Option<LocalAddress>,
    ssh_key: Option<SshKey>,
    price_plan: PricePlan,
    billing: ServiceBilling,
    pay_currency: &'static str,
}

/// An address in a local subnet.
#[derive(Debug)]
struct LocalAddress {
    ip: IpAddr,
    subnet_id: String,
}

fn object_name(is_server_chip: bool) -> &'static str {
    if is_server_chip {
        "server chip"
    } else {
        "server"
    }
}

fn generate_host_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("server-{}", &id[..8])
}

fn precondition(message: String) -> ProviderError {
    ProviderError::FailedPrecondition(message)
}

async fn find_os(
    client: &ServiceClient,
    location_id: &str,
    configuration_id: &str,
    os_id: &str,
) -> Result<OperatingSystem, ProviderError> {
    let query = OperatingSystemsQuery {
        location_id: location_id.to_string(),
        service_id: configuration_id.to_string(),
    };
    let list = client
        .operating_systems(&query)
        .await
        .with_context(|| format!("failed to get os {}", os_id))?;
    list.find_one_by_id(os_id)
        .cloned()
        .ok_or_else(|| ProviderError::NotFound(format!("os {}", os_id)))
}

async fn load_partitions(
    client: &ServiceClient,
    input: &PartitionsInput,
    os: &OperatingSystem,
    configuration_id: &str,
) -> Result<Option<PartitionsConfig>, ProviderError> {
    if !partitions::required_for(input, os)? {
        return Ok(None);
    }
    let drives = client
        .local_drives(configuration_id)
        .await
        .with_context(|| format!("failed to get local drives for {}", configuration_id))?;
    let config = input
        .cast_to_api(&drives, &os.default_partitions)
        .with_context(|| "failed to read partitions config input")?;
    Ok(Some(config))
}

async fn first_free_ip(client: &ServiceClient, subnet: &Subnet) -> Result<IpAddr, ProviderError> {
    let free = client
        .subnet_free_ips(subnet)
        .await
        .with_context(|| format!("failed to get free IP addresses of subnet {}", subnet.subnet))?;
    free.first().copied().ok_or_else(|| {
        precondition(format!("no free IP addresses in subnet {}", subnet.subnet))
    })
}

async fn load_public_ip(
    client: &ServiceClient,
    location_id: &str,
    subnet_id: &str,
) -> Result<Option<IpAddr>, ProviderError> {
    if subnet_id.is_empty() {
        return Ok(None);
    }
    let subnets = client
        .subnets(location_id, false)
        .await
        .with_context(|| format!("failed to get public subnets of location {}", location_id))?;
    let subnet = subnets.find_one_by_id(subnet_id).ok_or_else(|| {
        ProviderError::NotFound(format!("public subnet {} in location {}", subnet_id, location_id))
    })?;
    first_free_ip(client, subnet).await.map(Some)
}

async fn load_private_ip(
    client: &ServiceClient,
    location_id: &str,
    cidr: &str,
) -> Result<Option<LocalAddress>, ProviderError> {
    if cidr.is_empty() {
        return Ok(None);
    }
    let subnets = client
        .subnets(location_id, true)
        .await
        .with_context(|| format!("failed to get local subnets of location {}", location_id))?;
    let subnet = subnets.find_one_by_cidr(cidr).ok_or_else(|| {
        ProviderError::NotFound(format!("local subnet {} in location {}", cidr, location_id))
    })?;
    let ip = first_free_ip(client, subnet).await?;
    debug!(subnet = cidr, %ip, "Picked a local address");
    Ok(Some(LocalAddress {
        ip,
        subnet_id: subnet.id.clone(),
    }))
}

async fn load_ssh_key(client: &ServiceClient, name: &str) -> Result<Option<SshKey>, ProviderError> {
    if name.is_empty() {
        return Ok(None);
    }
    let keys = client
        .ssh_keys()
        .await
        .with_context(|| "failed to get SSH keys")?;
    keys.find_one_by_name(name)
        .cloned()
        .map(Some)
        .ok_or_else(|| ProviderError::NotFound(format!("SSH key {}", name)))
}

async fn load_create_data(
    client: &ServiceClient,
    input: &ServerInput<'_>,
) -> Result<CreateData, ProviderError> {
    let object = input.object_name();
    let os = find_os(client, input.location_id, input.configuration_id, input.os_id).await?;

    let server = client
        .server_by_id(input.configuration_id, input.is_server_chip)
        .await
        .with_context(|| format!("failed to get {} {}", object, input.configuration_id))?;

    let partitions =
        load_partitions(client, &input.partitions, &os, input.configuration_id).await?;
    let public_ip = load_public_ip(client, input.location_id, input.public_subnet_id).await?;
    let private_ip = load_private_ip(client, input.location_id, input.private_subnet).await?;
    let ssh_key = load_ssh_key(client, input.ssh_key_name).await?;

    let price_plans = client
        .price_plans()
        .await
        .with_context(|| "failed to get price plans")?;
    let price_plan = price_plans
        .find_one_by_name(input.price_plan_name)
        .cloned()
        .ok_or_else(|| ProviderError::NotFound(format!("price plan {}", input.price_plan_name)))?;

    let calculate = |currency: &'static str| {
        let price_plan_id = price_plan.id.clone();
        async move {
            client
                .server_calculate_billing(
                    input.configuration_id,
                    input.location_id,
                    &price_plan_id,
                    currency,
                    input.is_server_chip,
                )
                .await
                .with_context(|| {
                    format!("can't calculate billing for {} {}", object, input.configuration_id)
                })
        }
    };

    let mut pay_currency = PAY_CURRENCY_MAIN;
    let mut billing = calculate(PAY_CURRENCY_MAIN).await?;
    if !billing.has_enough_balance {
        debug!("Main balance is insufficient, trying bonus balance");
        billing = calculate(PAY_CURRENCY_BONUS).await?;
        pay_currency = PAY_CURRENCY_BONUS;
    }

    Ok(CreateData {
        os,
        server,
        partitions,
        public_ip,
        private_ip,
        ssh_key,
        price_plan,
        billing,
        pay_currency,
    })
}

/// Checks run before paying for a server.
fn check_create_preconditions(
    data: &CreateData,
    input: &ServerInput<'_>,
    public_key: &str,
) -> Result<(), ProviderError> {
    let object = input.object_name();
    let (location, configuration, os_id) = (input.location_id, input.configuration_id, input.os_id);

    if !data.server.is_location_available(location) {
        return Err(precondition(format!(
            "location {} is not available for {} {}",
            location, object, configuration
        )));
    }
    if !data
        .server
        .is_price_plan_available_for_location(&data.price_plan.id, location)
    {
        return Err(precondition(format!(
            "price plan {} is not available for {} {} in location {}",
            data.price_plan.name, object, configuration, location
        )));
    }
    if !input.user_script.is_empty() && !data.os.script_allowed {
        return Err(precondition(format!("os {} does not allow scripts", os_id)));
    }
    if !public_key.is_empty() && !data.os.is_ssh_key_allowed {
        return Err(precondition(format!("os {} does not allow SSH keys", os_id)));
    }
    if !data.billing.has_enough_balance {
        return Err(precondition(format!(
            "{} {} is not available for price plan {} in location {} because of insufficient balance (main, bonus)",
            object, configuration, data.price_plan.name, location
        )));
    }
    if data.private_ip.is_some() {
        if !data.server.is_private_network_available() {
            return Err(precondition(format!(
                "{} {} does not support private network",
                object, configuration
            )));
        }
        if !data.os.is_private_network_available() {
            return Err(precondition(format!(
                "os {} does not support private network",
                os_id
            )));
        }
    }
    Ok(())
}

/// Reject updates that would need a new order.
fn check_update_changes(prior: &Value, planned: &Value) -> Result<(), ProviderError> {
    if !OS_KEYS.iter().any(|key| changed(prior, planned, key)) {
        return Err(precondition(
            "can't update because the os configuration has not changed".to_string(),
        ));
    }
    for key in FIXED_KEYS {
        if changed(prior, planned, key) {
            return Err(precondition(format!(
                "can't update because {} has changed, use the previous value {}",
                key,
                get_str(prior, key)
            )));
        }
    }
    Ok(())
}

async fn fetch_state(client: &ServiceClient, id: &str) -> Result<Refresh, ProviderError> {
    match client.resource_details(id).await {
        Ok(details) => Ok(Refresh::Status(details.state)),
        Err(err) if err.is_not_found() => Ok(Refresh::Gone),
        Err(err) => Err(err),
    }
}

impl ServersServerV1 {
    fn timeouts(state: &Value) -> Result<Timeouts, ProviderError> {
        Timeouts::from_state(state, Timeouts::uniform(DEFAULT_TIMEOUT))
    }

    async fn wait(
        ctx: &OperationContext,
        client: &ServiceClient,
        id: &str,
        spec: WaitSpec,
    ) -> Result<(), ProviderError> {
        let spec = spec.with_poll_interval(ctx.config.poll_interval);
        wait_for_state(&ctx.cancel, &spec, || fetch_state(client, id)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Resource for ServersServerV1 {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A dedicated server or server chip")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(KEY_PROJECT_ID, Attribute::required_string())
            .with_attribute(KEY_LOCATION_ID, Attribute::required_string())
            .with_attribute(KEY_CONFIGURATION_ID, Attribute::required_string())
            .with_attribute(KEY_OS_ID, Attribute::required_string())
            .with_attribute(KEY_PRICE_PLAN_NAME, Attribute::required_string())
            .with_attribute(
                KEY_IS_SERVER_CHIP,
                Attribute::optional_bool().with_default(json!(false)),
            )
            .with_attribute(
                KEY_OS_HOST_NAME,
                Attribute::optional_computed_string()
                    .with_description("Generated as server-<8 hex> when not set"),
            )
            .with_attribute(KEY_SSH_KEY, Attribute::optional_string())
            .with_attribute(
                KEY_SSH_KEY_NAME,
                Attribute::optional_string().with_description("Name of a stored SSH key"),
            )
            .with_attribute(KEY_OS_PASSWORD, Attribute::optional_string().sensitive())
            .with_attribute(KEY_USER_SCRIPT, Attribute::optional_string())
            .with_attribute(
                KEY_PRIVATE_SUBNET,
                Attribute::optional_string()
                    .with_description("Local subnet in CIDR notation; a free address is assigned"),
            )
            .with_attribute(
                KEY_PUBLIC_SUBNET_ID,
                Attribute::optional_string()
                    .with_description("Public subnet to take a free address from"),
            )
            .with_block(PARTITIONS_CONFIG, partitions::schema_block())
            .with_timeouts(&["create", "update", "delete"])
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn create(&self, ctx: &OperationContext, planned: Value) -> Result<Value, ProviderError> {
        let input = ServerInput::from_state(&planned)?;
        let timeouts = Self::timeouts(&planned)?;
        let client = ctx.config.servers_client();
        let object = input.object_name();

        let data = load_create_data(&client, &input).await?;
        let public_key = input.public_key(data.ssh_key.as_ref());
        check_create_preconditions(&data, &input, &public_key)?;

        client
            .partitions_validate(data.partitions.as_ref(), input.configuration_id)
            .await
            .with_context(|| {
                format!(
                    "failed to validate partitions config for {} {}",
                    object, input.configuration_id
                )
            })?;

        let host_name = input.host_name();
        let payload = ServerBillingPostPayload {
            service_uuid: input.configuration_id.to_string(),
            price_plan_uuid: data.price_plan.id.clone(),
            pay_currency: data.pay_currency.to_string(),
            location_uuid: input.location_id.to_string(),
            quantity: 1,
            project_uuid: input.project_id.to_string(),
            partitions_config: data.partitions.clone(),
            os_version: data.os.version_value.clone(),
            os_template: data.os.os_value.clone(),
            os_arch: data.os.arch.clone(),
            user_ssh_key: public_key,
            user_hostname: host_name.clone(),
            user_desc: host_name.clone(),
            password: input.password.to_string(),
            user_script: input.user_script.to_string(),
            ip_list: data.public_ip.into_iter().collect(),
            local_ip_list: data.private_ip.iter().map(|a| a.ip).collect(),
            local_subnet_uuid: data
                .private_ip
                .as_ref()
                .map(|a| a.subnet_id.clone())
                .unwrap_or_default(),
        };

        info!(
            configuration_id = input.configuration_id,
            location_id = input.location_id,
            pay_currency = data.pay_currency,
            "Ordering {}",
            object
        );
        let created = client
            .server_billing(&payload, input.is_server_chip)
            .await
            .with_context(|| format!("failed to create {} {}", object, input.configuration_id))?;

        let id = match created.as_slice() {
            [one] => one.uuid.clone(),
            [] => {
                return Err(ProviderError::InvalidRequest(format!(
                    "failed to create {} {}: no resource returned",
                    object, input.configuration_id
                )))
            },
            many => {
                return Err(ProviderError::InvalidRequest(format!(
                    "failed to create one {} {}: {} resources created",
                    object,
                    input.configuration_id,
                    many.len()
                )))
            },
        };

        let spec = WaitSpec::new(
            [
                RESOURCE_STATE_PENDING,
                RESOURCE_STATE_PROCESSING,
                RESOURCE_STATE_PAID,
                RESOURCE_STATE_DEPLOY,
            ],
            [RESOURCE_STATE_ACTIVE],
            timeouts.create,
        )?;
        Self::wait(ctx, &client, &id, spec)
            .await
            .with_context(|| format!("error creating {} {}", object, id))?;

        let mut state = planned.clone();
        set(&mut state, "id", id.as_str());
        set(&mut state, KEY_OS_HOST_NAME, host_name);
        info!(id = %id, "Server is active");
        Ok(state)
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn read(&self, ctx: &OperationContext, state: Value) -> Result<Value, ProviderError> {
        let id = require_str(&state, "id")?;
        let client = ctx.config.servers_client();

        let details = match client.resource_details(id).await {
            Ok(details) => details,
            Err(err) if err.is_not_found() => {
                info!(id, "Server not found, removing from state");
                return Ok(Value::Null);
            },
            Err(err) => return Err(err.context("failed to read")),
        };

        let is_server_chip = details.is_server_chip();
        if !details.is_server() && !is_server_chip {
            return Err(ProviderError::InvalidRequest(
                "the resource is neither a server nor a server chip".to_string(),
            ));
        }

        let resource_os = client
            .operating_system_by_resource(id)
            .await
            .with_context(|| format!("failed to read OS for server {}", id))?;

        let query = OperatingSystemsQuery {
            location_id: details.location_uuid.clone(),
            service_id: details.service_uuid.clone(),
        };
        let list = client
            .operating_systems(&query)
            .await
            .with_context(|| "failed to get operating systems")?;
        let os = list
            .find_one_by_arch_and_version_and_os(
                &resource_os.arch,
                &resource_os.version,
                &resource_os.os_value,
            )
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "OS {} with arch {} and version {}",
                    resource_os.os_value, resource_os.arch, resource_os.version
                ))
            })?;

        let mut next = state.clone();
        set(&mut next, KEY_LOCATION_ID, details.location_uuid.as_str());
        set(&mut next, KEY_CONFIGURATION_ID, details.service_uuid.as_str());
        set(
            &mut next,
            KEY_PRICE_PLAN_NAME,
            details.billing.current_price_plan.name.as_str(),
        );
        set(&mut next, KEY_IS_SERVER_CHIP, is_server_chip);
        set(&mut next, KEY_OS_HOST_NAME, resource_os.user_host_name.as_str());
        set(&mut next, KEY_USER_SCRIPT, resource_os.user_script.as_str());
        set(&mut next, KEY_OS_PASSWORD, resource_os.password.as_str());
        set(&mut next, KEY_OS_ID, os.id.as_str());
        Ok(next)
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn update(
        &self,
        ctx: &OperationContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let id = require_str(&prior, "id")?;
        check_update_changes(&prior, &planned)?;

        let input = ServerInput::from_state(&planned)?;
        let timeouts = Self::timeouts(&planned)?;
        let client = ctx.config.servers_client();

        let os = find_os(&client, input.location_id, input.configuration_id, input.os_id).await?;
        let partitions =
            load_partitions(&client, &input.partitions, &os, input.configuration_id).await?;
        let ssh_key = load_ssh_key(&client, input.ssh_key_name).await?;
        let public_key = input.public_key(ssh_key.as_ref());

        if !input.user_script.is_empty() && !os.script_allowed {
            return Err(precondition(format!("os {} does not allow scripts", input.os_id)));
        }
        if !public_key.is_empty() && !os.is_ssh_key_allowed {
            return Err(precondition(format!("os {} does not allow SSH keys", input.os_id)));
        }
        if partitions.is_some() && os.os_value == "windows" {
            return Err(precondition(format!(
                "os {} does not support partitions config",
                os.os_value
            )));
        }

        client
            .partitions_validate(partitions.as_ref(), input.configuration_id)
            .await
            .with_context(|| "failed to validate partitions config")?;

        let host_name = input.host_name();
        let payload = InstallNewOsPayload {
            os_version: os.version_value.clone(),
            os_template: os.os_value.clone(),
            os_arch: os.arch.clone(),
            user_ssh_key: public_key,
            user_hostname: host_name.clone(),
            password: input.password.to_string(),
            partitions_config: partitions,
            user_script: input.user_script.to_string(),
        };

        info!(id, os = %os.os_value, version = %os.version_value, "Reinstalling server OS");
        client
            .install_new_os(&payload, id)
            .await
            .with_context(|| format!("failed to update server {}", id))?;

        let spec = WaitSpec::new(
            [
                RESOURCE_STATE_REINSTALL,
                RESOURCE_STATE_PROCESSING,
                RESOURCE_STATE_DEPLOY,
            ],
            [RESOURCE_STATE_ACTIVE],
            timeouts.update,
        )?;
        Self::wait(ctx, &client, id, spec)
            .await
            .with_context(|| format!("error updating server {}", id))?;

        let mut state = planned.clone();
        set(&mut state, "id", id);
        set(&mut state, KEY_OS_HOST_NAME, host_name);
        Ok(state)
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn delete(&self, ctx: &OperationContext, state: Value) -> Result<(), ProviderError> {
        let id = require_str(&state, "id")?;
        let timeouts = Self::timeouts(&state)?;
        let client = ctx.config.servers_client();

        match client.delete_resource(id).await {
            Ok(()) => {},
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.context(format!("failed to delete server {}", id))),
        }

        let spec = WaitSpec::deletion(
            [RESOURCE_STATE_ACTIVE, RESOURCE_STATE_PROCESSING],
            timeouts.delete,
        )
        .with_target([RESOURCE_STATE_EXPIRING]);
        Self::wait(ctx, &client, id, spec)
            .await
            .with_context(|| format!("error deleting server {}", id))?;

        info!(id, "Server refused to renew");
        Ok(())
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn import(&self, ctx: &OperationContext, id: &str) -> Result<Value, ProviderError> {
        let project_id = import_project(&ctx.config)?;
        let state = self
            .read(ctx, json!({"id": id, "project_id": project_id}))
            .await?;
        if state.is_null() {
            return Err(ProviderError::NotFound(format!("server {}", id)));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::{context, context_with};
    use crate::validation::validate;
    use tokio_test::assert_ok;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn planned() -> Value {
        json!({
            "project_id": "proj",
            "location_id": "msk",
            "configuration_id": "cfg-1",
            "os_id": "os-1",
            "price_plan_name": "1 day",
            "is_server_chip": false,
            "os_host_name": "hostname",
            "os_password": "Passw0rd!",
            "user_script": "#!/bin/bash"
        })
    }

    fn ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": result }))
    }

    async fn mount_get(server: &MockServer, route: &str, result: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ok(result))
            .mount(server)
            .await;
    }

    async fn mount_catalog(server: &MockServer) {
        mount_get(
            server,
            "/boot/template/os/new",
            json!([{
                "uuid": "os-1", "os_name": "Ubuntu", "os_value": "ubuntu", "arch": "x86_64",
                "version_value": "2404", "script_allowed": true, "is_ssh_key_allowed": true,
                "partitioning": false, "template_version": "v2"
            }]),
        )
        .await;
        mount_get(
            server,
            "/service/server/cfg-1",
            json!({
                "uuid": "cfg-1", "name": "CL25-NVMe",
                "available": [{"location_uuid": "msk", "count": 3}],
                "prices": [{"location_uuid": "msk", "price_plan_uuid": "day"}]
            }),
        )
        .await;
        mount_get(server, "/plan", json!([{"uuid": "day", "name": "1 day"}])).await;
        Mock::given(method("POST"))
            .and(path("/boot/template/partitions/validate"))
            .respond_with(ok(json!({})))
            .mount(server)
            .await;
    }

    async fn mount_billing(server: &MockServer, currency: &str, enough: bool) {
        Mock::given(method("GET"))
            .and(path("/server/billing/calculate"))
            .and(query_param("pay_currency", currency))
            .respond_with(ok(json!({"has_enough_balance": enough})))
            .mount(server)
            .await;
    }

    async fn mount_subnets(server: &MockServer, free: Value) {
        mount_get(
            server,
            "/network/ipam/subnet",
            json!([{"uuid": "ps-1", "subnet": "203.0.113.0/28", "location_uuid": "msk"}]),
        )
        .await;
        mount_get(
            server,
            "/network/ipam/local/subnet",
            json!([{"uuid": "ls-1", "subnet": "192.168.0.0/24", "is_local": true}]),
        )
        .await;
        mount_get(server, "/network/ipam/subnet/ps-1/free", json!(["203.0.113.5"])).await;
        mount_get(server, "/network/ipam/local/subnet/ls-1/free", free).await;
    }

    fn details(state: &str) -> Value {
        json!({
            "uuid": "res-1",
            "state": state,
            "location_uuid": "msk",
            "service_uuid": "cfg-1",
            "billing": {"current_price_plan": {"uuid": "day", "name": "1 day"}},
            "service": {"service_type": "server"}
        })
    }

    #[test]
    fn test_generated_host_name() {
        let name = generate_host_name();
        assert!(name.starts_with("server-"));
        assert_eq!(name.len(), "server-".len() + 8);
        assert!(name["server-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_schema_accepts_partitions_block() {
        let mut config = planned();
        set(
            &mut config,
            PARTITIONS_CONFIG,
            json!([{
                "soft_raid_config": [{"name": "first-raid", "level": "raid1", "disk_type": "SSD NVMe M.2"}],
                "disk_partitions": [
                    {"mount": "/boot", "size": 1, "raid": "first-raid"},
                    {"mount": "swap", "size_percent": 10.5, "raid": "first-raid"},
                    {"mount": "/", "size": -1, "raid": "first-raid"}
                ]
            }]),
        );
        assert!(validate(&ServersServerV1.schema(), &config).is_empty());
    }

    #[tokio::test]
    async fn test_create_orders_and_waits() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, true).await;
        Mock::given(method("POST"))
            .and(path("/server/billing"))
            .and(body_partial_json(json!({
                "service_uuid": "cfg-1",
                "price_plan_uuid": "day",
                "pay_currency": "main",
                "os_template": "ubuntu",
                "user_hostname": "hostname",
                "quantity": 1
            })))
            .respond_with(ok(json!([{"uuid": "res-1"}])))
            .expect(1)
            .mount(&server)
            .await;
        mount_get(&server, "/resource/res-1", details("ACTIVE")).await;

        let state = assert_ok!(ServersServerV1.create(&context(&server), planned()).await);
        assert_eq!(state["id"], "res-1");
        assert_eq!(state["os_host_name"], "hostname");
    }

    #[tokio::test]
    async fn test_create_pays_with_bonus_when_main_is_short() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, false).await;
        mount_billing(&server, PAY_CURRENCY_BONUS, true).await;
        Mock::given(method("POST"))
            .and(path("/server/billing"))
            .and(body_partial_json(json!({"pay_currency": "bonus"})))
            .respond_with(ok(json!([{"uuid": "res-1"}])))
            .expect(1)
            .mount(&server)
            .await;
        mount_get(&server, "/resource/res-1", details("ACTIVE")).await;

        assert_ok!(ServersServerV1.create(&context(&server), planned()).await);
    }

    #[tokio::test]
    async fn test_create_rejects_insufficient_balance() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, false).await;
        mount_billing(&server, PAY_CURRENCY_BONUS, false).await;
        Mock::given(method("POST"))
            .and(path("/server/billing"))
            .respond_with(ok(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let err = ServersServerV1
            .create(&context(&server), planned())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
        assert!(err.to_string().contains("insufficient balance"));
    }

    #[tokio::test]
    async fn test_create_rejects_unavailable_location() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, true).await;

        let mut config = planned();
        set(&mut config, KEY_LOCATION_ID, "spb");
        let err = ServersServerV1
            .create(&context(&server), config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("location spb is not available"));
    }

    #[tokio::test]
    async fn test_create_rejects_partitions_for_os_without_partitioning() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;

        let mut config = planned();
        set(
            &mut config,
            PARTITIONS_CONFIG,
            json!([{"soft_raid_config": [{"name": "r", "level": "raid1", "disk_type": "SSD"}]}]),
        );
        let err = ServersServerV1
            .create(&context(&server), config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not support partitions config"));
    }

    #[tokio::test]
    async fn test_create_rejects_private_subnet_without_local_network() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, true).await;
        mount_subnets(&server, json!(["192.168.0.10"])).await;

        let mut config = planned();
        set(&mut config, KEY_PRIVATE_SUBNET, "192.168.0.0/24");
        let err = ServersServerV1
            .create(&context(&server), config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
        assert!(err.to_string().contains("server cfg-1 does not support private network"));
    }

    #[tokio::test]
    async fn test_create_assigns_free_addresses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/service/server/cfg-1"))
            .respond_with(ok(json!({
                "uuid": "cfg-1", "name": "CL25-NVMe", "is_local_network_available": true,
                "available": [{"location_uuid": "msk", "count": 3}],
                "prices": [{"location_uuid": "msk", "price_plan_uuid": "day"}]
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, true).await;
        mount_subnets(&server, json!(["192.168.0.10", "192.168.0.11"])).await;
        Mock::given(method("POST"))
            .and(path("/server/billing"))
            .and(body_partial_json(json!({
                "ip_list": ["203.0.113.5"],
                "local_ip_list": ["192.168.0.10"],
                "local_subnet_uuid": "ls-1"
            })))
            .respond_with(ok(json!([{"uuid": "res-1"}])))
            .expect(1)
            .mount(&server)
            .await;
        mount_get(&server, "/resource/res-1", details("ACTIVE")).await;

        let mut config = planned();
        set(&mut config, KEY_PUBLIC_SUBNET_ID, "ps-1");
        set(&mut config, KEY_PRIVATE_SUBNET, "192.168.0.0/24");
        let state = assert_ok!(ServersServerV1.create(&context(&server), config).await);
        assert_eq!(state[KEY_PRIVATE_SUBNET], "192.168.0.0/24");
    }

    #[tokio::test]
    async fn test_create_rejects_full_or_unknown_subnet() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, true).await;
        mount_subnets(&server, json!([])).await;

        let mut config = planned();
        set(&mut config, KEY_PRIVATE_SUBNET, "192.168.0.0/24");
        let err = ServersServerV1
            .create(&context(&server), config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
        assert!(err.to_string().contains("no free IP addresses in subnet 192.168.0.0/24"));

        let mut config = planned();
        set(&mut config, KEY_PUBLIC_SUBNET_ID, "ps-9");
        let err = ServersServerV1
            .create(&context(&server), config)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_fails_on_multiple_resources() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        mount_billing(&server, PAY_CURRENCY_MAIN, true).await;
        Mock::given(method("POST"))
            .and(path("/server/billing"))
            .respond_with(ok(json!([{"uuid": "res-1"}, {"uuid": "res-2"}])))
            .mount(&server)
            .await;

        let err = ServersServerV1
            .create(&context(&server), planned())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 resources created"));
    }

    #[tokio::test]
    async fn test_read_maps_resource() {
        let server = MockServer::start().await;
        mount_get(&server, "/resource/res-1", details("ACTIVE")).await;
        mount_get(
            &server,
            "/resource/res-1/os",
            json!({
                "userhostname": "host-1", "user_script": "env", "password": "secret",
                "os_template": "ubuntu", "arch": "x86_64", "version": "2404"
            }),
        )
        .await;
        mount_catalog(&server).await;

        let state = ServersServerV1
            .read(&context(&server), json!({"id": "res-1", "project_id": "proj"}))
            .await
            .unwrap();

        assert_eq!(state["location_id"], "msk");
        assert_eq!(state["configuration_id"], "cfg-1");
        assert_eq!(state["price_plan_name"], "1 day");
        assert_eq!(state["is_server_chip"], false);
        assert_eq!(state["os_host_name"], "host-1");
        assert_eq!(state["os_id"], "os-1");
    }

    #[tokio::test]
    async fn test_read_missing_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource/res-1"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let state = ServersServerV1
            .read(&context(&server), json!({"id": "res-1"}))
            .await
            .unwrap();
        assert!(state.is_null());
    }

    #[test]
    fn test_update_requires_os_change() {
        let mut prior = planned();
        set(&mut prior, "id", "res-1");

        let err = check_update_changes(&prior, &prior.clone()).unwrap_err();
        assert!(err.to_string().contains("os configuration has not changed"));
    }

    #[test]
    fn test_update_rejects_fixed_attribute_changes() {
        let mut prior = planned();
        set(&mut prior, "id", "res-1");
        let mut next = prior.clone();
        set(&mut next, KEY_OS_HOST_NAME, "hostname1");
        set(&mut next, KEY_LOCATION_ID, "spb");

        let err = check_update_changes(&prior, &next).unwrap_err();
        assert!(err.to_string().contains("location_id has changed"));
        assert!(err.to_string().contains("previous value msk"));

        let mut next = prior.clone();
        set(&mut next, KEY_OS_PASSWORD, "Passw0rd!1");
        set(&mut next, KEY_PUBLIC_SUBNET_ID, "ps-2");
        let err = check_update_changes(&prior, &next).unwrap_err();
        assert!(err.to_string().contains("public_subnet_id has changed"));

        let mut next = prior.clone();
        set(&mut next, KEY_OS_PASSWORD, "Passw0rd!1");
        assert!(check_update_changes(&prior, &next).is_ok());
    }

    #[tokio::test]
    async fn test_update_reinstalls_os() {
        let server = MockServer::start().await;
        mount_catalog(&server).await;
        Mock::given(method("PUT"))
            .and(path("/resource/res-1/reinstall"))
            .and(body_partial_json(json!({"user_hostname": "hostname1", "os_template": "ubuntu"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        mount_get(&server, "/resource/res-1", details("ACTIVE")).await;

        let mut prior = planned();
        set(&mut prior, "id", "res-1");
        let mut next = prior.clone();
        set(&mut next, KEY_OS_HOST_NAME, "hostname1");

        let state = assert_ok!(ServersServerV1.update(&context(&server), prior, next).await);
        assert_eq!(state["os_host_name"], "hostname1");
    }

    #[tokio::test]
    async fn test_delete_waits_for_expiring() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resource/res-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        mount_get(&server, "/resource/res-1", details("EXPIRING")).await;

        assert_ok!(
            ServersServerV1
                .delete(&context(&server), json!({"id": "res-1"}))
                .await
        );
    }

    #[tokio::test]
    async fn test_delete_of_missing_server_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        assert_ok!(
            ServersServerV1
                .delete(&context(&server), json!({"id": "res-1"}))
                .await
        );
    }

    #[tokio::test]
    async fn test_import_requires_project() {
        let server = MockServer::start().await;
        let err = ServersServerV1
            .import(&context(&server), "res-1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("project_id must be set"));

        let ctx = context_with(&server, json!({"project_id": "proj"}));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;
        assert!(ServersServerV1.import(&ctx, "res-1").await.unwrap_err().is_not_found());
    }
}
