use ::std::time::Duration;

use ::hwc_client::service_client::{RequestOpts, ServiceClient};
use ::hwc_common::{
    anyhow::anyhow,
    error::{HwcError, Result},
    path_search::{path_search, path_search_array, path_search_i64, path_search_string},
    serde::{Deserialize, Serialize},
    serde_json::{json, Value},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};
use ::hwc_waiter::{Refreshed, RetryWithWaitForState, StateChangeConf, StateRefresh, DELETED};
use ::reqwest::Method;

use super::job::{job_id, wait_for_job};
use crate::{
    disappeared, ensure_unchanged, found, growth, non_empty, strings, text, Resource, Timeouts,
    WaitSettings,
};

const KIND: &str = "GaussDB openGauss instance";
const INSTANCES_URL: &str = "v3/{project_id}/instances";
const LIST_BY_ID_URL: &str = "v3/{project_id}/instances?id={instance_id}";
const INSTANCE_URL: &str = "v3/{project_id}/instances/{instance_id}";
const NAME_URL: &str = "v3/{project_id}/instances/{instance_id}/name";
const PASSWORD_URL: &str = "v3/{project_id}/instances/{instance_id}/password";
const ACTION_URL: &str = "v3/{project_id}/instances/{instance_id}/action";
const BACKUP_POLICY_URL: &str = "v3/{project_id}/instances/{instance_id}/backups/policy";
const FLAVOR_URL: &str = "v3/{project_id}/instance/{instance_id}/flavor";
const APPLY_CONFIGURATION_URL: &str = "v3/{project_id}/configurations/{config_id}/apply";

/// Deployment with shards and coordinators.
pub const HA_MODE_DISTRIBUTED: &str = "enterprise";
/// Primary/standby deployment.
pub const HA_MODE_CENTRALIZED: &str = "centralization_standard";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct Datastore {
    pub engine: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde", default)]
pub struct HighAvailability {
    pub mode: String,
    pub replication_mode: String,
    pub consistency: String,
    pub instance_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct Volume {
    #[serde(rename = "type")]
    pub volume_type: String,
    /// Size of one data node in GB.
    pub size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde", default)]
pub struct BackupStrategy {
    pub start_time: String,
    pub keep_days: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde", default)]
pub struct OpenGaussInstanceConfig {
    pub name: String,
    pub flavor: String,
    pub password: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: Option<String>,
    pub availability_zone: Option<String>,
    pub port: Option<String>,
    pub time_zone: Option<String>,
    pub configuration_id: Option<String>,
    pub enterprise_project_id: Option<String>,
    pub disk_encryption_id: Option<String>,
    /// Defaults to the latest `GaussDB(for openGauss)`.
    pub datastore: Option<Datastore>,
    pub ha: HighAvailability,
    pub volume: Volume,
    pub sharding_num: Option<i64>,
    pub coordinator_num: Option<i64>,
    pub replica_num: Option<i64>,
    pub backup_strategy: Option<BackupStrategy>,
    pub enable_force_switch: bool,
    pub enable_single_float_ip: bool,
}

impl OpenGaussInstanceConfig {
    /// Number of data nodes sharing the volume.
    fn data_node_num(&self) -> i64 {
        match self.ha.mode.as_str() {
            HA_MODE_DISTRIBUTED => self.sharding_num.unwrap_or(1),
            HA_MODE_CENTRALIZED => self.replica_num.unwrap_or(0) + 1,
            _ => 1,
        }
    }

    fn total_volume_size(&self) -> i64 {
        self.volume.size * self.data_node_num()
    }

    /// First of the comma separated availability zones.
    fn first_availability_zone(&self) -> Option<&str> {
        self.availability_zone
            .as_deref()
            .and_then(|zones| zones.split(',').next())
            .map(str::trim)
            .and_then(non_empty)
    }

    fn create_body(&self, region: &str, default_enterprise_project_id: Option<&str>) -> Value {
        let datastore = match &self.datastore {
            Some(datastore) => json!({"type": datastore.engine, "version": datastore.version}),
            None => json!({"type": "GaussDB(for openGauss)"}),
        };
        let opt = |v: &Option<String>| v.as_deref().and_then(non_empty).map(str::to_owned);
        json!({
            "name": self.name,
            "datastore": datastore,
            "ha": {
                "mode": self.ha.mode,
                "replication_mode": self.ha.replication_mode,
                "consistency": self.ha.consistency,
                "instance_mode": opt(&self.ha.instance_mode),
            },
            "configuration_id": opt(&self.configuration_id),
            "port": opt(&self.port),
            "password": self.password,
            "backup_strategy": self.backup_strategy.as_ref().map(|b| json!({
                "start_time": b.start_time,
                "keep_days": b.keep_days.filter(|d| *d != 0),
            })),
            "enterprise_project_id": opt(&self.enterprise_project_id)
                .or_else(|| default_enterprise_project_id.and_then(non_empty).map(str::to_owned)),
            "disk_encryption_id": opt(&self.disk_encryption_id),
            "flavor_ref": self.flavor,
            "volume": {
                "type": self.volume.volume_type,
                "size": self.total_volume_size(),
            },
            "region": region,
            "availability_zone": opt(&self.availability_zone),
            "vpc_id": self.vpc_id,
            "subnet_id": self.subnet_id,
            "security_group_id": opt(&self.security_group_id),
            "time_zone": opt(&self.time_zone),
            "sharding_num": self.sharding_num.filter(|n| *n != 0),
            "coordinator_num": self.coordinator_num.filter(|n| *n != 0),
            "replica_num": self.replica_num.filter(|n| *n != 0),
            "enable_force_switch": self.enable_force_switch.then_some(true),
            "enable_single_float_ip": self.enable_single_float_ip.then_some(true),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct OpenGaussNode {
    pub id: String,
    pub name: String,
    pub status: String,
    pub role: String,
    pub availability_zone: String,
    pub private_ip: String,
    pub public_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct OpenGaussInstanceState {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub flavor: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub db_user_name: String,
    pub time_zone: String,
    pub port: String,
    pub switch_strategy: String,
    pub maintenance_window: String,
    pub charging_mode: String,
    pub enterprise_project_id: String,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
    pub ha: HighAvailability,
    pub datastore: Datastore,
    /// Total size of all the data nodes.
    pub volume: Volume,
    pub backup_strategy: BackupStrategy,
    pub nodes: Vec<OpenGaussNode>,
    pub sharding_num: i64,
    pub coordinator_num: i64,
    pub replica_num: i64,
}

impl OpenGaussInstanceState {
    fn from_response(instance: &Value) -> Self {
        let nodes: Vec<_> = path_search_array("nodes", instance)
            .iter()
            .map(|node| OpenGaussNode {
                id: text("id", node),
                name: text("name", node),
                status: text("status", node),
                role: text("role", node),
                availability_zone: text("availability_zone", node),
                private_ip: text("private_ip", node),
                public_ip: text("public_ip", node),
            })
            .collect();
        let count = |suffix: &str| nodes.iter().filter(|n| n.name.contains(suffix)).count() as i64;
        let instance_mode = path_search_string("instance_mode", instance);
        Self {
            id: text("id", instance),
            name: text("name", instance),
            status: text("status", instance),
            instance_type: text("type", instance),
            flavor: text("flavor_ref", instance),
            vpc_id: text("vpc_id", instance),
            subnet_id: text("subnet_id", instance),
            security_group_id: text("security_group_id", instance),
            db_user_name: text("db_user_name", instance),
            time_zone: text("time_zone", instance),
            port: text("port", instance),
            switch_strategy: text("switch_strategy", instance),
            maintenance_window: text("maintenance_window", instance),
            charging_mode: text("charge_info.charge_mode", instance),
            enterprise_project_id: text("enterprise_project_id", instance),
            public_ips: strings("public_ips", instance),
            private_ips: strings("private_ips", instance),
            ha: HighAvailability {
                mode: text("type", instance).to_lowercase(),
                replication_mode: text("ha.replication_mode", instance),
                consistency: text("ha.consistency", instance),
                instance_mode,
            },
            datastore: Datastore {
                engine: text("datastore.type", instance),
                version: text("datastore.version", instance),
            },
            volume: Volume {
                volume_type: text("volume.type", instance),
                size: path_search_i64("volume.size", instance, 0),
            },
            backup_strategy: BackupStrategy {
                start_time: text("backup_strategy.start_time", instance),
                keep_days: path_search("backup_strategy.keep_days", instance)
                    .and_then(Value::as_i64),
            },
            sharding_num: count("_gaussdbv5dn"),
            coordinator_num: count("_gaussdbv5cn"),
            replica_num: path_search_i64("replica_num", instance, 0),
            nodes,
        }
    }
}

/// Polling stages of [OpenGaussInstance].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenGaussWaits {
    /// Job of the creation.
    pub create_job: WaitSettings,
    /// `BUILD` to `ACTIVE`.
    pub create: WaitSettings,
    /// Instance idle before every mutating request.
    pub idle: WaitSettings,
    /// Job of a rename.
    pub rename_job: WaitSettings,
    /// Job of a volume, shard, coordinator or flavor change.
    pub resize_job: WaitSettings,
    /// Job of a parameter template application.
    pub configuration_job: WaitSettings,
    /// `MODIFYING` to `ACTIVE`.
    pub modify: WaitSettings,
    /// Job of the deletion.
    pub delete_job: WaitSettings,
}

impl Default for OpenGaussWaits {
    fn default() -> Self {
        Self {
            create_job: WaitSettings::from_secs(300, 10),
            create: WaitSettings::from_secs(0, 10),
            idle: WaitSettings::from_secs(10, 10),
            rename_job: WaitSettings::from_secs(2, 10),
            resize_job: WaitSettings::from_secs(180, 10),
            configuration_job: WaitSettings::from_secs(2, 10),
            modify: WaitSettings::from_secs(0, 10),
            delete_job: WaitSettings::from_secs(5, 10),
        }
    }
}

pub struct OpenGaussInstance {
    client: ServiceClient,
    region: String,
    enterprise_project_id: Option<String>,
    timeouts: Timeouts,
    waits: OpenGaussWaits,
    cancel: CancellationToken,
}

impl OpenGaussInstance {
    pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts::new(
        Duration::from_secs(120 * 60),
        Duration::from_secs(150 * 60),
        Duration::from_secs(45 * 60),
    );

    pub fn new(client: ServiceClient, region: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            client,
            region: region.into(),
            enterprise_project_id: None,
            timeouts: Self::DEFAULT_TIMEOUTS,
            waits: OpenGaussWaits::default(),
            cancel,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Enterprise project of the instances created without one.
    pub fn with_enterprise_project_id(mut self, enterprise_project_id: Option<String>) -> Self {
        self.enterprise_project_id = enterprise_project_id;
        self
    }

    pub fn with_waits(mut self, waits: OpenGaussWaits) -> Self {
        self.waits = waits;
        self
    }

    /// The instance as listed by id, `None` if the list is empty.
    async fn find(&self, id: &str) -> Result<Option<Value>> {
        let url = self
            .client
            .build_url(LIST_BY_ID_URL, &[("instance_id", id)])?;
        let body = self
            .client
            .request(Method::GET, &url, &RequestOpts::new())
            .await?;
        Ok(path_search("instances[0]", &body).cloned())
    }

    async fn refresh(&self, id: &str) -> Result<Refreshed<Value>> {
        Ok(match self.find(id).await? {
            Some(instance) => {
                let status = text("status", &instance);
                Refreshed::new(instance, status)
            }
            None => Refreshed::new(Value::Null, DELETED),
        })
    }

    fn state_change<'a>(
        &'a self,
        id: &'a str,
        settings: WaitSettings,
    ) -> StateChangeConf<impl StateRefresh<Object = Value> + 'a> {
        settings.state_change(move || self.refresh(id))
    }

    async fn retry_on_conflict(
        &self,
        id: &str,
        method: Method,
        url: &str,
        opts: &RequestOpts,
    ) -> Result<Value> {
        let client = &self.client;
        let idle = self.state_change(id, self.waits.idle).target(["ACTIVE"]);
        RetryWithWaitForState::new(idle, self.timeouts.update)
            .run(
                move || client.request(method.clone(), url, opts),
                &self.cancel,
            )
            .await
    }

    async fn rename(&self, id: &str, name: &str) -> Result<()> {
        let url = self.client.build_url(NAME_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({ "name": name }));
        let body = self
            .retry_on_conflict(id, Method::PUT, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error updating {} {} name", KIND, id)))?;
        wait_for_job(
            &self.client,
            &job_id(&body)?,
            self.waits.rename_job,
            self.timeouts.update,
            &self.cancel,
        )
        .await?;
        Ok(())
    }

    async fn change_password(&self, id: &str, password: &str) -> Result<()> {
        let url = self.client.build_url(PASSWORD_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({ "password": password }));
        self.client
            .request(Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error updating {} {} password", KIND, id)))?;
        Ok(())
    }

    /// Send a request which reshapes the instance, then wait for its job
    /// and for the instance to leave `MODIFYING`.
    async fn modify(
        &self,
        id: &str,
        method: Method,
        url: &str,
        opts: &RequestOpts,
        what: &str,
    ) -> Result<()> {
        let body = self
            .retry_on_conflict(id, method, url, opts)
            .await
            .map_err(|e| e.context(format!("error updating {} of {} {}", what, KIND, id)))?;
        wait_for_job(
            &self.client,
            &job_id(&body)?,
            self.waits.resize_job,
            self.timeouts.update,
            &self.cancel,
        )
        .await?;
        self.state_change(id, self.waits.modify)
            .pending(["MODIFYING", "BACKING UP"])
            .target(["ACTIVE"])
            .timeout(self.timeouts.update)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for {} {} to become ready", KIND, id)))?;
        Ok(())
    }

    async fn action(&self, id: &str, body: Value, what: &str) -> Result<()> {
        let url = self.client.build_url(ACTION_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(body);
        self.modify(id, Method::POST, &url, &opts, what).await
    }

    async fn expand_shards(&self, id: &str, count: i64) -> Result<()> {
        info!("Adding {} shards to {} {}", count, KIND, id);
        let body = json!({
            "expand_cluster": { "shard": { "count": count } },
            "is_auto_pay": "true",
        });
        self.action(id, body, "sharding_num").await
    }

    async fn expand_coordinators(&self, id: &str, count: i64, az: &str) -> Result<()> {
        info!("Adding {} coordinators to {} {}", count, KIND, id);
        let coordinators: Vec<_> = (0..count).map(|_| json!({ "az_code": az })).collect();
        let body = json!({
            "expand_cluster": { "coordinators": coordinators },
            "is_auto_pay": "true",
        });
        self.action(id, body, "coordinator_num").await
    }

    async fn enlarge_volume(&self, id: &str, total_size: i64) -> Result<()> {
        let body = json!({
            "enlarge_volume": { "size": total_size },
            "is_auto_pay": "true",
        });
        self.action(id, body, "volume").await
    }

    async fn update_backup_strategy(&self, id: &str, backup: &BackupStrategy) -> Result<()> {
        let url = self
            .client
            .build_url(BACKUP_POLICY_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({
            "backup_policy": {
                "start_time": backup.start_time,
                "keep_days": backup.keep_days,
                "period": "1,2,3,4,5,6,7",
                "differential_period": "30",
            }
        }));
        self.client
            .request(Method::PUT, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error updating {} {} backup strategy", KIND, id)))?;
        Ok(())
    }

    async fn update_flavor(&self, id: &str, flavor: &str) -> Result<()> {
        let url = self.client.build_url(FLAVOR_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({ "flavor_ref": flavor }));
        self.modify(id, Method::PUT, &url, &opts, "flavor").await
    }

    async fn apply_configuration(&self, id: &str, configuration_id: &str) -> Result<()> {
        let url = self
            .client
            .build_url(APPLY_CONFIGURATION_URL, &[("config_id", configuration_id)])?;
        let opts = RequestOpts::new().json_body(json!({ "instance_ids": [id] }));
        let body = self
            .retry_on_conflict(id, Method::PUT, &url, &opts)
            .await
            .map_err(|e| {
                e.context(format!(
                    "error applying configuration {} to {} {}",
                    configuration_id, KIND, id
                ))
            })?;
        wait_for_job(
            &self.client,
            &job_id(&body)?,
            self.waits.configuration_job,
            self.timeouts.update,
            &self.cancel,
        )
        .await?;
        Ok(())
    }

    async fn provision(&self, id: &str, create_response: &Value) -> Result<OpenGaussInstanceState> {
        wait_for_job(
            &self.client,
            &job_id(create_response)?,
            self.waits.create_job,
            self.timeouts.create,
            &self.cancel,
        )
        .await?;
        self.state_change(id, self.waits.create)
            .pending(["BUILD", "BACKING UP"])
            .target(["ACTIVE"])
            .timeout(self.timeouts.create)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for {} {} to become ready", KIND, id)))?;
        self.read(id).await?.ok_or_else(|| disappeared(KIND, id))
    }

    async fn apply_changes(
        &self,
        id: &str,
        prior: &OpenGaussInstanceConfig,
        planned: &OpenGaussInstanceConfig,
    ) -> Result<OpenGaussInstanceState> {
        ensure_unchanged(
            KIND,
            &[
                ("vpc_id", prior.vpc_id != planned.vpc_id),
                ("subnet_id", prior.subnet_id != planned.subnet_id),
                ("security_group_id", prior.security_group_id != planned.security_group_id),
                ("availability_zone", prior.availability_zone != planned.availability_zone),
                ("port", prior.port != planned.port),
                ("time_zone", prior.time_zone != planned.time_zone),
                (
                    "enterprise_project_id",
                    prior.enterprise_project_id != planned.enterprise_project_id,
                ),
                ("disk_encryption_id", prior.disk_encryption_id != planned.disk_encryption_id),
                ("datastore", prior.datastore != planned.datastore),
                ("ha", prior.ha != planned.ha),
                ("volume.type", prior.volume.volume_type != planned.volume.volume_type),
                ("replica_num", prior.replica_num != planned.replica_num),
                ("enable_force_switch", prior.enable_force_switch != planned.enable_force_switch),
                (
                    "enable_single_float_ip",
                    prior.enable_single_float_ip != planned.enable_single_float_ip,
                ),
                (
                    "backup_strategy",
                    prior.backup_strategy.is_some() && planned.backup_strategy.is_none(),
                ),
                (
                    "configuration_id",
                    prior.configuration_id.is_some() && planned.configuration_id.is_none(),
                ),
            ],
        )?;
        let new_shards = growth("sharding_num", prior.sharding_num, planned.sharding_num)?;
        let new_coordinators =
            growth("coordinator_num", prior.coordinator_num, planned.coordinator_num)?;
        let coordinator_az = match planned.first_availability_zone() {
            Some(az) => az,
            None if new_coordinators > 0 => {
                return Err(HwcError::illegal_argument(anyhow!(
                    "availability_zone is required to add coordinators"
                )))
            }
            None => "",
        };

        if prior.name != planned.name {
            self.rename(id, &planned.name).await?;
        }
        if prior.password != planned.password {
            self.change_password(id, &planned.password).await?;
        }
        if new_shards > 0 {
            self.expand_shards(id, new_shards).await?;
        }
        if new_coordinators > 0 {
            self.expand_coordinators(id, new_coordinators, coordinator_az)
                .await?;
        }
        if prior.volume.size != planned.volume.size {
            self.enlarge_volume(id, planned.total_volume_size()).await?;
        }
        if prior.backup_strategy != planned.backup_strategy {
            if let Some(backup) = &planned.backup_strategy {
                self.update_backup_strategy(id, backup).await?;
            }
        }
        if prior.flavor != planned.flavor {
            self.update_flavor(id, &planned.flavor).await?;
        }
        if prior.configuration_id != planned.configuration_id {
            if let Some(configuration_id) = planned.configuration_id.as_deref().and_then(non_empty)
            {
                self.apply_configuration(id, configuration_id).await?;
            }
        }
        self.read(id).await?.ok_or_else(|| disappeared(KIND, id))
    }
}

impl Resource for OpenGaussInstance {
    type Config = OpenGaussInstanceConfig;
    type State = OpenGaussInstanceState;

    async fn create(&self, config: &Self::Config) -> Result<Self::State> {
        let url = self.client.build_url(INSTANCES_URL, &[])?;
        let opts = RequestOpts::new().json_body(
            config.create_body(&self.region, self.enterprise_project_id.as_deref()),
        );
        let body = self
            .client
            .request(Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error creating {}", KIND)))?;
        let id = path_search_string("instance.id", &body)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                HwcError::deserialize_failed(anyhow!("id is not found in API response"))
            })?;
        info!("{} {} is created, waiting for it to be active", KIND, id);
        self.provision(&id, &body)
            .await
            .map_err(|e| e.with_resource_id(&id))
    }

    async fn read(&self, id: &str) -> Result<Option<Self::State>> {
        match self.find(id).await? {
            Some(instance) => Ok(Some(OpenGaussInstanceState::from_response(&instance))),
            None => {
                warn!("{} {} does not exist", KIND, id);
                Ok(None)
            }
        }
    }

    async fn update(
        &self,
        id: &str,
        prior: &Self::Config,
        planned: &Self::Config,
    ) -> Result<Self::State> {
        self.apply_changes(id, prior, planned)
            .await
            .map_err(|e| e.with_resource_id(id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.client.build_url(INSTANCE_URL, &[("instance_id", id)])?;
        let response = self
            .client
            .request(Method::DELETE, &url, &RequestOpts::new())
            .await;
        let Some(body) =
            found(response).map_err(|e| e.context(format!("error deleting {} {}", KIND, id)))?
        else {
            warn!("{} {} is already deleted", KIND, id);
            return Ok(());
        };
        wait_for_job(
            &self.client,
            &job_id(&body)?,
            self.waits.delete_job,
            self.timeouts.delete,
            &self.cancel,
        )
        .await?;
        info!("{} {} is deleted", KIND, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: &str) -> OpenGaussInstanceConfig {
        OpenGaussInstanceConfig {
            name: "og".to_owned(),
            flavor: "gaussdb.opengauss.ee.dn.m6.2xlarge.8.in".to_owned(),
            password: "Test@12345678".to_owned(),
            vpc_id: "vpc".to_owned(),
            subnet_id: "subnet".to_owned(),
            ha: HighAvailability {
                mode: mode.to_owned(),
                replication_mode: "sync".to_owned(),
                consistency: "strong".to_owned(),
                instance_mode: None,
            },
            volume: Volume {
                volume_type: "ULTRAHIGH".to_owned(),
                size: 40,
            },
            sharding_num: Some(3),
            coordinator_num: Some(2),
            replica_num: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn volume_covers_all_data_nodes() {
        assert_eq!(config(HA_MODE_DISTRIBUTED).total_volume_size(), 120);
        assert_eq!(config(HA_MODE_CENTRALIZED).total_volume_size(), 120);
        let mut single = config("single");
        single.replica_num = Some(9);
        assert_eq!(single.total_volume_size(), 40);
    }

    #[test]
    fn create_body_defaults() {
        let body = config(HA_MODE_DISTRIBUTED).create_body("cn-north-4", None);
        assert_eq!(body["datastore"], json!({"type": "GaussDB(for openGauss)"}));
        assert_eq!(body["region"], "cn-north-4");
        assert_eq!(body["volume"], json!({"type": "ULTRAHIGH", "size": 120}));
        assert_eq!(body["flavor_ref"], "gaussdb.opengauss.ee.dn.m6.2xlarge.8.in");
        assert!(body["port"].is_null());
        assert!(body["enterprise_project_id"].is_null());
    }

    #[test]
    fn enterprise_project_falls_back_to_provider() {
        let mut config = config(HA_MODE_DISTRIBUTED);
        let body = config.create_body("cn-north-4", Some("eps-provider"));
        assert_eq!(body["enterprise_project_id"], "eps-provider");

        config.enterprise_project_id = Some("eps-own".to_owned());
        let body = config.create_body("cn-north-4", Some("eps-provider"));
        assert_eq!(body["enterprise_project_id"], "eps-own");
    }

    #[test]
    fn coordinators_go_to_the_first_zone() {
        let mut config = config(HA_MODE_DISTRIBUTED);
        assert_eq!(config.first_availability_zone(), None);
        config.availability_zone = Some("cn-north-4a,cn-north-4b,cn-north-4c".to_owned());
        assert_eq!(config.first_availability_zone(), Some("cn-north-4a"));
    }

    #[test]
    fn state_counts_shards_and_coordinators() {
        let instance = json!({
            "id": "og-1",
            "status": "ACTIVE",
            "type": "Enterprise",
            "port": 8000,
            "volume": {"type": "ULTRAHIGH", "size": 120},
            "nodes": [
                {"id": "n1", "name": "og_gaussdbv5cn1"},
                {"id": "n2", "name": "og_gaussdbv5dn1"},
                {"id": "n3", "name": "og_gaussdbv5dn2"},
                {"id": "n4", "name": "og_gaussdbv5cn2"},
                {"id": "n5", "name": "og_gaussdbv5dn3"},
            ],
        });
        let state = OpenGaussInstanceState::from_response(&instance);

        assert_eq!(state.ha.mode, "enterprise");
        assert_eq!(state.port, "8000");
        assert_eq!(state.sharding_num, 3);
        assert_eq!(state.coordinator_num, 2);
        assert_eq!(state.volume.size, 120);
        assert_eq!(state.nodes.len(), 5);
    }
}
