use ::std::time::Duration;

use ::hwc_client::service_client::{RequestOpts, ServiceClient};
use ::hwc_common::{
    anyhow::anyhow,
    error::{HwcError, Result},
    path_search::{path_search_array, path_search_i64, path_search_str, path_search_string},
    serde::{Deserialize, Serialize},
    serde_json::{json, Value},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};
use ::hwc_waiter::{
    refresh::refreshed_or_deleted, Refreshed, RetryWithWaitForState, StateChangeConf,
    StateRefresh, DELETED,
};
use ::reqwest::Method;

use super::job::{job_id, wait_for_job};
use crate::{
    disappeared, ensure_unchanged, found, non_empty, strings, text, Resource, Timeouts,
    WaitSettings,
};

const KIND: &str = "GaussDB MySQL instance";
const INSTANCES_URL: &str = "v3/{project_id}/instances";
const INSTANCE_URL: &str = "v3/{project_id}/instances/{instance_id}";
const NAME_URL: &str = "v3/{project_id}/instances/{instance_id}/name";
const PASSWORD_URL: &str = "v3/{project_id}/instances/{instance_id}/password";
const VOLUME_URL: &str = "v3/{project_id}/instances/{instance_id}/volume/extend";
const ACTION_URL: &str = "v3/{project_id}/instances/{instance_id}/action";
const ENLARGE_NODES_URL: &str = "v3/{project_id}/instances/{instance_id}/nodes/enlarge";
const NODE_URL: &str = "v3/{project_id}/instances/{instance_id}/nodes/{node_id}";
const BACKUP_POLICY_URL: &str = "v3/{project_id}/instances/{instance_id}/backups/policy/update";

const DEFAULT_ENGINE: &str = "gaussdb-mysql";
const DEFAULT_VERSION: &str = "8.0";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct Datastore {
    pub engine: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde", default)]
pub struct BackupStrategy {
    pub start_time: String,
    pub keep_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde", default)]
pub struct MySqlInstanceConfig {
    pub name: String,
    pub flavor: String,
    pub password: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: Option<String>,
    pub configuration_id: Option<String>,
    pub enterprise_project_id: Option<String>,
    pub dedicated_resource_id: Option<String>,
    pub time_zone: String,
    pub read_replicas: i64,
    /// `single` or `multi`.
    pub availability_zone_mode: String,
    /// Required in `multi` mode.
    pub master_availability_zone: Option<String>,
    pub datastore: Option<Datastore>,
    pub volume_size: Option<i64>,
    pub table_name_case_sensitivity: bool,
    pub backup_strategy: Option<BackupStrategy>,
}

impl Default for MySqlInstanceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            flavor: String::new(),
            password: String::new(),
            vpc_id: String::new(),
            subnet_id: String::new(),
            security_group_id: None,
            configuration_id: None,
            enterprise_project_id: None,
            dedicated_resource_id: None,
            time_zone: "UTC+08:00".to_owned(),
            read_replicas: 1,
            availability_zone_mode: "single".to_owned(),
            master_availability_zone: None,
            datastore: None,
            volume_size: None,
            table_name_case_sensitivity: false,
            backup_strategy: None,
        }
    }
}

impl MySqlInstanceConfig {
    fn create_body(&self, region: &str, default_enterprise_project_id: Option<&str>) -> Result<Value> {
        let master_az = self
            .master_availability_zone
            .as_deref()
            .and_then(non_empty);
        if self.availability_zone_mode == "multi" && master_az.is_none() {
            return Err(HwcError::illegal_argument(anyhow!(
                "missing master_availability_zone in a multi availability zone mode"
            )));
        }
        let (engine, version) = match &self.datastore {
            Some(datastore) => (datastore.engine.as_str(), datastore.version.as_str()),
            None => (DEFAULT_ENGINE, DEFAULT_VERSION),
        };
        let opt = |v: &Option<String>| v.as_deref().and_then(non_empty).map(str::to_owned);
        Ok(json!({
            "name": self.name,
            "region": region,
            "mode": "Cluster",
            "flavor_ref": self.flavor,
            "vpc_id": self.vpc_id,
            "subnet_id": self.subnet_id,
            "security_group_id": opt(&self.security_group_id),
            "password": self.password,
            "time_zone": self.time_zone,
            "availability_zone_mode": self.availability_zone_mode,
            "slave_count": self.read_replicas,
            "master_availability_zone": master_az,
            "configuration_id": opt(&self.configuration_id),
            "enterprise_project_id": opt(&self.enterprise_project_id)
                .or_else(|| default_enterprise_project_id.and_then(non_empty).map(str::to_owned)),
            "dedicated_resource_id": opt(&self.dedicated_resource_id),
            "lower_case_table_names": self.table_name_case_sensitivity.then_some(0),
            "datastore": {"type": engine, "version": version},
            "backup_strategy": self.backup_strategy.as_ref().map(|b| json!({
                "start_time": b.start_time,
                "keep_days": b.keep_days.map(|d| d.to_string()),
            })),
            "volume": self.volume_size.map(|size| json!({ "size": size })),
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct MySqlNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub status: String,
    pub availability_zone: String,
    pub private_read_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct MySqlInstanceState {
    pub id: String,
    pub name: String,
    pub status: String,
    pub mode: String,
    pub flavor: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub configuration_id: String,
    pub db_user_name: String,
    pub time_zone: String,
    pub availability_zone_mode: String,
    pub master_availability_zone: String,
    pub description: String,
    pub port: Option<i64>,
    pub private_write_ip: String,
    pub maintain_begin: String,
    pub maintain_end: String,
    pub datastore: Datastore,
    pub backup_strategy: BackupStrategy,
    pub nodes: Vec<MySqlNode>,
    /// Read replicas which are serving.
    pub read_replicas: i64,
    pub volume_size: i64,
}

impl MySqlInstanceState {
    fn from_response(instance: &Value) -> Self {
        let raw_nodes = path_search_array("nodes", instance);
        let nodes: Vec<_> = raw_nodes
            .iter()
            .map(|node| MySqlNode {
                id: text("id", node),
                name: text("name", node),
                node_type: text("type", node),
                status: text("status", node),
                availability_zone: text("az_code", node),
                private_read_ip: text("private_read_ips[0]", node),
            })
            .collect();
        let read_replicas = nodes
            .iter()
            .filter(|n| n.node_type == "slave" && (n.status == "ACTIVE" || n.status == "BACKING UP"))
            .count() as i64;
        let volume_size = raw_nodes
            .iter()
            .map(|node| path_search_i64("volume.size", node, 0))
            .filter(|size| *size > 0)
            .last()
            .unwrap_or(0);
        let flavor = raw_nodes
            .iter()
            .map(|node| text("flavor_ref", node))
            .find(|flavor| !flavor.is_empty())
            .unwrap_or_default();
        let (maintain_begin, maintain_end) = path_search_str("maintenance_window", instance, "")
            .split_once('-')
            .map(|(begin, end)| (begin.to_owned(), end.to_owned()))
            .unwrap_or_default();
        let engine = match text("datastore.type", instance).as_str() {
            "GaussDB(for MySQL)" => DEFAULT_ENGINE.to_owned(),
            engine => engine.to_owned(),
        };
        Self {
            id: text("id", instance),
            name: text("name", instance),
            status: text("status", instance),
            mode: text("type", instance),
            flavor,
            vpc_id: text("vpc_id", instance),
            subnet_id: text("subnet_id", instance),
            security_group_id: text("security_group_id", instance),
            configuration_id: text("configuration_id", instance),
            db_user_name: text("db_user_name", instance),
            time_zone: text("time_zone", instance),
            availability_zone_mode: text("az_mode", instance),
            master_availability_zone: text("master_az_code", instance),
            description: text("alias", instance),
            port: text("port", instance).parse().ok(),
            private_write_ip: strings("private_write_ips", instance)
                .into_iter()
                .next()
                .unwrap_or_default(),
            maintain_begin,
            maintain_end,
            datastore: Datastore {
                engine,
                version: text("datastore.version", instance),
            },
            backup_strategy: BackupStrategy {
                start_time: text("backup_strategy.start_time", instance),
                keep_days: text("backup_strategy.keep_days", instance).parse().ok(),
            },
            nodes,
            read_replicas,
            volume_size,
        }
    }
}

/// Polling stages of [MySqlInstance].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MySqlWaits {
    /// `BUILD` to `ACTIVE`.
    pub create: WaitSettings,
    /// `BACKING UP` right after `ACTIVE` to `ACTIVE` again.
    pub settle: WaitSettings,
    /// Instance idle before every mutating request.
    pub idle: WaitSettings,
    pub job: WaitSettings,
    /// Until the instance is gone.
    pub delete: WaitSettings,
}

impl Default for MySqlWaits {
    fn default() -> Self {
        Self {
            create: WaitSettings::from_secs(180, 20),
            settle: WaitSettings::from_secs(1, 5),
            idle: WaitSettings::from_secs(10, 10),
            job: WaitSettings::from_secs(10, 10),
            delete: WaitSettings::from_secs(10, 10),
        }
    }
}

pub struct MySqlInstance {
    client: ServiceClient,
    region: String,
    enterprise_project_id: Option<String>,
    timeouts: Timeouts,
    waits: MySqlWaits,
    cancel: CancellationToken,
}

impl MySqlInstance {
    pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts::new(
        Duration::from_secs(60 * 60),
        Duration::from_secs(60 * 60),
        Duration::from_secs(30 * 60),
    );

    pub fn new(client: ServiceClient, region: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            client,
            region: region.into(),
            enterprise_project_id: None,
            timeouts: Self::DEFAULT_TIMEOUTS,
            waits: MySqlWaits::default(),
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

    pub fn with_waits(mut self, waits: MySqlWaits) -> Self {
        self.waits = waits;
        self
    }

    async fn get(&self, id: &str) -> Result<Value> {
        let url = self.client.build_url(INSTANCE_URL, &[("instance_id", id)])?;
        self.client
            .request(Method::GET, &url, &RequestOpts::new())
            .await
    }

    /// An instance without id is reported as deleted, like a 404.
    async fn refresh(&self, id: &str) -> Result<Refreshed<Value>> {
        let refreshed = refreshed_or_deleted(self.get(id).await, "instance.status")?;
        if refreshed.state != DELETED && path_search_str("instance.id", &refreshed.object, "").is_empty() {
            return Ok(Refreshed::new(Value::Null, DELETED));
        }
        Ok(refreshed)
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

    async fn wait_until_active(&self, id: &str, settings: WaitSettings) -> Result<()> {
        self.state_change(id, settings)
            .pending(["BUILD", "BACKING UP"])
            .target(["ACTIVE"])
            .timeout(self.timeouts.create)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for {} {} to become ready", KIND, id)))?;
        Ok(())
    }

    async fn provision(&self, id: &str) -> Result<MySqlInstanceState> {
        self.wait_until_active(id, self.waits.create).await?;
        // The first backup starts right after the instance becomes active.
        self.wait_until_active(id, self.waits.settle).await?;
        self.read(id).await?.ok_or_else(|| disappeared(KIND, id))
    }

    async fn rename(&self, id: &str, name: &str) -> Result<()> {
        let url = self.client.build_url(NAME_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({ "name": name }));
        let body = self
            .retry_on_conflict(id, Method::PUT, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error updating name for {} {}", KIND, id)))?;
        wait_for_job(
            &self.client,
            &job_id(&body)?,
            self.waits.job,
            self.timeouts.update,
            &self.cancel,
        )
        .await?;
        Ok(())
    }

    async fn change_password(&self, id: &str, password: &str) -> Result<()> {
        let url = self.client.build_url(PASSWORD_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({ "password": password }));
        self.retry_on_conflict(id, Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error updating password for {} {}", KIND, id)))?;
        Ok(())
    }

    async fn extend_volume(&self, id: &str, size: i64) -> Result<()> {
        let url = self.client.build_url(VOLUME_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({ "size": size }));
        let body = self
            .retry_on_conflict(id, Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error extending volume of {} {}", KIND, id)))?;
        self.wait_for_jobs(id, &body, "volume").await
    }

    /// Wait for every job of a comma separated `job_id`, if any.
    async fn wait_for_jobs(&self, id: &str, body: &Value, what: &str) -> Result<()> {
        let Some(jobs) = path_search_string("job_id", body).filter(|jobs| !jobs.is_empty()) else {
            debug!("Updating {} of {} {} returned no job", what, KIND, id);
            return Ok(());
        };
        for job in jobs.split(',').map(str::trim).filter(|job| !job.is_empty()) {
            wait_for_job(
                &self.client,
                job,
                self.waits.job,
                self.timeouts.update,
                &self.cancel,
            )
            .await?;
        }
        Ok(())
    }

    async fn update_flavor(&self, id: &str, flavor: &str) -> Result<()> {
        let url = self.client.build_url(ACTION_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({
            "resize_flavor": { "spec_code": flavor },
        }));
        let body = self
            .retry_on_conflict(id, Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error updating flavor for {} {}", KIND, id)))?;
        self.wait_for_jobs(id, &body, "flavor").await
    }

    async fn add_read_replicas(&self, id: &str, count: i64) -> Result<()> {
        info!("Adding {} read replicas to {} {}", count, KIND, id);
        let url = self
            .client
            .build_url(ENLARGE_NODES_URL, &[("instance_id", id)])?;
        let priorities: Vec<_> = (0..count).map(|_| 1).collect();
        let opts = RequestOpts::new().json_body(json!({ "priorities": priorities }));
        let body = self
            .retry_on_conflict(id, Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error creating read replicas for {} {}", KIND, id)))?;
        self.wait_for_jobs(id, &body, "read_replicas").await
    }

    /// Delete `count` serving read replicas, at least one of them is kept.
    async fn remove_read_replicas(&self, id: &str, count: i64) -> Result<()> {
        let instance = self.get(id).await?;
        let slaves: Vec<_> = MySqlInstanceState::from_response(
            instance.get("instance").unwrap_or(&Value::Null),
        )
        .nodes
        .into_iter()
        .filter(|node| node.node_type == "slave" && node.status == "ACTIVE")
        .map(|node| node.id)
        .collect();
        debug!("Serving read replicas of {} {}: {:?}", KIND, id, slaves);
        if slaves.len() as i64 <= count {
            return Err(HwcError::illegal_argument(anyhow!(
                "cannot delete {} read replicas of {} {} which has only {} serving",
                count,
                KIND,
                id,
                slaves.len()
            )));
        }
        for node_id in slaves.iter().take(count as usize) {
            info!("Deleting read replica {} of {} {}", node_id, KIND, id);
            let url = self
                .client
                .build_url(NODE_URL, &[("instance_id", id), ("node_id", node_id)])?;
            let body = self
                .retry_on_conflict(id, Method::DELETE, &url, &RequestOpts::new())
                .await
                .map_err(|e| {
                    e.context(format!("error deleting read replica {} of {} {}", node_id, KIND, id))
                })?;
            self.wait_for_jobs(id, &body, "read_replicas").await?;
        }
        Ok(())
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
            }
        }));
        self.client
            .request(Method::PUT, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error updating backup strategy for {} {}", KIND, id)))?;
        Ok(())
    }

    async fn apply_changes(
        &self,
        id: &str,
        prior: &MySqlInstanceConfig,
        planned: &MySqlInstanceConfig,
    ) -> Result<MySqlInstanceState> {
        ensure_unchanged(
            KIND,
            &[
                ("vpc_id", prior.vpc_id != planned.vpc_id),
                ("subnet_id", prior.subnet_id != planned.subnet_id),
                ("security_group_id", prior.security_group_id != planned.security_group_id),
                ("configuration_id", prior.configuration_id != planned.configuration_id),
                (
                    "enterprise_project_id",
                    prior.enterprise_project_id != planned.enterprise_project_id,
                ),
                (
                    "dedicated_resource_id",
                    prior.dedicated_resource_id != planned.dedicated_resource_id,
                ),
                ("time_zone", prior.time_zone != planned.time_zone),
                (
                    "availability_zone_mode",
                    prior.availability_zone_mode != planned.availability_zone_mode,
                ),
                (
                    "master_availability_zone",
                    prior.master_availability_zone != planned.master_availability_zone,
                ),
                ("datastore", prior.datastore != planned.datastore),
                (
                    "table_name_case_sensitivity",
                    prior.table_name_case_sensitivity != planned.table_name_case_sensitivity,
                ),
                ("volume_size", prior.volume_size.is_some() && planned.volume_size.is_none()),
                (
                    "backup_strategy",
                    prior.backup_strategy.is_some() && planned.backup_strategy.is_none(),
                ),
            ],
        )?;

        if prior.name != planned.name {
            self.rename(id, &planned.name).await?;
        }
        if prior.password != planned.password {
            self.change_password(id, &planned.password).await?;
        }
        if prior.flavor != planned.flavor {
            self.update_flavor(id, &planned.flavor).await?;
        }
        if planned.read_replicas > prior.read_replicas {
            self.add_read_replicas(id, planned.read_replicas - prior.read_replicas)
                .await?;
        }
        if planned.read_replicas < prior.read_replicas {
            self.remove_read_replicas(id, prior.read_replicas - planned.read_replicas)
                .await?;
        }
        if prior.volume_size != planned.volume_size {
            if let Some(size) = planned.volume_size {
                self.extend_volume(id, size).await?;
            }
        }
        if prior.backup_strategy != planned.backup_strategy {
            if let Some(backup) = &planned.backup_strategy {
                self.update_backup_strategy(id, backup).await?;
            }
        }
        self.read(id).await?.ok_or_else(|| disappeared(KIND, id))
    }
}

impl Resource for MySqlInstance {
    type Config = MySqlInstanceConfig;
    type State = MySqlInstanceState;

    async fn create(&self, config: &Self::Config) -> Result<Self::State> {
        let url = self.client.build_url(INSTANCES_URL, &[])?;
        let opts = RequestOpts::new().json_body(
            config.create_body(&self.region, self.enterprise_project_id.as_deref())?,
        );
        let body = self
            .client
            .request(Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error creating {}", KIND)))?;
        let id = path_search_string("instance.id", &body)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                HwcError::deserialize_failed(anyhow!("instance.id is not found in API response"))
            })?;
        info!("{} {} is created, waiting for it to be active", KIND, id);
        self.provision(&id)
            .await
            .map_err(|e| e.with_resource_id(&id))
    }

    async fn read(&self, id: &str) -> Result<Option<Self::State>> {
        let instance = found(self.get(id).await)?
            .and_then(|body| body.get("instance").cloned())
            .filter(|instance| !text("id", instance).is_empty());
        match instance {
            Some(instance) => Ok(Some(MySqlInstanceState::from_response(&instance))),
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
            .request(Method::DELETE, &url, &RequestOpts::new().ok_codes(&[200, 202]))
            .await;
        if found(response)
            .map_err(|e| e.context(format!("error deleting {} {}", KIND, id)))?
            .is_none()
        {
            warn!("{} {} is already deleted", KIND, id);
            return Ok(());
        }
        self.state_change(id, self.waits.delete)
            .pending(["ACTIVE", "BACKING UP", "FAILED"])
            .target([DELETED])
            .timeout(self.timeouts.delete)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for {} {} to be deleted", KIND, id)))?;
        info!("{} {} is deleted", KIND, id);
        Ok(())
    }
}
