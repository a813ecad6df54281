use ::std::time::Duration;

use ::hwc_client::service_client::{RequestOpts, ServiceClient};
use ::hwc_common::{
    anyhow::anyhow,
    error::{HwcError, Result},
    path_search::{path_search_array, path_search_bool, path_search_i64, path_search_string},
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

use crate::{
    disappeared, ensure_unchanged, found, non_empty, strings, text, Resource, Timeouts,
    WaitSettings,
};

const KIND: &str = "RocketMQ instance";
const CREATE_URL: &str = "v2/reliability/{project_id}/instances";
const INSTANCE_URL: &str = "v2/{project_id}/instances/{instance_id}";
const EXTEND_URL: &str = "v2/rocketmq/{project_id}/instances/{instance_id}/extend";
const CONFIGS_URL: &str = "v2/{project_id}/rocketmq/instances/{instance_id}/configs";
const TLS_MODE_URL: &str = "v2/{project_id}/rocketmq/instances/{instance_id}/plain-ssl-switch";
const TASKS_URL: &str = "v2/{project_id}/instances/{instance_id}/tasks";
const TASK_URL: &str = "v2/{project_id}/instances/{instance_id}/tasks/{task_id}";

const BIND_EIP_TASK: &str = "bindInstancePublicIp";
const UNBIND_EIP_TASK: &str = "unbindInstancePublicIp";

/// One broker parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct RocketMqParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(crate = "hwc_common::serde", default)]
pub struct RocketMqInstanceConfig {
    pub name: String,
    pub engine_version: String,
    pub flavor_id: String,
    pub storage_spec_code: String,
    pub storage_space: i64,
    pub broker_num: i64,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    /// Availability zone ids.
    pub availability_zones: Vec<String>,
    pub description: Option<String>,
    pub enable_acl: bool,
    pub ssl_enable: bool,
    pub ipv6_enable: bool,
    pub enable_publicip: bool,
    pub publicip_id: Option<String>,
    pub enterprise_project_id: Option<String>,
    pub tls_mode: Option<String>,
    pub configs: Vec<RocketMqParameter>,
}

impl RocketMqInstanceConfig {
    /// Public IP bound to the instance, if any.
    fn public_ip(&self) -> Option<&str> {
        self.enable_publicip
            .then(|| self.publicip_id.as_deref().and_then(non_empty))
            .flatten()
    }

    fn create_body(&self, default_enterprise_project_id: Option<&str>) -> Value {
        json!({
            "name": non_empty(&self.name),
            "description": self.description.as_deref().and_then(non_empty),
            "engine": "reliability",
            "engine_version": non_empty(&self.engine_version),
            "storage_space": (self.storage_space > 0).then_some(self.storage_space),
            "vpc_id": non_empty(&self.vpc_id),
            "subnet_id": non_empty(&self.subnet_id),
            "security_group_id": non_empty(&self.security_group_id),
            "available_zones": self.availability_zones,
            "product_id": non_empty(&self.flavor_id),
            "storage_spec_code": non_empty(&self.storage_spec_code),
            "broker_num": (self.broker_num > 0).then_some(self.broker_num),
            "enable_acl": self.enable_acl.then_some(true),
            "ssl_enable": self.ssl_enable.then_some(true),
            "ipv6_enable": self.ipv6_enable.then_some(true),
            "enable_publicip": self.enable_publicip.then_some(true),
            "publicip_id": self.publicip_id.as_deref().and_then(non_empty),
            "enterprise_project_id": self
                .enterprise_project_id
                .as_deref()
                .and_then(non_empty)
                .or_else(|| default_enterprise_project_id.and_then(non_empty)),
            "tls_mode": self.tls_mode.as_deref().and_then(non_empty),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(crate = "hwc_common::serde")]
pub struct RocketMqInstanceState {
    pub id: String,
    pub name: String,
    pub status: String,
    pub description: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub specification: String,
    pub engine_version: String,
    pub flavor_id: String,
    pub storage_space: i64,
    pub used_storage_space: i64,
    pub broker_num: i64,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub availability_zones: Vec<String>,
    pub namesrv_address: String,
    pub broker_address: String,
    pub public_namesrv_address: String,
    pub enable_acl: bool,
    pub ssl_enable: bool,
    pub tls_mode: String,
    pub enterprise_project_id: String,
    pub maintain_begin: String,
    pub maintain_end: String,
    pub charging_mode: String,
    pub configs: Vec<RocketMqParameter>,
}

impl RocketMqInstanceState {
    fn from_response(id: &str, body: &Value, configs: Vec<RocketMqParameter>) -> Self {
        // 0 is yearly/monthly, 1 is pay-per-use.
        let charging_mode = match path_search_i64("charging_mode", body, 1) {
            0 => "prePaid",
            _ => "postPaid",
        };
        Self {
            id: id.to_owned(),
            name: text("name", body),
            status: text("status", body),
            description: text("description", body),
            instance_type: text("type", body),
            specification: text("specification", body),
            engine_version: text("engine_version", body),
            flavor_id: text("product_id", body),
            storage_space: path_search_i64("total_storage_space", body, 0),
            used_storage_space: path_search_i64("used_storage_space", body, 0),
            broker_num: path_search_i64("broker_num", body, 0),
            vpc_id: text("vpc_id", body),
            subnet_id: text("subnet_id", body),
            security_group_id: text("security_group_id", body),
            availability_zones: strings("available_zones", body),
            namesrv_address: text("namesrv_address", body),
            broker_address: text("broker_address", body),
            public_namesrv_address: text("public_namesrv_address", body),
            enable_acl: path_search_bool("enable_acl", body, false),
            ssl_enable: path_search_bool("ssl_enable", body, false),
            tls_mode: text("tls_mode", body),
            enterprise_project_id: text("enterprise_project_id", body),
            maintain_begin: text("maintain_begin", body),
            maintain_end: text("maintain_end", body),
            charging_mode: charging_mode.to_owned(),
            configs,
        }
    }
}

/// Polling stages of [RocketMqInstance].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RocketMqWaits {
    /// `CREATING` to `RUNNING`.
    pub create: WaitSettings,
    /// Instance idle before every mutating request.
    pub idle: WaitSettings,
    /// `EXTENDING` to `RUNNING`.
    pub extend: WaitSettings,
    /// Background task of a public IP or TLS mode change.
    pub task: WaitSettings,
    /// Until the instance is gone.
    pub delete: WaitSettings,
}

impl Default for RocketMqWaits {
    fn default() -> Self {
        Self {
            create: WaitSettings::from_secs(300, 10),
            idle: WaitSettings::from_secs(10, 10),
            extend: WaitSettings::from_secs(60, 10),
            task: WaitSettings::from_secs(5, 15),
            delete: WaitSettings::from_secs(90, 15),
        }
    }
}

/// Background task of an instance.
#[derive(Debug, Clone, Copy)]
enum Task<'a> {
    Named(&'a str),
    Id(&'a str),
}

pub struct RocketMqInstance {
    client: ServiceClient,
    enterprise_project_id: Option<String>,
    timeouts: Timeouts,
    waits: RocketMqWaits,
    cancel: CancellationToken,
}

impl RocketMqInstance {
    pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts::new(
        Duration::from_secs(50 * 60),
        Duration::from_secs(50 * 60),
        Duration::from_secs(15 * 60),
    );

    pub fn new(client: ServiceClient, cancel: CancellationToken) -> Self {
        Self {
            client,
            enterprise_project_id: None,
            timeouts: Self::DEFAULT_TIMEOUTS,
            waits: RocketMqWaits::default(),
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

    pub fn with_waits(mut self, waits: RocketMqWaits) -> Self {
        self.waits = waits;
        self
    }

    async fn refresh(&self, id: &str) -> Result<Refreshed<Value>> {
        let url = self.client.build_url(INSTANCE_URL, &[("instance_id", id)])?;
        let response = self
            .client
            .request(Method::GET, &url, &RequestOpts::new().ok_codes(&[200]))
            .await;
        refreshed_or_deleted(response, "status")
    }

    fn state_change<'a>(
        &'a self,
        id: &'a str,
        settings: WaitSettings,
    ) -> StateChangeConf<impl StateRefresh<Object = Value> + 'a> {
        settings.state_change(move || self.refresh(id))
    }

    /// Send a mutating request once the instance is `RUNNING`, again while another operation is in progress.
    async fn retry_on_conflict(
        &self,
        id: &str,
        method: Method,
        url: &str,
        opts: &RequestOpts,
        timeout: Duration,
    ) -> Result<Value> {
        let client = &self.client;
        let idle = self.state_change(id, self.waits.idle).target(["RUNNING"]);
        RetryWithWaitForState::new(idle, timeout)
            .run(
                move || client.request(method.clone(), url, opts),
                &self.cancel,
            )
            .await
    }

    async fn resize(&self, id: &str, body: Value) -> Result<()> {
        debug!("Resize {} {}: {}", KIND, id, body);
        let url = self.client.build_url(EXTEND_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(body);
        self.retry_on_conflict(id, Method::POST, &url, &opts, self.timeouts.update)
            .await
            .map_err(|e| e.context(format!("error resizing {} {}", KIND, id)))?;
        self.state_change(id, self.waits.extend)
            .pending(["EXTENDING"])
            .target(["RUNNING"])
            .timeout(self.timeouts.update)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for {} {} to resize", KIND, id)))?;
        Ok(())
    }

    /// A task which is not listed yet is reported with an empty status.
    async fn task_status(&self, id: &str, task: Task<'_>) -> Result<Refreshed<Value>> {
        let (url, key, value) = match task {
            Task::Named(name) => (
                self.client.build_url(TASKS_URL, &[("instance_id", id)])?,
                "name",
                name,
            ),
            Task::Id(task_id) => (
                self.client
                    .build_url(TASK_URL, &[("instance_id", id), ("task_id", task_id)])?,
                "id",
                task_id,
            ),
        };
        let body = self
            .client
            .request(Method::GET, &url, &RequestOpts::new())
            .await?;
        let found = path_search_array("tasks", &body)
            .iter()
            .find(|t| text(key, t) == value)
            .cloned();
        Ok(match found {
            Some(t) => {
                let status = text("status", &t);
                Refreshed::new(t, status)
            }
            None => Refreshed::new(Value::Null, ""),
        })
    }

    async fn wait_for_task(&self, id: &str, task: Task<'_>) -> Result<()> {
        self.waits
            .task
            .state_change(move || self.task_status(id, task))
            .pending(["", "CREATED"])
            .target(["SUCCESS"])
            .failure(["FAILED"])
            .timeout(self.timeouts.update)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for task {:?} of {} {}", task, KIND, id)))?;
        Ok(())
    }

    /// Bind `public_ip`, or unbind the current one with `None`.
    async fn switch_public_ip(&self, id: &str, public_ip: Option<&str>) -> Result<()> {
        let (body, task) = match public_ip {
            Some(public_ip) => (
                json!({"enable_publicip": true, "publicip_id": public_ip}),
                BIND_EIP_TASK,
            ),
            None => (json!({"enable_publicip": false}), UNBIND_EIP_TASK),
        };
        let url = self.client.build_url(INSTANCE_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(body);
        self.retry_on_conflict(id, Method::PUT, &url, &opts, self.timeouts.update)
            .await
            .map_err(|e| e.context(format!("error updating {} {} with {}", KIND, id, task)))?;
        self.wait_for_task(id, Task::Named(task)).await
    }

    async fn update_tls_mode(&self, id: &str, tls_mode: &str) -> Result<()> {
        let url = self.client.build_url(TLS_MODE_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new().json_body(json!({ "tls_mode": tls_mode }));
        let body = self
            .retry_on_conflict(id, Method::POST, &url, &opts, self.timeouts.update)
            .await
            .map_err(|e| e.context(format!("error updating SSL mode of {} {}", KIND, id)))?;
        match path_search_string("job_id", &body).filter(|job| !job.is_empty()) {
            Some(job) => self.wait_for_task(id, Task::Id(&job)).await,
            None => {
                debug!("SSL mode switch of {} {} returned no job", KIND, id);
                Ok(())
            }
        }
    }

    async fn update_configs(
        &self,
        id: &str,
        configs: &[RocketMqParameter],
        timeout: Duration,
    ) -> Result<()> {
        let url = self.client.build_url(CONFIGS_URL, &[("instance_id", id)])?;
        let opts = RequestOpts::new()
            .json_body(json!({ "rocketmq_configs": configs }))
            .ok_codes(&[204]);
        self.retry_on_conflict(id, Method::PUT, &url, &opts, timeout)
            .await
            .map_err(|e| e.context(format!("error updating configs of {} {}", KIND, id)))?;
        Ok(())
    }

    async fn read_configs(&self, id: &str) -> Result<Vec<RocketMqParameter>> {
        let url = self.client.build_url(CONFIGS_URL, &[("instance_id", id)])?;
        let body = self
            .client
            .request(Method::GET, &url, &RequestOpts::new())
            .await?;
        Ok(path_search_array("rocketmq_configs", &body)
            .iter()
            .filter_map(|config| {
                Some(RocketMqParameter {
                    name: path_search_string("name", config)?,
                    value: text("value", config),
                })
            })
            .collect())
    }

    async fn provision(&self, id: &str, config: &RocketMqInstanceConfig) -> Result<RocketMqInstanceState> {
        self.state_change(id, self.waits.create)
            .pending(["CREATING"])
            .target(["RUNNING"])
            .timeout(self.timeouts.create)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for {} {} to create", KIND, id)))?;
        if !config.configs.is_empty() {
            self.update_configs(id, &config.configs, self.timeouts.create)
                .await?;
        }
        self.read(id).await?.ok_or_else(|| disappeared(KIND, id))
    }

    async fn apply_changes(
        &self,
        id: &str,
        prior: &RocketMqInstanceConfig,
        planned: &RocketMqInstanceConfig,
    ) -> Result<RocketMqInstanceState> {
        let dropped_configs = prior
            .configs
            .iter()
            .any(|old| !planned.configs.iter().any(|new| new.name == old.name));
        ensure_unchanged(
            KIND,
            &[
                ("engine_version", prior.engine_version != planned.engine_version),
                ("storage_spec_code", prior.storage_spec_code != planned.storage_spec_code),
                ("vpc_id", prior.vpc_id != planned.vpc_id),
                ("subnet_id", prior.subnet_id != planned.subnet_id),
                ("availability_zones", prior.availability_zones != planned.availability_zones),
                ("ssl_enable", prior.ssl_enable != planned.ssl_enable),
                ("ipv6_enable", prior.ipv6_enable != planned.ipv6_enable),
                (
                    "enterprise_project_id",
                    prior.enterprise_project_id != planned.enterprise_project_id,
                ),
                ("configs", dropped_configs),
                ("tls_mode", prior.tls_mode.is_some() && planned.tls_mode.is_none()),
            ],
        )?;
        if planned.enable_publicip && planned.public_ip().is_none() {
            return Err(HwcError::illegal_argument(anyhow!(
                "publicip_id is required to enable the public access"
            )));
        }

        let name_changed = prior.name != planned.name;
        let acl_changed = prior.enable_acl != planned.enable_acl;
        if name_changed
            || acl_changed
            || prior.description != planned.description
            || prior.security_group_id != planned.security_group_id
        {
            let mut body = json!({
                "description": planned.description.as_deref().and_then(non_empty),
                "security_group_id": non_empty(&planned.security_group_id),
            });
            if acl_changed {
                body["enable_acl"] = json!(planned.enable_acl);
            }
            if name_changed {
                body["name"] = json!(non_empty(&planned.name));
            }
            let url = self.client.build_url(INSTANCE_URL, &[("instance_id", id)])?;
            let opts = RequestOpts::new().json_body(body).ok_codes(&[204]);
            self.retry_on_conflict(id, Method::PUT, &url, &opts, self.timeouts.update)
                .await
                .map_err(|e| e.context(format!("error updating {} {}", KIND, id)))?;
        }

        let public_ip_changed = prior.public_ip() != planned.public_ip();
        if public_ip_changed && prior.public_ip().is_some() {
            self.switch_public_ip(id, None).await?;
        }

        if prior.flavor_id != planned.flavor_id {
            self.resize(
                id,
                json!({"oper_type": "vertical", "new_product_id": planned.flavor_id}),
            )
            .await?;
        }
        if prior.broker_num != planned.broker_num {
            self.resize(
                id,
                json!({"oper_type": "horizontal", "new_broker_num": planned.broker_num}),
            )
            .await?;
        }
        if prior.storage_space != planned.storage_space {
            self.resize(
                id,
                json!({"oper_type": "storage", "new_storage_space": planned.storage_space}),
            )
            .await?;
        }

        if public_ip_changed {
            if let Some(public_ip) = planned.public_ip() {
                self.switch_public_ip(id, Some(public_ip)).await?;
            }
        }

        let changed_configs: Vec<_> = planned
            .configs
            .iter()
            .filter(|config| !prior.configs.contains(config))
            .cloned()
            .collect();
        if !changed_configs.is_empty() {
            self.update_configs(id, &changed_configs, self.timeouts.update)
                .await?;
        }

        if prior.tls_mode != planned.tls_mode {
            if let Some(tls_mode) = planned.tls_mode.as_deref().and_then(non_empty) {
                self.update_tls_mode(id, tls_mode).await?;
            }
        }

        self.read(id).await?.ok_or_else(|| disappeared(KIND, id))
    }
}

impl Resource for RocketMqInstance {
    type Config = RocketMqInstanceConfig;
    type State = RocketMqInstanceState;

    async fn create(&self, config: &Self::Config) -> Result<Self::State> {
        let url = self.client.build_url(CREATE_URL, &[])?;
        let opts = RequestOpts::new()
            .json_body(config.create_body(self.enterprise_project_id.as_deref()))
            .ok_codes(&[200]);
        let body = self
            .client
            .request(Method::POST, &url, &opts)
            .await
            .map_err(|e| e.context(format!("error creating {}", KIND)))?;
        let id = path_search_string("instance_id", &body)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                HwcError::deserialize_failed(anyhow!(
                    "unable to find instance ID from the API response"
                ))
            })?;
        info!("{} {} is created, waiting for it to be running", KIND, id);
        self.provision(&id, config)
            .await
            .map_err(|e| e.with_resource_id(&id))
    }

    async fn read(&self, id: &str) -> Result<Option<Self::State>> {
        let url = self.client.build_url(INSTANCE_URL, &[("instance_id", id)])?;
        let response = self
            .client
            .request(Method::GET, &url, &RequestOpts::new().ok_codes(&[200]))
            .await;
        let Some(body) = found(response)? else {
            warn!("{} {} does not exist", KIND, id);
            return Ok(None);
        };
        let configs = self.read_configs(id).await?;
        Ok(Some(RocketMqInstanceState::from_response(id, &body, configs)))
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
            .request(Method::DELETE, &url, &RequestOpts::new().ok_codes(&[204]))
            .await;
        if found(response)
            .map_err(|e| e.context(format!("error deleting {} {}", KIND, id)))?
            .is_none()
        {
            warn!("{} {} is already deleted", KIND, id);
            return Ok(());
        }
        self.state_change(id, self.waits.delete)
            .pending(["DELETING", "RUNNING", "ERROR"])
            .target([DELETED])
            .timeout(self.timeouts.delete)
            .wait_for_state(&self.cancel)
            .await
            .map_err(|e| e.context(format!("error waiting for {} {} to delete", KIND, id)))?;
        info!("{} {} is deleted", KIND, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_skips_empty_values() {
        let config = RocketMqInstanceConfig {
            name: "mq".to_owned(),
            engine_version: "4.8.0".to_owned(),
            flavor_id: "c6.4u8g.cluster".to_owned(),
            storage_spec_code: "dms.physical.storage.high.v2".to_owned(),
            storage_space: 600,
            broker_num: 1,
            vpc_id: "vpc".to_owned(),
            subnet_id: "subnet".to_owned(),
            security_group_id: "sg".to_owned(),
            availability_zones: vec!["az1".to_owned()],
            description: Some(String::new()),
            ..Default::default()
        };
        let body = ::hwc_client::service_client::remove_nil(config.create_body(None));

        assert_eq!(body["engine"], "reliability");
        assert_eq!(body["product_id"], "c6.4u8g.cluster");
        assert_eq!(body["available_zones"], json!(["az1"]));
        for absent in ["description", "enable_acl", "publicip_id", "tls_mode"] {
            assert!(body.get(absent).is_none(), "{} should be dropped", absent);
        }
    }

    #[test]
    fn provider_enterprise_project_is_the_default() {
        let mut config = RocketMqInstanceConfig::default();
        let body = config.create_body(Some("eps-provider"));
        assert_eq!(body["enterprise_project_id"], "eps-provider");

        config.enterprise_project_id = Some("eps-own".to_owned());
        let body = config.create_body(Some("eps-provider"));
        assert_eq!(body["enterprise_project_id"], "eps-own");
    }

    #[test]
    fn public_ip_needs_enabling() {
        let mut config = RocketMqInstanceConfig {
            publicip_id: Some("eip-1".to_owned()),
            ..Default::default()
        };
        assert_eq!(config.public_ip(), None);
        config.enable_publicip = true;
        assert_eq!(config.public_ip(), Some("eip-1"));
        config.publicip_id = Some(String::new());
        assert_eq!(config.public_ip(), None);
    }

    #[test]
    fn state_from_response() {
        let body = json!({
            "name": "mq",
            "status": "RUNNING",
            "product_id": "c6.4u8g.cluster",
            "total_storage_space": 600,
            "used_storage_space": 12,
            "broker_num": 2,
            "enable_acl": true,
            "charging_mode": 0,
            "available_zones": ["az1", "az2"],
        });
        let state = RocketMqInstanceState::from_response("abc", &body, Vec::new());

        assert_eq!(state.id, "abc");
        assert_eq!(state.flavor_id, "c6.4u8g.cluster");
        assert_eq!(state.storage_space, 600);
        assert_eq!(state.broker_num, 2);
        assert!(state.enable_acl);
        assert_eq!(state.charging_mode, "prePaid");
        assert_eq!(state.availability_zones, vec!["az1", "az2"]);
        assert_eq!(state.tls_mode, "");
    }
}
