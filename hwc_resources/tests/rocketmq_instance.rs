mod common;

use ::std::time::Duration;

use ::httpmock::prelude::*;
use ::hwc_common::{error::HwcErrorType, serde_json::json, tokio, tokio_util::sync::CancellationToken};
use ::hwc_resources::{
    rocketmq::{RocketMqInstance, RocketMqInstanceConfig, RocketMqParameter, RocketMqWaits},
    Resource,
};

use common::{client, served, NO_WAIT, SHORT_TIMEOUTS};

const INSTANCE_PATH: &str = "/v2/0123/instances/abc";
const CONFIGS_PATH: &str = "/v2/0123/rocketmq/instances/abc/configs";

fn instance(server: &MockServer) -> RocketMqInstance {
    RocketMqInstance::new(client(server), CancellationToken::new())
        .with_timeouts(SHORT_TIMEOUTS)
        .with_waits(RocketMqWaits {
            create: NO_WAIT,
            idle: NO_WAIT,
            extend: NO_WAIT,
            task: NO_WAIT,
            delete: NO_WAIT,
        })
}

fn config() -> RocketMqInstanceConfig {
    RocketMqInstanceConfig {
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
        ..Default::default()
    }
}

fn running_body() -> ::hwc_common::serde_json::Value {
    json!({
        "instance_id": "abc",
        "name": "mq",
        "status": "RUNNING",
        "product_id": "c6.4u8g.cluster",
        "total_storage_space": 600,
        "broker_num": 1,
        "charging_mode": 1,
    })
}

#[tokio::test]
async fn create_waits_until_running() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/reliability/0123/instances")
            .json_body_partial(r#"{"name": "mq", "engine": "reliability", "broker_num": 1}"#);
        then.status(200).json_body(json!({"instance_id": "abc"}));
    });
    let get = server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200).json_body(running_body());
    });
    let configs = server.mock(|when, then| {
        when.method(GET).path(CONFIGS_PATH);
        then.status(200).json_body(json!({
            "rocketmq_configs": [{"name": "fileReservedTime", "value": "48"}]
        }));
    });

    let state = instance(&server).create(&config()).await.unwrap();

    create.assert();
    // the wait and the final read
    get.assert_hits(2);
    configs.assert();
    assert_eq!(state.id, "abc");
    assert_eq!(state.status, "RUNNING");
    assert_eq!(state.charging_mode, "postPaid");
    assert_eq!(
        state.configs,
        vec![RocketMqParameter {
            name: "fileReservedTime".to_owned(),
            value: "48".to_owned(),
        }]
    );
}

#[tokio::test]
async fn create_failure_keeps_instance_id() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/reliability/0123/instances");
        then.status(200).json_body(json!({"instance_id": "abc"}));
    });
    server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200)
            .json_body(json!({"instance_id": "abc", "status": "CREATEFAILED"}));
    });

    let err = instance(&server).create(&config()).await.unwrap_err();

    assert_eq!(err.get_error_type(), HwcErrorType::UnexpectedState);
    assert_eq!(err.resource_id(), Some("abc"));
}

#[tokio::test]
async fn create_without_instance_id() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v2/reliability/0123/instances");
        then.status(200).json_body(json!({}));
    });

    let err = instance(&server).create(&config()).await.unwrap_err();

    assert_eq!(err.get_error_type(), HwcErrorType::DeserializeFailed);
    assert_eq!(err.resource_id(), None);
}

#[tokio::test]
async fn read_missing_instance() {
    let server = MockServer::start();
    let get = server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(404).json_body(json!({
            "error_code": "DMS.00404022",
            "error_msg": "The instance does not exist."
        }));
    });

    let state = instance(&server).read("abc").await.unwrap();

    get.assert();
    assert_eq!(state, None);
}

#[tokio::test]
async fn update_name_and_configs() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200).json_body(running_body());
    });
    let put = server.mock(|when, then| {
        when.method(PUT)
            .path(INSTANCE_PATH)
            .json_body(json!({"security_group_id": "sg", "name": "mq2"}));
        then.status(204);
    });
    let put_configs = server.mock(|when, then| {
        when.method(PUT).path(CONFIGS_PATH).json_body(json!({
            "rocketmq_configs": [{"name": "fileReservedTime", "value": "72"}]
        }));
        then.status(204);
    });
    server.mock(|when, then| {
        when.method(GET).path(CONFIGS_PATH);
        then.status(200).json_body(json!({"rocketmq_configs": []}));
    });

    let prior = config();
    let planned = RocketMqInstanceConfig {
        name: "mq2".to_owned(),
        configs: vec![RocketMqParameter {
            name: "fileReservedTime".to_owned(),
            value: "72".to_owned(),
        }],
        ..config()
    };
    instance(&server)
        .update("abc", &prior, &planned)
        .await
        .unwrap();

    put.assert();
    put_configs.assert();
}

#[tokio::test]
async fn update_failure_keeps_instance_id() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200).json_body(running_body());
    });
    server.mock(|when, then| {
        when.method(PUT).path(INSTANCE_PATH);
        then.status(400).json_body(json!({
            "error_code": "DMS.00400001",
            "error_msg": "Invalid parameter."
        }));
    });

    let planned = RocketMqInstanceConfig {
        name: "mq2".to_owned(),
        ..config()
    };
    let err = instance(&server)
        .update("abc", &config(), &planned)
        .await
        .unwrap_err();

    assert_eq!(err.get_error_type(), HwcErrorType::RequestFailed);
    assert_eq!(err.api_error().map(|e| e.status), Some(400));
    assert_eq!(err.resource_id(), Some("abc"));
}

#[tokio::test]
async fn delete_waits_until_gone() {
    let server = MockServer::start();
    let delete = server.mock(|when, then| {
        when.method(DELETE).path(INSTANCE_PATH);
        then.status(204);
    });
    let get = server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(404).json_body(json!({"error_code": "DMS.00404022"}));
    });

    instance(&server).delete("abc").await.unwrap();

    delete.assert();
    get.assert();
}

#[tokio::test]
async fn delete_missing_instance() {
    let server = MockServer::start();
    let delete = server.mock(|when, then| {
        when.method(DELETE).path(INSTANCE_PATH);
        then.status(404).json_body(json!({"error_code": "DMS.00404022"}));
    });
    let get = server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(404);
    });

    instance(&server).delete("abc").await.unwrap();

    delete.assert();
    get.assert_hits(0);
}

#[tokio::test]
async fn delete_times_out_while_deleting() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(DELETE).path(INSTANCE_PATH);
        then.status(204);
    });
    server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200)
            .json_body(json!({"instance_id": "abc", "status": "DELETING"}));
    });

    let err = instance(&server)
        .with_timeouts(::hwc_resources::Timeouts::new(
            SHORT_TIMEOUTS.create,
            SHORT_TIMEOUTS.update,
            Duration::from_millis(200),
        ))
        .delete("abc")
        .await
        .unwrap_err();

    assert_eq!(err.get_error_type(), HwcErrorType::Timeout);
    assert!(err.to_string().contains("DELETING"));
}

#[tokio::test]
async fn create_uses_provider_enterprise_project() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/reliability/0123/instances")
            .json_body_partial(r#"{"enterprise_project_id": "eps-1"}"#);
        then.status(200).json_body(json!({"instance_id": "abc"}));
    });
    server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200).json_body(running_body());
    });
    server.mock(|when, then| {
        when.method(GET).path(CONFIGS_PATH);
        then.status(200).json_body(json!({"rocketmq_configs": []}));
    });

    instance(&server)
        .with_enterprise_project_id(Some("eps-1".to_owned()))
        .create(&config())
        .await
        .unwrap();

    create.assert();
}

#[tokio::test]
async fn update_resize_waits_while_extending() {
    let server = MockServer::start_async().await;
    let running = server
        .mock_async(|when, then| {
            when.method(GET).path(INSTANCE_PATH);
            then.status(200).json_body(running_body());
        })
        .await;
    let extend = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v2/rocketmq/0123/instances/abc/extend")
                .json_body(json!({"oper_type": "vertical", "new_product_id": "c6.8u16g.cluster"}));
            // keep the response back until the instance reports EXTENDING
            then.status(200)
                .json_body(json!({"job_id": "e-1"}))
                .delay(Duration::from_millis(200));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(CONFIGS_PATH);
            then.status(200).json_body(json!({"rocketmq_configs": []}));
        })
        .await;

    let planned = RocketMqInstanceConfig {
        flavor_id: "c6.8u16g.cluster".to_owned(),
        ..config()
    };
    let prior = config();
    let handler = instance(&server);
    let update = handler.update("abc", &prior, &planned);
    let flip = async {
        served(&extend, 1).await;
        let extending = server
            .mock_async(|when, then| {
                when.method(GET).path(INSTANCE_PATH);
                then.status(200)
                    .json_body(json!({"instance_id": "abc", "status": "EXTENDING"}));
            })
            .await;
        running.delete_async().await;
        served(&extending, 2).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(INSTANCE_PATH);
                then.status(200).json_body(running_body());
            })
            .await;
        extending.delete_async().await;
    };
    let (state, ()) = tokio::join!(update, flip);

    extend.assert_async().await;
    assert_eq!(state.unwrap().status, "RUNNING");
}

#[tokio::test]
async fn update_retries_while_instance_is_busy() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(INSTANCE_PATH);
            then.status(200).json_body(running_body());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(CONFIGS_PATH);
            then.status(200).json_body(json!({"rocketmq_configs": []}));
        })
        .await;
    let busy = server
        .mock_async(|when, then| {
            when.method(PUT).path(INSTANCE_PATH);
            then.status(400)
                .json_body(json!({
                    "error_code": "DMS.00400026",
                    "error_msg": "This operation is not allowed due to the instance status."
                }))
                .delay(Duration::from_millis(200));
        })
        .await;

    let planned = RocketMqInstanceConfig {
        name: "mq2".to_owned(),
        ..config()
    };
    let prior = config();
    let handler = instance(&server);
    let update = handler.update("abc", &prior, &planned);
    let free_up = async {
        served(&busy, 1).await;
        let accepted = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path(INSTANCE_PATH)
                    .json_body(json!({"security_group_id": "sg", "name": "mq2"}));
                then.status(204);
            })
            .await;
        let rejected = busy.hits_async().await;
        busy.delete_async().await;
        (accepted, rejected)
    };
    let (state, (accepted, rejected)) = tokio::join!(update, free_up);

    state.unwrap();
    assert_eq!(rejected, 1);
    accepted.assert_hits_async(1).await;
}

#[tokio::test]
async fn update_tls_mode_waits_for_task() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200).json_body(running_body());
    });
    server.mock(|when, then| {
        when.method(GET).path(CONFIGS_PATH);
        then.status(200).json_body(json!({"rocketmq_configs": []}));
    });
    let switch = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/0123/rocketmq/instances/abc/plain-ssl-switch")
            .json_body(json!({"tls_mode": "PLAINTEXT"}));
        then.status(200).json_body(json!({"job_id": "t-1"}));
    });
    let task = server.mock(|when, then| {
        when.method(GET).path("/v2/0123/instances/abc/tasks/t-1");
        then.status(200).json_body(json!({
            "tasks": [{"id": "t-1", "name": "modifyInstanceSslMode", "status": "SUCCESS"}]
        }));
    });

    let prior = RocketMqInstanceConfig {
        tls_mode: Some("SSL".to_owned()),
        ..config()
    };
    let planned = RocketMqInstanceConfig {
        tls_mode: Some("PLAINTEXT".to_owned()),
        ..config()
    };
    instance(&server)
        .update("abc", &prior, &planned)
        .await
        .unwrap();

    switch.assert();
    task.assert();
}

#[tokio::test]
async fn update_public_ip_rebinds() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(INSTANCE_PATH);
        then.status(200).json_body(running_body());
    });
    server.mock(|when, then| {
        when.method(GET).path(CONFIGS_PATH);
        then.status(200).json_body(json!({"rocketmq_configs": []}));
    });
    let unbind = server.mock(|when, then| {
        when.method(PUT)
            .path(INSTANCE_PATH)
            .json_body(json!({"enable_publicip": false}));
        then.status(204);
    });
    let bind = server.mock(|when, then| {
        when.method(PUT)
            .path(INSTANCE_PATH)
            .json_body(json!({"enable_publicip": true, "publicip_id": "eip-2"}));
        then.status(204);
    });
    let tasks = server.mock(|when, then| {
        when.method(GET).path("/v2/0123/instances/abc/tasks");
        then.status(200).json_body(json!({
            "tasks": [
                {"id": "t-2", "name": "unbindInstancePublicIp", "status": "SUCCESS"},
                {"id": "t-3", "name": "bindInstancePublicIp", "status": "SUCCESS"},
            ]
        }));
    });

    let prior = RocketMqInstanceConfig {
        enable_publicip: true,
        publicip_id: Some("eip-1".to_owned()),
        ..config()
    };
    let planned = RocketMqInstanceConfig {
        publicip_id: Some("eip-2".to_owned()),
        ..prior.clone()
    };
    instance(&server)
        .update("abc", &prior, &planned)
        .await
        .unwrap();

    unbind.assert();
    bind.assert();
    tasks.assert_hits(2);
}

#[tokio::test]
async fn update_rejects_immutable_changes() {
    let server = MockServer::start();
    let put = server.mock(|when, then| {
        when.method(PUT).path(INSTANCE_PATH);
        then.status(204);
    });

    let planned = RocketMqInstanceConfig {
        name: "mq2".to_owned(),
        vpc_id: "vpc2".to_owned(),
        ssl_enable: true,
        ..config()
    };
    let err = instance(&server)
        .update("abc", &config(), &planned)
        .await
        .unwrap_err();

    assert_eq!(err.get_error_type(), HwcErrorType::NotAllowed);
    assert!(err.to_string().contains("vpc_id, ssl_enable"));
    assert_eq!(err.resource_id(), Some("abc"));
    put.assert_hits(0);

    let planned = RocketMqInstanceConfig {
        enable_publicip: true,
        ..config()
    };
    let err = instance(&server)
        .update("abc", &config(), &planned)
        .await
        .unwrap_err();
    assert_eq!(err.get_error_type(), HwcErrorType::IllegalArgument);
    put.assert_hits(0);
}
