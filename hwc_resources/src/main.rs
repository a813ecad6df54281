use ::clap::{Parser, Subcommand, ValueEnum};
use ::hwc_client::service_client::ServiceClient;
use ::hwc_common::{
    config::{load_config, ProviderConfig},
    error::Result,
    serde::{de::DeserializeOwned, Serialize},
    serde_json, tokio,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{self, EnvFilter},
};
use ::hwc_resources::{
    gaussdb::{MySqlInstance, OpenGaussInstance, MYSQL_SERVICE, OPENGAUSS_SERVICE},
    rocketmq::{RocketMqInstance, SERVICE as ROCKETMQ_SERVICE},
    Resource,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// path to the provider config file
    #[arg(long)]
    config_path: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a resource from a JSON config file and wait until it is ready
    Create {
        kind: Kind,
        /// path to the resource config
        #[arg(long)]
        resource_config: String,
    },
    /// Print the observed state of a resource
    Read { kind: Kind, id: String },
    /// Apply the difference between two resource configs
    Update {
        kind: Kind,
        id: String,
        #[arg(long)]
        prior: String,
        #[arg(long)]
        planned: String,
    },
    /// Delete a resource and wait until it is gone
    Delete { kind: Kind, id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    RocketmqInstance,
    OpengaussInstance,
    MysqlInstance,
}

async fn run<R>(resource: R, command: Command) -> Result<()>
where
    R: Resource,
    R::Config: DeserializeOwned,
    R::State: Serialize,
{
    match command {
        Command::Create {
            resource_config, ..
        } => {
            let config: R::Config = load_config(&resource_config)?;
            print(&resource.create(&config).await?)
        }
        Command::Read { id, .. } => match resource.read(&id).await? {
            Some(state) => print(&state),
            None => {
                warn!("Resource {} is not found", id);
                Ok(())
            }
        },
        Command::Update {
            id, prior, planned, ..
        } => {
            let prior: R::Config = load_config(&prior)?;
            let planned: R::Config = load_config(&planned)?;
            print(&resource.update(&id, &prior, &planned).await?)
        }
        Command::Delete { id, .. } => resource.delete(&id).await,
    }
}

fn print<S: Serialize>(state: &S) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Cli {
        config_path,
        command,
    } = Cli::parse();
    let config = load_config::<ProviderConfig>(&config_path)?.with_env_fallback()?;
    info!("Using region {}", config.region);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling the pending wait");
                on_signal.cancel();
            }
            Err(e) => warn!("Cannot listen for ctrl-c: {}", e),
        }
    });

    let kind = match &command {
        Command::Create { kind, .. }
        | Command::Read { kind, .. }
        | Command::Update { kind, .. }
        | Command::Delete { kind, .. } => *kind,
    };
    let result = match kind {
        Kind::RocketmqInstance => {
            let client = ServiceClient::new(&config, ROCKETMQ_SERVICE)?;
            let handler = RocketMqInstance::new(client, cancel)
                .with_enterprise_project_id(config.enterprise_project_id.clone());
            run(handler, command).await
        }
        Kind::OpengaussInstance => {
            let client = ServiceClient::new(&config, OPENGAUSS_SERVICE)?;
            let handler = OpenGaussInstance::new(client, config.region.clone(), cancel)
                .with_enterprise_project_id(config.enterprise_project_id.clone());
            run(handler, command).await
        }
        Kind::MysqlInstance => {
            let client = ServiceClient::new(&config, MYSQL_SERVICE)?;
            let handler = MySqlInstance::new(client, config.region.clone(), cancel)
                .with_enterprise_project_id(config.enterprise_project_id.clone());
            run(handler, command).await
        }
    };
    result.map_err(|e| match e.resource_id().map(str::to_owned) {
        Some(id) => e.context(format!("resource {} exists but is not usable", id)),
        None => e,
    })
}
