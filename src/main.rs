use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use evolution_node::{
    config::{ConfigManager, EnvConfigManager, NodeSettings},
    credentials::{CredentialStore, SecretsCredentialStore},
    dispatcher::Dispatcher,
    logger::{LogConfig, init_tracing},
    node::{EvolutionApiNode, NodeType},
    params::ParameterBag,
    route::RouteDef,
    secret::{EnvSecretsManager, SecretsManager},
    selector::{Resource, RouteKey},
    transport::ReqwestTransport,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "evolution-node",
    about = "Evolution API request dispatcher",
    version
)]
struct Cli {
    /// Log level directive (e.g. error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Directory holding the `.env` file with credentials and settings
    #[arg(long, global = true, default_value = ".")]
    env_dir: PathBuf,

    /// Also write a daily rolling log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every resource, operation and alias
    Routes,

    /// Print the request a call would send, without sending it
    Resolve(CallArgs),

    /// Send the request and print the response records
    Call(CallArgs),

    /// Emit the JSON Schema of the workflow node
    Schema,
}

#[derive(Args, Debug)]
struct CallArgs {
    #[arg(long)]
    resource: Resource,

    #[arg(long)]
    operation: String,

    /// Sub-operation of fan-out routes, e.g. `findTypebot`
    #[arg(long)]
    sub: Option<String>,

    /// Parameters as a JSON object
    #[arg(long, conflicts_with = "params_file")]
    params: Option<String>,

    /// File holding the parameters as a JSON object
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Credential reference; defaults to EVOLUTION_CREDENTIAL or `evolution`
    #[arg(long)]
    credential: Option<String>,
}

impl CallArgs {
    fn route_key(&self) -> RouteKey {
        let key = RouteKey::new(self.resource, self.operation.clone());
        match &self.sub {
            Some(sub) => key.with_sub(sub.clone()),
            None => key,
        }
    }

    fn parameters(&self) -> anyhow::Result<ParameterBag> {
        let raw = match (&self.params, &self.params_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?,
            (None, None) => return Ok(ParameterBag::new()),
        };
        let value: serde_json::Value = serde_json::from_str(&raw).context("parameters are not valid JSON")?;
        if !value.is_object() {
            bail!("parameters must be a JSON object");
        }
        Ok(ParameterBag::from_value(value))
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = init_tracing(&LogConfig::new(cli.log_level.clone(), cli.log_dir.clone()))?;

    match cli.command {
        Commands::Routes => {
            print_routes();
            Ok(())
        }
        Commands::Schema => {
            let schema = EvolutionApiNode::new(Resource::Instance, "connect").schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Commands::Resolve(args) => {
            let (settings, store) = bootstrap(&cli.env_dir).await;
            let credential = args.credential.clone().unwrap_or(settings.credential);
            let credentials = store.credentials(&credential).await?;
            let descriptor = Dispatcher::new().resolve_key(&args.route_key(), &args.parameters()?, &credentials)?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
            Ok(())
        }
        Commands::Call(args) => {
            let (settings, store) = bootstrap(&cli.env_dir).await;
            let credential = args.credential.clone().unwrap_or_else(|| settings.credential.clone());
            let transport = ReqwestTransport::new(settings.timeout(), &settings.user_agent)?;
            let key = args.route_key();

            info!(route = %key, "calling Evolution API");
            match Dispatcher::new()
                .execute(&key, &args.parameters()?, &store, &credential, &transport)
                .await
            {
                Ok(records) => {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                    Ok(())
                }
                Err(e) => {
                    error!(route = %key, "call failed: {}", e);
                    Err(e.into())
                }
            }
        }
    }
}

async fn bootstrap(env_dir: &Path) -> (NodeSettings, SecretsCredentialStore) {
    let config = ConfigManager(EnvConfigManager::new(Some(env_dir.join(".env"))));
    let settings = NodeSettings::load(&config).await;
    let secrets = SecretsManager(EnvSecretsManager::new(Some(env_dir.to_path_buf())));
    (settings, SecretsCredentialStore::new(secrets))
}

fn print_routes() {
    let dispatcher = Dispatcher::new();
    let registry = dispatcher.registry();
    for (resource, operations) in registry.operations() {
        println!("{resource}");
        for operation in operations {
            let aliases = registry.aliases_of(resource, operation);
            let subs = registry
                .lookup(resource, operation)
                .and_then(|(_, def)| match def {
                    RouteDef::Fanout(f) => Some(f.sub_operations().collect::<Vec<_>>()),
                    _ => None,
                })
                .unwrap_or_default();

            let mut line = format!("  {operation}");
            if !aliases.is_empty() {
                line.push_str(&format!(" (alias: {})", aliases.join(", ")));
            }
            if !subs.is_empty() {
                line.push_str(&format!(" [{}]", subs.join(", ")));
            }
            println!("{line}");
        }
    }
}
