use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use preview_bridge::api::server::serve;
use preview_bridge::config::BridgeSettings;
use preview_bridge::host::nodes::stock_registry;
use preview_bridge::host::{HostEnvironment, SharedHostEnvironment};
use preview_bridge::notify::BroadcastNotifier;
use preview_bridge::preview::preview_module;
use preview_bridge::registry::NodeResolver;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("list-nodes")) {
        run_list_nodes_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }
    if cli_args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }

    let settings = BridgeSettings::load(parse_app_root(cli_args.as_slice())?.as_path())?;
    let addr: SocketAddr = settings.bind.parse()?;

    serve(addr, standalone_host(), settings).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

fn standalone_host() -> SharedHostEnvironment {
    let host = Arc::new(HostEnvironment::new());
    host.publish_execution_registry(Some(stock_registry().into_shared()));
    host
}

fn run_list_nodes_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }

    let settings = BridgeSettings::load(parse_app_root(args.as_slice())?.as_path())?;
    let host = standalone_host();
    host.load_module(preview_module(
        Arc::new(BroadcastNotifier::new(settings.push.channel_capacity)),
        &settings,
    ));
    let nodes = NodeResolver::new(host).list_nodes();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "success": true,
            "count": nodes.len(),
            "nodes": nodes,
        }))?
    );
    Ok(())
}

fn parse_app_root(args: &[String]) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut app_root = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--app-root" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
                };
                app_root = Some(PathBuf::from(value));
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    match app_root {
        Some(root) => Ok(root),
        None => Ok(std::env::current_dir()?),
    }
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  preview-bridge [--app-root PATH]\n",
        "  preview-bridge list-nodes [--app-root PATH]\n\n",
        "Settings are read from <app-root>/config/preview-bridge.toml (or PREVIEW_BRIDGE_SETTINGS)\n",
        "and overridden by PREVIEW_BRIDGE_* environment variables.\n"
    ));
}
