use std::{path::Path, sync::Arc};

use anyhow::{bail, Result};
use clap::ArgMatches;
use serde_json::Value;
use substrate_core::{
    config::{global_config_path, load_settings, load_settings_from},
    Error, Settings, Substrate,
};
use tracing::debug;

use crate::{
    json::{JsonError, JsonSuccess},
    rpc::{dispatch as dispatch_rpc, Method, RpcRequest},
    server,
};

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("serve", sub_m)) => handle_serve(sub_m).await,
        Some(("call", sub_m)) => handle_call(sub_m).await,
        Some(("methods", _)) => {
            handle_methods();
            Ok(())
        }
        _ => bail!("Unknown command. Run 'substrate --help' for usage."),
    }
}

/// Load layered settings, then apply flags given on this invocation.
fn resolve_settings(matches: &ArgMatches, listen: Option<&String>) -> Result<Settings> {
    let mut settings = match matches.get_one::<String>("config") {
        Some(path) => load_settings_from(global_config_path().as_deref(), Some(Path::new(path)))?,
        None => load_settings()?,
    };
    if let Some(url) = matches.get_one::<String>("database") {
        settings.database_url.clone_from(url);
    }
    if let Some(addr) = listen {
        settings.listen_addr.clone_from(addr);
    }
    settings.validate()?;
    debug!(?settings, "settings resolved");
    Ok(settings)
}

async fn handle_serve(matches: &ArgMatches) -> Result<()> {
    let settings = resolve_settings(matches, matches.get_one::<String>("listen"))?;
    let addr = settings.listen_addr.clone();
    let substrate = Substrate::open(settings).await?;
    server::serve(Arc::new(substrate), &addr).await
}

async fn handle_call(matches: &ArgMatches) -> Result<()> {
    let pretty = matches.get_flag("pretty");
    let result = call(matches).await;

    let body = match &result {
        Ok(data) => serde_json::to_value(JsonSuccess::new(data))?,
        Err(err) => serde_json::to_value(JsonError::from(err))?,
    };
    let text = if pretty {
        serde_json::to_string_pretty(&body)?
    } else {
        serde_json::to_string(&body)?
    };
    println!("{text}");

    result.map(|_| ()).map_err(anyhow::Error::from)
}

async fn call(matches: &ArgMatches) -> std::result::Result<Value, Error> {
    let method = matches
        .get_one::<String>("method")
        .cloned()
        .ok_or_else(|| Error::missing_field("method"))?;
    let params = match matches.get_one::<String>("params") {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("--params is not valid JSON: {e}")))?,
        None => Value::Null,
    };
    let settings = resolve_settings(matches, None).map_err(|e| match e.downcast::<Error>() {
        Ok(err) => err,
        Err(other) => Error::InvalidConfig(other.to_string()),
    })?;

    let substrate = Substrate::open(settings).await?;
    dispatch_rpc(&substrate, RpcRequest { method, params }).await
}

fn handle_methods() {
    for name in Method::names() {
        println!("{name}");
    }
}
