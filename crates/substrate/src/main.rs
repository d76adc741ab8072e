use std::process;

use substrate::cli::{build_cli, handlers};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    if let Err(err) = handlers::dispatch(&matches).await {
        eprintln!("Error: {err:#}");
        let code = err
            .downcast_ref::<substrate_core::Error>()
            .map_or(1, substrate_core::Error::exit_code);
        process::exit(code);
    }
}
