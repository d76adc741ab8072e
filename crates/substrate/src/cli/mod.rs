pub mod handlers;

use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("substrate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Coordination substrate for concurrent coding agents")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("PATH")
                .help("Project config file (default: .substrate/config.toml)"),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .global(true)
                .value_name("URL")
                .help("Database URL, overriding config and SUBSTRATE_DATABASE_URL"),
        )
        .subcommand(cmd_serve())
        .subcommand(cmd_call())
        .subcommand(cmd_methods())
}

fn cmd_serve() -> Command {
    Command::new("serve")
        .about("Serve JSON-RPC over HTTP (POST /rpc)")
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Address to bind, e.g. 127.0.0.1:7411"),
        )
}

fn cmd_call() -> Command {
    Command::new("call")
        .about("Invoke one method against the database and print the JSON response")
        .arg(
            Arg::new("method")
                .required(true)
                .help("Method name, e.g. lock.acquire"),
        )
        .arg(
            Arg::new("params")
                .long("params")
                .short('p')
                .value_name("JSON")
                .help("Params object as JSON"),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .action(ArgAction::SetTrue)
                .help("Pretty-print the response"),
        )
}

fn cmd_methods() -> Command {
    Command::new("methods").about("List every method name")
}
