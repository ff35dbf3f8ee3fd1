mod console;

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use pebble_config_shim::appkeys::AppKeyMap;
use pebble_config_shim::gateway::ReturnLink;
use pebble_config_shim::storage::{local_storage_prefix, KeyValueStore, PrefixedStore, SqliteStore};
use pebble_config_shim::{Handler, OverlaySession, ShimConfig};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

use crate::console::{ConsoleHost, ConsolePage};

const USAGE: &str = "commands: fire <name> [json-args] | ack <id> | nack <id> | focus | \
send <json> | open <url> | paste <text> | return <url> | submit | save-preset | \
load-preset | unsupported | set <key> <value> | get <key> | status | quit";

struct Options {
    app_uuid: Uuid,
    query: String,
    app_info: Option<PathBuf>,
}

fn main() {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let options = parse_args(std::env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "usage: pebble-config-shim [app-uuid] [--query <query>] [--app-info <appinfo.json>]"
        );
        std::process::exit(2);
    });

    let config_path = std::env::var("SHIM_CONFIG").ok().map(PathBuf::from);
    let config = ShimConfig::load(config_path).unwrap_or_else(|err| {
        eprintln!("Failed to load shim configuration: {err}. Using defaults.");
        ShimConfig::default()
    });

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        });

    if let Err(err) = rt.block_on(run(options, config)) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut app_uuid = None;
    let mut query = String::new();
    let mut app_info = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--query" => query = args.next().context("--query needs a value")?,
            "--app-info" => {
                app_info = Some(PathBuf::from(
                    args.next().context("--app-info needs a value")?,
                ))
            }
            other if app_uuid.is_none() => {
                app_uuid = Some(Uuid::parse_str(other).context("app id must be a UUID")?)
            }
            other => bail!("unexpected argument {other}"),
        }
    }

    Ok(Options {
        app_uuid: app_uuid.unwrap_or_else(Uuid::new_v4),
        query,
        app_info,
    })
}

async fn run(options: Options, config: ShimConfig) -> Result<()> {
    let keys = match &options.app_info {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Some(AppKeyMap::from_app_info(&contents)?)
        }
        None => None,
    };
    let storage = Rc::new(
        SqliteStore::open(config.data_dir.as_deref())
            .context("failed to initialise persistent storage")?,
    );
    let page_storage = PrefixedStore::new(
        storage.as_ref(),
        local_storage_prefix("console", &options.app_uuid),
    );

    let host = Rc::new(ConsoleHost::new(options.app_uuid, keys, Rc::clone(&storage)));
    let mut session = open_session(&host, &config, &options.query);

    println!("{USAGE}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "fire" => {
                let (name, args) = rest.split_once(' ').unwrap_or((rest, "[]"));
                match serde_json::from_str::<Vec<Value>>(args) {
                    Ok(args) => {
                        let delivered = session.dispatch(name, &args);
                        println!("{name} delivered to {delivered} listener(s)");
                    }
                    Err(err) => eprintln!("arguments must be a JSON array: {err}"),
                }
            }
            "ack" => {
                session.dispatch(&format!("ACK{rest}"), &[Value::Null]);
            }
            "nack" => {
                session.dispatch(&format!("NACK{rest}"), &[Value::Null]);
            }
            "focus" => session.focus_regained(),
            "send" => match serde_json::from_str::<Value>(rest) {
                Ok(payload) => session.send_app_message(&payload, None, None),
                Err(err) => eprintln!("payload must be JSON: {err}"),
            },
            "open" => session.open_url(rest),
            "paste" => session.parse_returned_pebblejs(rest),
            "return" => match Url::parse(rest).map_err(anyhow::Error::from).and_then(|url| {
                ReturnLink::parse(&url).map_err(anyhow::Error::from)
            }) {
                Ok(link) if link.app_uuid == options.app_uuid => {
                    session.close();
                    session = open_session(&host, &config, &link.query);
                }
                Ok(link) => eprintln!("return link is for another app: {}", link.app_uuid),
                Err(err) => eprintln!("invalid return link: {err}"),
            },
            "submit" => session.send_configuration(),
            "save-preset" => session.save_preset(),
            "load-preset" => session.load_preset(),
            "unsupported" => session.does_not_support_configuration(),
            "set" => {
                let (key, value) = rest.split_once(' ').unwrap_or((rest, ""));
                page_storage.set(key, value)?;
            }
            "get" => match page_storage.get(rest)? {
                Some(value) => println!("{rest} = {value}"),
                None => println!("{rest} is not set"),
            },
            "status" => {
                println!(
                    "state: {:?}, phase: {:?}, pending: {:?}, staged: {:?}",
                    session.state(),
                    session.phase(),
                    session.pending_transactions(),
                    session.staged_configuration(),
                );
            }
            "quit" => break,
            _ => println!("{USAGE}"),
        }
    }

    session.close();
    Ok(())
}

/// Open a session with the listeners a typical watch-app configuration
/// script installs.
fn open_session(host: &Rc<ConsoleHost>, config: &ShimConfig, query: &str) -> OverlaySession {
    let session = OverlaySession::new(
        host.clone(),
        Rc::new(ConsolePage),
        config.flow_options(),
        &config.return_scheme,
    );

    session.add_event_listener(
        "ready",
        Handler::from_fn(|_| println!("page: ready")),
    );
    session.add_event_listener(
        "showConfiguration",
        Handler::from_fn(|_| println!("page: showing configuration form")),
    );

    let reviewer = session.clone();
    session.add_event_listener(
        "webviewclosed",
        Handler::new(move |args| {
            let response = args
                .first()
                .and_then(|arg| arg.get("response"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if response.is_empty() {
                println!("page: configuration cancelled");
                return Ok(());
            }
            let payload: Value = serde_json::from_str(response)?;
            let acked = Handler::from_fn(|_| println!("page: configuration delivered"));
            let nacked = Handler::from_fn(|_| println!("page: configuration rejected"));
            reviewer.send_app_message(&payload, Some(acked), Some(nacked));
            Ok(())
        }),
    );

    session.script_loaded(query);
    session
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_documented_arguments() {
        let options = parse_args(args(&[
            "6bf6215b-c97f-409e-8c31-4f55657222b4",
            "--query",
            "config=true&json=%7B%7D",
            "--app-info",
            "appinfo.json",
        ]))
        .unwrap();

        assert_eq!(
            options.app_uuid.to_string(),
            "6bf6215b-c97f-409e-8c31-4f55657222b4"
        );
        assert_eq!(options.query, "config=true&json=%7B%7D");
        assert_eq!(options.app_info, Some(PathBuf::from("appinfo.json")));
    }

    #[test]
    fn rejects_extra_positional_arguments() {
        assert!(parse_args(args(&["6bf6215b-c97f-409e-8c31-4f55657222b4", "extra"])).is_err());
        assert!(parse_args(args(&["--query"])).is_err());
        assert!(parse_args(args(&[])).unwrap().query.is_empty());
    }
}
