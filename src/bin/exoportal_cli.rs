//! One-shot command-line client for the exoplanet simulation portal.
//!
//! Examples:
//!   exoportal-cli travel 7 92
//!   exoportal-cli season 3
//!   exoportal-cli --no-wait lifetime 5
//!   exoportal-cli status 4f6be2a0-9c7d-4d2e-b1fa-1c2b3d4e5f60
//!   exoportal-cli history 2
//!
//! By default it submits and then polls until the task finishes; `--no-wait`
//! prints the task id and returns immediately. The portal location comes
//! from config.json / EXOPORTAL_URL; override with `--url <base>`.

use std::process;
use std::sync::Arc;

use serde_json::Value;

use exoportal::client::{HttpPortal, PortalBackend};
use exoportal::config::{AppPaths, PortalConfig};
use exoportal::poll::{PollSession, PollUpdate};
use exoportal::protocol::{SimulationKind, SimulationRequest, TaskState};
use exoportal::render;

fn usage() -> ! {
    eprintln!("exoportal-cli (talks to {} by default)", exoportal::config::DEFAULT_BASE_URL);
    eprintln!("Usage: exoportal-cli [--url <base>] [--no-wait] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  travel <star_system_id> <speed_percentage>  Travel-time simulation");
    eprintln!("  season <planet_id>                          Seasonal-temperature simulation");
    eprintln!("  tidal <planet_id>                           Tidal-locking simulation");
    eprintln!("  lifetime <star_id>                          Star-lifetime simulation");
    eprintln!("  submit <endpoint> [field=value ...]         Submission to a custom endpoint");
    eprintln!("  status <task_id>                            One status check, no waiting");
    eprintln!("  watch <task_id>                             Poll a task until it finishes");
    eprintln!("  history [page] [--watch]                    Show one history page; --watch follows pending runs");
    eprintln!("  config                                      Show the effective configuration");
    process::exit(1);
}

fn parse_args(mut config: PortalConfig) -> (PortalConfig, bool, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut wait = true;

    loop {
        if args.len() >= 2 && args[0] == "--url" {
            config.base_url = args[1].clone();
            args.drain(0..2);
            continue;
        }
        if !args.is_empty() && args[0] == "--no-wait" {
            wait = false;
            args.remove(0);
            continue;
        }
        break;
    }

    if args.is_empty() {
        usage();
    }

    (config, wait, args)
}

enum SubmitRoute {
    Kind(SimulationKind),
    Endpoint(String),
}

fn build_request(
    command: &str,
    args: &[String],
) -> Result<(SimulationKind, SimulationRequest), String> {
    match command {
        "travel" => {
            if args.len() != 2 {
                return Err("usage: travel <star_system_id> <speed_percentage>".to_string());
            }
            Ok((
                SimulationKind::TravelTime,
                SimulationRequest::new()
                    .field("star_system_id", args[0].as_str())
                    .field("speed_percentage", args[1].as_str()),
            ))
        }
        "season" => single_id(SimulationKind::SeasonalTemps, "planet_id", args),
        "tidal" => single_id(SimulationKind::TidalLocking, "planet_id", args),
        "lifetime" => single_id(SimulationKind::StarLifetime, "star_id", args),
        _ => Err(format!("unknown simulation '{command}'")),
    }
}

fn single_id(
    kind: SimulationKind,
    field: &str,
    args: &[String],
) -> Result<(SimulationKind, SimulationRequest), String> {
    if args.len() != 1 {
        return Err(format!("usage: {} <{field}>", kind.command()));
    }
    Ok((
        kind,
        SimulationRequest::new().field(field, args[0].as_str()),
    ))
}

async fn submit_and_wait(
    portal: Arc<HttpPortal>,
    config: &PortalConfig,
    route: SubmitRoute,
    request: SimulationRequest,
    wait: bool,
) -> i32 {
    let (submitted, kind) = match &route {
        SubmitRoute::Kind(kind) => (portal.submit(*kind, &request).await, Some(*kind)),
        SubmitRoute::Endpoint(path) => (portal.submit_to(path, &request).await, None),
    };
    let task_id = match submitted {
        Ok(id) => id,
        Err(error) => {
            eprintln!("{}", render::render_submit_error(&error));
            return 1;
        }
    };
    println!("{}", render::started_line(&task_id));
    if !wait {
        return 0;
    }
    watch_task(portal, config, task_id, kind).await
}

async fn watch_task(
    portal: Arc<HttpPortal>,
    config: &PortalConfig,
    task_id: String,
    kind: Option<SimulationKind>,
) -> i32 {
    let mut session = PollSession::with_interval(portal, config.poll_interval);
    let mut watcher = session.start_task(task_id, kind);
    while let Some(update) = watcher.next().await {
        println!("{}", render::render_update(&update));
        match update {
            PollUpdate::TaskSucceeded { .. } => return 0,
            PollUpdate::TaskFailed { .. } | PollUpdate::PollError { .. } => return 1,
            _ => {}
        }
    }
    1
}

async fn watch_history(portal: Arc<HttpPortal>, config: &PortalConfig, page: Option<u32>) -> i32 {
    let mut session = PollSession::with_interval(portal, config.poll_interval);
    let mut watcher = session.start_history(page);
    while let Some(update) = watcher.next().await {
        println!("{}", render::render_update(&update));
        if matches!(update, PollUpdate::PollError { .. }) {
            return 1;
        }
        if update.is_terminal() {
            return 0;
        }
    }
    1
}

async fn run(portal: Arc<HttpPortal>, config: &PortalConfig, wait: bool, args: &[String]) -> i32 {
    let command = args[0].as_str();
    match command {
        "travel" | "season" | "tidal" | "lifetime" => {
            let (kind, request) = match build_request(command, &args[1..]) {
                Ok(pair) => pair,
                Err(message) => {
                    eprintln!("{message}");
                    return 2;
                }
            };
            submit_and_wait(portal, config, SubmitRoute::Kind(kind), request, wait).await
        }
        "submit" => {
            if args.len() < 2 {
                usage();
            }
            let mut request = SimulationRequest::new();
            for pair in &args[2..] {
                match pair.split_once('=') {
                    Some((field, value)) => request.set(field, value),
                    None => {
                        eprintln!("expected field=value, got '{pair}'");
                        return 2;
                    }
                }
            }
            let route = SubmitRoute::Endpoint(args[1].clone());
            submit_and_wait(portal, config, route, request, wait).await
        }
        "status" => {
            if args.len() != 2 {
                usage();
            }
            let task_id = args[1].as_str();
            match portal.task_status(task_id).await {
                Ok(report) => match &report.status {
                    TaskState::Success => {
                        let result = report.result.clone().unwrap_or(Value::Null);
                        println!("{}", render::render_outcome(None, &result));
                        0
                    }
                    TaskState::Failure => {
                        println!("{}", render::task_failed_line(&report.failure_detail()));
                        1
                    }
                    state => {
                        println!("{}", render::pending_line(task_id, state));
                        0
                    }
                },
                Err(error) => {
                    eprintln!("{}", render::status_check_failed_line(&error));
                    1
                }
            }
        }
        "watch" => {
            if args.len() != 2 {
                usage();
            }
            watch_task(portal, config, args[1].clone(), None).await
        }
        "history" => {
            let mut follow = false;
            let mut page = None;
            for arg in &args[1..] {
                if arg == "--watch" {
                    follow = true;
                    continue;
                }
                match arg.parse::<u32>() {
                    Ok(number) => page = Some(number),
                    Err(_) => {
                        eprintln!("page must be a number, got '{arg}'");
                        return 2;
                    }
                }
            }
            match portal.history(page).await {
                Ok(snapshot) => {
                    println!("{}", render::render_history_table(&snapshot));
                    if follow && snapshot.has_pending() {
                        return watch_history(portal, config, page).await;
                    }
                    0
                }
                Err(error) => {
                    eprintln!("{}", render::history_failed_line(&error));
                    1
                }
            }
        }
        "config" => {
            println!("base_url: {}", config.base_url);
            println!(
                "csrf_token: {}",
                if config.csrf_token.is_some() { "set" } else { "unset" }
            );
            println!(
                "api_key: {}",
                if config.api_key.is_some() { "set" } else { "unset" }
            );
            println!("poll_interval: {:?}", config.poll_interval);
            if let Ok(paths) = AppPaths::new() {
                println!("config_file: {:?}", paths.config_file());
            }
            0
        }
        _ => usage(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match PortalConfig::load() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            process::exit(1);
        }
    };
    let (config, wait, args) = parse_args(config);

    let portal = match HttpPortal::from_config(&config) {
        Ok(portal) => Arc::new(portal),
        Err(error) => {
            eprintln!("Failed to build portal client: {error}");
            process::exit(1);
        }
    };

    let code = run(portal, &config, wait, &args).await;
    process::exit(code);
}
