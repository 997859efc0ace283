//! Interactive dashboard for the exoplanet simulation portal.
//!
//! Reads commands from stdin, submits simulation requests, and keeps one
//! status display that a background printer task updates while polling runs:
//!
//!   travel 7 92        Travel-time run for star system 7 at 92% of c
//!   season 3           Seasonal-temperature run for planet 3
//!   tidal 3            Tidal-locking run for planet 3
//!   lifetime 5         Star-lifetime run for star 5
//!   history            Run history, refreshed while runs are pending
//!   stop               Cancel whatever is being polled
//!
//! Configuration comes from `config.json` and `EXOPORTAL_*` variables; see
//! the `config` module.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use exoportal::client::{HttpPortal, PortalBackend};
use exoportal::config::PortalConfig;
use exoportal::poll::{PollSession, PollUpdate, PollWatcher};
use exoportal::protocol::{SimulationKind, SimulationRequest, TaskState};
use exoportal::render;

// ═══════════════════════════════════════════════════════════════════════════
// Status display
// ═══════════════════════════════════════════════════════════════════════════

/// How long an error notice stays on the display before clearing itself.
const TRANSIENT_TTL: Duration = Duration::from_secs(5);

/// The dashboard's single status area.
///
/// Every change is echoed to stdout as it happens; the stored line is what
/// `show` reprints later. Transient notices clear themselves after the
/// display's TTL unless something newer has replaced them, which the
/// sequence number detects. `clear` also bumps an epoch; writers that hold
/// a stale epoch are dropped, so a printer task outliving its session
/// cannot resurrect its last line.
#[derive(Clone)]
struct StatusDisplay {
    ttl: Duration,
    inner: Arc<Mutex<DisplayState>>,
}

#[derive(Default)]
struct DisplayState {
    seq: u64,
    epoch: u64,
    line: Option<String>,
}

impl StatusDisplay {
    fn new() -> Self {
        Self::with_ttl(TRANSIENT_TTL)
    }

    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(DisplayState::default())),
        }
    }

    async fn set(&self, text: String) {
        println!("{text}");
        let mut state = self.inner.lock().await;
        state.seq += 1;
        state.line = Some(text);
    }

    async fn set_transient(&self, text: String) {
        println!("{text}");
        let seq = {
            let mut state = self.inner.lock().await;
            state.seq += 1;
            state.line = Some(text);
            state.seq
        };
        self.expire_later(seq);
    }

    /// Stores `text` only if the display has not been cleared since `epoch`
    /// was read.
    async fn set_for(&self, epoch: u64, text: String) {
        let mut state = self.inner.lock().await;
        if state.epoch != epoch {
            return;
        }
        println!("{text}");
        state.seq += 1;
        state.line = Some(text);
    }

    async fn set_transient_for(&self, epoch: u64, text: String) {
        let seq = {
            let mut state = self.inner.lock().await;
            if state.epoch != epoch {
                return;
            }
            println!("{text}");
            state.seq += 1;
            state.line = Some(text);
            state.seq
        };
        self.expire_later(seq);
    }

    fn expire_later(&self, seq: u64) {
        let ttl = self.ttl;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            time::sleep(ttl).await;
            let mut state = inner.lock().await;
            if state.seq == seq {
                state.line = None;
            }
        });
    }

    async fn clear(&self) {
        let mut state = self.inner.lock().await;
        state.seq += 1;
        state.epoch += 1;
        state.line = None;
    }

    async fn epoch(&self) -> u64 {
        self.inner.lock().await.epoch
    }

    async fn current(&self) -> Option<String> {
        self.inner.lock().await.line.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq)]
enum Command {
    Submit {
        kind: SimulationKind,
        request: SimulationRequest,
    },
    SubmitTo {
        endpoint: String,
        request: SimulationRequest,
    },
    Watch { task_id: String },
    Status { task_id: String },
    History { page: Option<u32> },
    Show,
    Stop,
    Help,
    Quit,
    Nothing,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Ok(Command::Nothing);
    };
    let args: Vec<&str> = parts.collect();

    match name {
        "travel" => {
            if args.len() != 2 {
                return Err("usage: travel <star_system_id> <speed_percentage>".to_string());
            }
            Ok(Command::Submit {
                kind: SimulationKind::TravelTime,
                request: SimulationRequest::new()
                    .field("star_system_id", args[0])
                    .field("speed_percentage", args[1]),
            })
        }
        "season" => single_id_command(SimulationKind::SeasonalTemps, "planet_id", &args),
        "tidal" => single_id_command(SimulationKind::TidalLocking, "planet_id", &args),
        "lifetime" => single_id_command(SimulationKind::StarLifetime, "star_id", &args),
        "submit" => {
            if args.is_empty() {
                return Err("usage: submit <endpoint> [field=value ...]".to_string());
            }
            let mut request = SimulationRequest::new();
            for pair in &args[1..] {
                let Some((field, value)) = pair.split_once('=') else {
                    return Err(format!("expected field=value, got '{pair}'"));
                };
                request.set(field, value);
            }
            Ok(Command::SubmitTo {
                endpoint: args[0].to_string(),
                request,
            })
        }
        "watch" => {
            if args.len() != 1 {
                return Err("usage: watch <task_id>".to_string());
            }
            Ok(Command::Watch {
                task_id: args[0].to_string(),
            })
        }
        "status" => {
            if args.len() != 1 {
                return Err("usage: status <task_id>".to_string());
            }
            Ok(Command::Status {
                task_id: args[0].to_string(),
            })
        }
        "history" => {
            let page = match args.first() {
                Some(raw) => Some(
                    raw.parse::<u32>()
                        .map_err(|_| format!("page must be a number, got '{raw}'"))?,
                ),
                None => None,
            };
            Ok(Command::History { page })
        }
        "show" => Ok(Command::Show),
        "stop" => Ok(Command::Stop),
        "help" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}' (try 'help')")),
    }
}

fn single_id_command(
    kind: SimulationKind,
    field: &str,
    args: &[&str],
) -> Result<Command, String> {
    if args.len() != 1 {
        return Err(format!("usage: {} <{field}>", kind.command()));
    }
    Ok(Command::Submit {
        kind,
        request: SimulationRequest::new().field(field, args[0]),
    })
}

fn print_help() {
    println!("Commands:");
    println!("  travel <star_system_id> <speed_percentage>  Submit a travel-time simulation");
    println!("  season <planet_id>                          Submit a seasonal-temperature simulation");
    println!("  tidal <planet_id>                           Submit a tidal-locking simulation");
    println!("  lifetime <star_id>                          Submit a star-lifetime simulation");
    println!("  submit <endpoint> [field=value ...]         Submit to a custom endpoint");
    println!("  history [page]                              Show run history (live while runs are pending)");
    println!("  watch <task_id>                             Poll an existing task");
    println!("  status <task_id>                            One-shot status check");
    println!("  show                                        Reprint the current status line");
    println!("  stop                                        Cancel polling");
    println!("  help | quit");
}

// ═══════════════════════════════════════════════════════════════════════════
// Dashboard
// ═══════════════════════════════════════════════════════════════════════════

struct Dashboard {
    backend: Arc<dyn PortalBackend>,
    session: PollSession,
    display: StatusDisplay,
    printer: Option<JoinHandle<()>>,
}

impl Dashboard {
    fn new(backend: Arc<dyn PortalBackend>, poll_interval: Duration) -> Self {
        Self {
            backend: Arc::clone(&backend),
            session: PollSession::with_interval(backend, poll_interval),
            display: StatusDisplay::new(),
            printer: None,
        }
    }

    /// Runs one command; returns false when the dashboard should exit.
    async fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::Submit { kind, request } => self.submit(kind, request).await,
            Command::SubmitTo { endpoint, request } => self.submit_to(endpoint, request).await,
            Command::Watch { task_id } => self.watch(task_id).await,
            Command::Status { task_id } => self.one_shot_status(&task_id).await,
            Command::History { page } => self.history(page).await,
            Command::Show => match self.display.current().await {
                Some(line) => println!("{line}"),
                None => println!("(no status)"),
            },
            Command::Stop => self.stop().await,
            Command::Help => print_help(),
            Command::Quit => return false,
            Command::Nothing => {}
        }
        true
    }

    async fn submit(&mut self, kind: SimulationKind, request: SimulationRequest) {
        info!("Submitting {} simulation", kind.label());
        self.begin_submission().await;
        match self.backend.submit(kind, &request).await {
            Ok(task_id) => self.track(task_id, Some(kind)).await,
            Err(error) => {
                self.display
                    .set_transient(render::render_submit_error(&error))
                    .await
            }
        }
    }

    async fn submit_to(&mut self, endpoint: String, request: SimulationRequest) {
        info!("Submitting to {endpoint}");
        self.begin_submission().await;
        match self.backend.submit_to(&endpoint, &request).await {
            Ok(task_id) => self.track(task_id, None).await,
            Err(error) => {
                self.display
                    .set_transient(render::render_submit_error(&error))
                    .await
            }
        }
    }

    /// A new submission takes over the display and the polling slot before
    /// the request goes out, so a stale timer can never outlive it.
    async fn begin_submission(&mut self) {
        self.session.stop();
        self.abort_printer();
        self.display.clear().await;
        self.display.set("Starting simulation...".to_string()).await;
    }

    async fn track(&mut self, task_id: String, kind: Option<SimulationKind>) {
        self.display.set(render::started_line(&task_id)).await;
        let watcher = self.session.start_task(task_id, kind);
        self.spawn_printer(watcher).await;
    }

    async fn watch(&mut self, task_id: String) {
        self.session.stop();
        self.abort_printer();
        self.display.clear().await;
        let watcher = self.session.start_task(task_id, None);
        // The watcher's initial update already describes the target.
        self.display.set(render::render_update(&watcher.current())).await;
        self.spawn_printer(watcher).await;
    }

    async fn one_shot_status(&mut self, task_id: &str) {
        match self.backend.task_status(task_id).await {
            Ok(report) => match &report.status {
                TaskState::Success => {
                    let result = report.result.clone().unwrap_or(Value::Null);
                    self.display.set(render::render_outcome(None, &result)).await;
                }
                TaskState::Failure => {
                    self.display
                        .set(render::task_failed_line(&report.failure_detail()))
                        .await
                }
                state => self.display.set(render::pending_line(task_id, state)).await,
            },
            Err(error) => {
                self.display
                    .set_transient(render::status_check_failed_line(&error))
                    .await
            }
        }
    }

    async fn history(&mut self, page: Option<u32>) {
        self.session.stop();
        self.abort_printer();
        self.display.clear().await;
        match self.backend.history(page).await {
            Ok(snapshot) => {
                println!("{}", render::render_history_table(&snapshot));
                if snapshot.has_pending() {
                    info!("Pending runs visible; refreshing history");
                    let watcher = self.session.start_history(page);
                    self.spawn_printer(watcher).await;
                }
            }
            Err(error) => {
                self.display
                    .set_transient(render::history_failed_line(&error))
                    .await
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(target) = self.session.target() {
            info!(?target, "Cancelling poll");
        }
        self.session.stop();
        self.abort_printer();
        self.display.clear().await;
        self.display.set("Polling stopped.".to_string()).await;
    }

    fn shutdown(&mut self) {
        self.session.stop();
        self.abort_printer();
    }

    /// One printer at a time; it follows the watcher until the session ends.
    /// Writes carry the epoch read here, so a printer aborted mid-update
    /// cannot land a line after the display moves on.
    async fn spawn_printer(&mut self, mut watcher: PollWatcher) {
        self.abort_printer();
        let display = self.display.clone();
        let epoch = display.epoch().await;
        self.printer = Some(tokio::spawn(async move {
            while let Some(update) = watcher.next().await {
                let text = render::render_update(&update);
                if matches!(update, PollUpdate::PollError { .. }) {
                    display.set_transient_for(epoch, text).await;
                } else {
                    display.set_for(epoch, text).await;
                }
                if update.is_terminal() {
                    break;
                }
            }
        }));
    }

    fn abort_printer(&mut self) {
        if let Some(printer) = self.printer.take() {
            printer.abort();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = PortalConfig::load()?;
    info!("Portal: {}", config.base_url);
    if config.csrf_token.is_none() {
        warn!("No CSRF token configured; submissions may be rejected");
    }

    let backend: Arc<dyn PortalBackend> = Arc::new(HttpPortal::from_config(&config)?);
    let mut dashboard = Dashboard::new(backend, config.poll_interval);

    println!("Exoplanet simulation portal dashboard ({})", config.base_url);
    let labels: Vec<&str> = SimulationKind::all().iter().map(|kind| kind.label()).collect();
    println!("Simulations: {}", labels.join(", "));
    println!("Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(command) => {
                if !dashboard.dispatch(command).await {
                    break;
                }
            }
            Err(message) => println!("{message}"),
        }
    }

    dashboard.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_commands_carry_raw_field_values() {
        match parse_command("travel 7 150").expect("parse") {
            Command::Submit { kind, request } => {
                assert_eq!(kind, SimulationKind::TravelTime);
                // Out-of-range on purpose: the portal validates, not us.
                assert_eq!(request.get("speed_percentage"), Some("150"));
                assert_eq!(request.get("star_system_id"), Some("7"));
            }
            other => panic!("expected submit, got {:?}", other),
        }
    }

    #[test]
    fn single_id_commands_use_their_field_names() {
        for (line, field) in [
            ("season 3", "planet_id"),
            ("tidal 3", "planet_id"),
            ("lifetime 5", "star_id"),
        ] {
            match parse_command(line).expect("parse") {
                Command::Submit { request, .. } => {
                    assert!(request.get(field).is_some(), "{line} should set {field}");
                    assert_eq!(request.len(), 1);
                }
                other => panic!("expected submit, got {:?}", other),
            }
        }
    }

    #[test]
    fn custom_submit_parses_field_pairs() {
        match parse_command("submit /simulations/travel-time/ star_system_id=7 speed_percentage=92")
            .expect("parse")
        {
            Command::SubmitTo { endpoint, request } => {
                assert_eq!(endpoint, "/simulations/travel-time/");
                assert_eq!(request.get("star_system_id"), Some("7"));
                assert_eq!(request.get("speed_percentage"), Some("92"));
            }
            other => panic!("expected submit-to, got {:?}", other),
        }
        assert!(parse_command("submit /x notapair").is_err());
    }

    #[test]
    fn history_page_must_be_numeric() {
        assert_eq!(
            parse_command("history").expect("parse"),
            Command::History { page: None }
        );
        assert_eq!(
            parse_command("history 2").expect("parse"),
            Command::History { page: Some(2) }
        );
        assert!(parse_command("history two").is_err());
    }

    #[test]
    fn blank_lines_and_aliases_parse() {
        assert_eq!(parse_command("   ").expect("parse"), Command::Nothing);
        assert_eq!(parse_command("q").expect("parse"), Command::Quit);
        assert_eq!(parse_command("exit").expect("parse"), Command::Quit);
        assert!(parse_command("launch").is_err());
    }

    #[test]
    fn wrong_arity_is_rejected_with_usage() {
        for line in ["travel 7", "travel", "season", "watch", "status a b"] {
            assert!(parse_command(line).is_err(), "{line} should be rejected");
        }
    }

    const SHORT_TTL: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn transient_notices_clear_after_the_ttl() {
        let display = StatusDisplay::with_ttl(SHORT_TTL);
        display.set_transient("Error: boom".to_string()).await;
        assert_eq!(display.current().await.as_deref(), Some("Error: boom"));

        time::sleep(SHORT_TTL * 3).await;
        assert_eq!(display.current().await, None, "notice should have expired");
    }

    #[tokio::test]
    async fn newer_lines_survive_an_old_notice_expiry() {
        let display = StatusDisplay::with_ttl(SHORT_TTL);
        display.set_transient("Error: boom".to_string()).await;
        display
            .set("Task ID: t1 | Status: PENDING...".to_string())
            .await;

        time::sleep(SHORT_TTL * 3).await;
        assert_eq!(
            display.current().await.as_deref(),
            Some("Task ID: t1 | Status: PENDING..."),
            "expiring the old notice must not wipe the newer line"
        );
    }

    #[tokio::test]
    async fn writes_from_before_a_clear_are_dropped() {
        let display = StatusDisplay::with_ttl(SHORT_TTL);
        let epoch = display.epoch().await;
        display
            .set_for(epoch, "Task ID: t1 | Status: PENDING...".to_string())
            .await;
        assert!(display.current().await.is_some());

        // As at the start of a new submission.
        display.clear().await;
        display.set("Starting simulation...".to_string()).await;

        display
            .set_for(epoch, "Task ID: t1 | Status: SUCCESS...".to_string())
            .await;
        display
            .set_transient_for(epoch, "Error: stale".to_string())
            .await;
        assert_eq!(
            display.current().await.as_deref(),
            Some("Starting simulation..."),
            "stale-epoch writes must not replace the new display"
        );
    }
}
