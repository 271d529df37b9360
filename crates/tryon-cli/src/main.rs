use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Map};
use tracing_subscriber::EnvFilter;
use tryon_contracts::chat::{parse_intent, SESSION_HELP_COMMANDS};
use tryon_contracts::events::EventWriter;
use tryon_contracts::session::write_summary;
use tryon_contracts::tryon::{Angle, QualityTier, Slot, SCENARIO_PRESETS};
use tryon_engine::encoder::{decode_data_uri, extension_for_media_type};
use tryon_engine::{
    ClientConfig, CredentialSelector, DryrunClient, GeminiClient, GenerationClient, ImageAsset,
    Orchestrator, Resolution, SessionRunner, SharedCredential, SlotState, WaitReport,
};

#[derive(Debug, Parser)]
#[command(name = "tryon-rs", version, about = "Virtual try-on generation session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session driven by slash commands.
    Session(SessionArgs),
    /// One try-on (plus the garment flat-lay) and exit.
    Generate(GenerateArgs),
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "standard")]
    tier: String,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    person: PathBuf,
    #[arg(long)]
    garment: PathBuf,
    #[arg(long)]
    scenario: Option<String>,
    #[arg(long)]
    custom: Option<String>,
    #[arg(long, default_value = "front")]
    angle: String,
    #[arg(long, default_value = "standard")]
    tier: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value_t = 600)]
    timeout_s: u64,
}

const SESSION_WAIT: Duration = Duration::from_secs(600);

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tryon-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    apply_dotenv(parse_dotenv(Path::new(".env")));
    let cli = Cli::parse();
    match cli.command {
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Reads `KEY=VALUE` lines; `export` prefixes and surrounding quotes are dropped.
fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = fs::read_to_string(path).unwrap_or_default();
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

/// Process variables already set win over the file.
fn apply_dotenv(vars: HashMap<String, String>) {
    for (key, value) in vars {
        if env::var_os(&key).is_none() {
            env::set_var(key, value);
        }
    }
}

/// Prompts on the terminal for a replacement key.
struct StdinCredentialSelector {
    credential: SharedCredential,
}

impl CredentialSelector for StdinCredentialSelector {
    fn has_selected_credential(&self) -> bool {
        self.credential.is_present()
    }

    fn open_selector(&self) -> Result<()> {
        print!("API key (blank keeps the current one): ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin()
            .read_line(&mut line)
            .context("failed reading API key")?;
        let key = line.trim();
        if !key.is_empty() {
            self.credential.set(Some(key.to_string()));
        }
        Ok(())
    }
}

struct SessionSetup {
    runner: SessionRunner,
    started_at: String,
}

fn build_session(out: &Path, events: Option<&Path>, dry_run: bool) -> Result<SessionSetup> {
    fs::create_dir_all(out).with_context(|| format!("failed creating {}", out.display()))?;
    let started_at = now_utc_iso();
    let session_id = format!("tryon-{}", Utc::now().format("%Y%m%dT%H%M%S"));
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out.join("events.jsonl"));
    tracing::info!(%session_id, dry_run, events = %events_path.display(), "starting session");
    let orchestrator = Orchestrator::new(EventWriter::new(events_path, session_id));

    let (orchestrator, client): (Orchestrator, Arc<dyn GenerationClient>) = if dry_run {
        (orchestrator, Arc::new(DryrunClient))
    } else {
        let config = ClientConfig::from_env();
        let selector = StdinCredentialSelector {
            credential: config.credential.clone(),
        };
        (
            orchestrator.with_credential_selector(Arc::new(selector)),
            Arc::new(GeminiClient::new(config)),
        )
    };
    Ok(SessionSetup {
        runner: SessionRunner::new(orchestrator, client),
        started_at,
    })
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let tier = parse_tier(&args.tier)?;
    let angle = parse_angle(&args.angle)?;
    let SessionSetup {
        mut runner,
        started_at,
    } = build_session(&args.out, args.events.as_deref(), args.dry_run)?;

    let outcome = generate_once(&mut runner, &args, tier, angle);
    finish_session(&runner, &started_at, &args.out)?;
    outcome?;

    let ok = matches!(
        runner.orchestrator().slot_state(Slot::Primary),
        SlotState::Ready(_)
    );
    Ok(if ok { 0 } else { 1 })
}

fn generate_once(
    runner: &mut SessionRunner,
    args: &GenerateArgs,
    tier: QualityTier,
    angle: Angle,
) -> Result<()> {
    let person = ImageAsset::from_path(&args.person)?;
    let garment = ImageAsset::from_path(&args.garment)?;
    let orchestrator = runner.orchestrator_mut();
    if let Some(scenario) = args.scenario.as_deref() {
        orchestrator.select_scenario(&match_scenario(scenario)?);
    }
    if let Some(custom) = args.custom.as_deref() {
        orchestrator.set_custom_scenario(custom);
    }
    orchestrator.set_quality_tier(tier);
    orchestrator.select_person(person);
    let flat_lay = orchestrator.select_garment(garment);
    runner.submit_all(flat_lay)?;
    let primary = runner.orchestrator_mut().trigger_primary(Some(angle));
    runner.submit_all(primary)?;

    let report = runner.wait_idle(Duration::from_secs(args.timeout_s))?;
    print_wait_report(&report);
    print_notices(runner);

    for slot in [Slot::Primary, Slot::FlatLay] {
        if let Some(path) = save_slot(runner.orchestrator(), slot, &args.out)? {
            println!("{} -> {}", slot, path.display());
        }
    }
    Ok(())
}

fn run_session(args: SessionArgs) -> Result<()> {
    let tier = parse_tier(&args.tier)?;
    let SessionSetup {
        mut runner,
        started_at,
    } = build_session(&args.out, args.events.as_deref(), args.dry_run)?;
    runner.orchestrator_mut().set_quality_tier(tier);

    let outcome = session_loop(&mut runner, &args.out);
    finish_session(&runner, &started_at, &args.out)?;
    outcome
}

fn session_loop(runner: &mut SessionRunner, out: &Path) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Try-on session started ({} client). Type /help for commands.",
        runner.client_name()
    );

    loop {
        print_resolutions(&runner.pump()?);
        print_notices(runner);
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", SESSION_HELP_COMMANDS.join(" ")),
            "quit" => break,
            "select_person" | "select_garment" => {
                let Some(path) = intent.arg("path") else {
                    println!("/{} requires a path", intent.action.trim_start_matches("select_"));
                    continue;
                };
                let asset = match ImageAsset::from_path(Path::new(path)) {
                    Ok(asset) => asset,
                    Err(err) => {
                        println!("Could not load image: {err:#}");
                        continue;
                    }
                };
                if intent.action == "select_person" {
                    runner.orchestrator_mut().select_person(asset);
                    println!("Person set to {path}");
                } else {
                    let flat_lay = runner.orchestrator_mut().select_garment(asset);
                    runner.submit_all(flat_lay)?;
                    println!("Garment set to {path}; generating product shot");
                }
            }
            "select_scenario" => {
                let Some(name) = intent.arg("arg") else {
                    println!("/scenario requires a name (see /scenarios)");
                    continue;
                };
                match match_scenario(name) {
                    Ok(preset) => {
                        runner.orchestrator_mut().select_scenario(&preset);
                        println!("Scenario set to {preset}");
                    }
                    Err(err) => println!("{err}"),
                }
            }
            "set_custom_scenario" => {
                let text = intent.arg("arg").unwrap_or("");
                runner.orchestrator_mut().set_custom_scenario(text);
                println!("Scene: {}", runner.orchestrator().scenario());
            }
            "list_scenarios" => {
                for (index, preset) in SCENARIO_PRESETS.iter().enumerate() {
                    println!("{:>2}. {preset}", index + 1);
                }
            }
            "select_angle" => {
                let token = intent.arg("arg").unwrap_or("front");
                let dispatch = runner.orchestrator_mut().select_angle(token);
                let regenerating = dispatch.is_some();
                runner.submit_all(dispatch)?;
                let angle = runner.orchestrator().angle();
                if regenerating {
                    println!("Angle set to {angle}; regenerating");
                } else {
                    println!("Angle set to {angle}");
                }
            }
            "set_tier" => match parse_tier(intent.arg("arg").unwrap_or("")) {
                Ok(tier) => {
                    runner.orchestrator_mut().set_quality_tier(tier);
                    println!("Quality tier: {tier}");
                }
                Err(err) => println!("{err}"),
            },
            "generate" => {
                let angle = match intent.arg("arg").map(parse_angle).transpose() {
                    Ok(angle) => angle,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                let dispatch = runner.orchestrator_mut().trigger_primary(angle);
                if dispatch.is_none() {
                    println!("Nothing to generate (needs /person and /garment, or already running)");
                }
                runner.submit_all(dispatch)?;
            }
            "open_preview" => {
                let slot = parse_slot(intent.arg("arg"));
                if runner.orchestrator_mut().open_preview(slot) {
                    if let Some(preview) = runner.orchestrator().preview() {
                        println!("Previewing {} as {}", preview.slot, preview.filename);
                    }
                } else {
                    println!("No {slot} result to preview");
                }
            }
            "close_preview" => {
                if runner.orchestrator_mut().close_preview() {
                    println!("Preview closed");
                } else {
                    println!("Still rendering the new position; try again after /wait");
                }
            }
            "open_history" => {
                runner.orchestrator_mut().open_history();
                let history = runner.orchestrator().history();
                if history.is_empty() {
                    println!("History is empty");
                }
                for (index, image) in history.iter().enumerate() {
                    println!("{:>2}. {}", index + 1, describe_image(image));
                }
            }
            "close_history" => runner.orchestrator_mut().close_history(),
            "download" => {
                let slot = parse_slot(intent.arg("arg"));
                match save_slot(runner.orchestrator(), slot, out) {
                    Ok(Some(path)) => println!("Saved {}", path.display()),
                    Ok(None) => println!("No {slot} result to download"),
                    Err(err) => println!("Download failed: {err:#}"),
                }
            }
            "status" => print_status(runner),
            "wait" => {
                let report = runner.wait_idle(SESSION_WAIT)?;
                print_wait_report(&report);
            }
            "reset" => {
                runner.orchestrator_mut().reset_session();
                println!("Session reset");
            }
            "unknown" => {
                let command = intent.arg("command").unwrap_or("?");
                println!("Unknown command /{command}. Type /help.");
            }
            other => println!("Unhandled action {other}"),
        }
    }
    Ok(())
}

fn finish_session(runner: &SessionRunner, started_at: &str, out: &Path) -> Result<()> {
    let summary = runner.orchestrator().summary(started_at, &now_utc_iso());
    let mut extra = Map::new();
    extra.insert("client".to_string(), json!(runner.client_name()));
    extra.insert("in_flight".to_string(), json!(runner.in_flight()));
    write_summary(&out.join("summary.json"), &summary, Some(&extra))
}

/// Writes a slot's result into `out`. The file extension follows the
/// returned media type.
fn save_slot(orchestrator: &Orchestrator, slot: Slot, out: &Path) -> Result<Option<PathBuf>> {
    let Some(uri) = orchestrator.slot_state(slot).result() else {
        return Ok(None);
    };
    let (media_type, bytes) = decode_data_uri(uri)?;
    let path = out
        .join(orchestrator.download_filename(slot))
        .with_extension(extension_for_media_type(&media_type));
    fs::create_dir_all(out)?;
    fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(Some(path))
}

fn print_resolutions(resolutions: &[Resolution]) {
    for resolution in resolutions {
        match resolution {
            Resolution::Committed { slot, .. } => println!("{slot} ready"),
            Resolution::Retried { slot, .. } => println!("{slot} retrying with the new key"),
            Resolution::Failed { .. } | Resolution::Discarded { .. } => {}
        }
    }
}

fn print_wait_report(report: &WaitReport) {
    print_resolutions(&report.resolutions);
    if let Some(message) = wait_timeout_message(report) {
        println!("{message}");
    }
}

fn wait_timeout_message(report: &WaitReport) -> Option<String> {
    if !report.timed_out() {
        return None;
    }
    Some(format!(
        "Still waiting on {} request(s); they stay pending. Use /wait or /status later.",
        report.still_in_flight
    ))
}

fn print_notices(runner: &mut SessionRunner) {
    for notice in runner.orchestrator_mut().take_notices() {
        if notice.requires_configuration() {
            println!("{notice} (set API_KEY or GEMINI_API_KEY, e.g. in .env)");
        } else {
            println!("{notice}");
        }
    }
}

fn print_status(runner: &SessionRunner) {
    let orchestrator = runner.orchestrator();
    let asset_line = |asset: Option<&ImageAsset>| {
        asset
            .map(|asset| format!("{} ({})", asset.preview_handle(), asset.media_type()))
            .unwrap_or_else(|| "none".to_string())
    };
    println!("person:   {}", asset_line(orchestrator.person()));
    println!("garment:  {}", asset_line(orchestrator.garment()));
    println!("scene:    {}", orchestrator.scenario());
    println!("angle:    {}", orchestrator.angle());
    println!("tier:     {}", orchestrator.tier());
    for slot in [Slot::Primary, Slot::FlatLay] {
        println!(
            "{:<9} {}",
            format!("{slot}:"),
            describe_state(orchestrator.slot_state(slot))
        );
    }
    println!(
        "history:  {}/{}",
        orchestrator.history().len(),
        orchestrator.history().limit()
    );
    if let Some(preview) = orchestrator.preview() {
        println!("preview:  {} ({})", preview.slot, preview.filename);
    }
    println!("in flight: {}", runner.in_flight());
}

fn describe_state(state: &SlotState) -> String {
    match state {
        SlotState::Idle => "idle".to_string(),
        SlotState::Pending(token) => format!("pending (request {token})"),
        SlotState::Ready(image) => format!("ready, {}", describe_image(image)),
        SlotState::Failed(kind) => format!("failed: {}", kind.user_message()),
    }
}

fn describe_image(uri: &str) -> String {
    match decode_data_uri(uri) {
        Ok((media_type, bytes)) => format!("{media_type}, {} bytes", bytes.len()),
        Err(_) => "unreadable result".to_string(),
    }
}

fn parse_tier(raw: &str) -> Result<QualityTier> {
    match QualityTier::from_token(raw) {
        Some(tier) => Ok(tier),
        None => bail!("Unknown quality tier '{raw}' (standard or enhanced)"),
    }
}

fn parse_angle(raw: &str) -> Result<Angle> {
    match Angle::from_token(raw) {
        Some(angle) => Ok(angle),
        None => {
            let tokens: Vec<&str> = Angle::ALL.iter().map(|angle| angle.token()).collect();
            bail!("Unknown angle '{raw}' ({})", tokens.join(", "))
        }
    }
}

fn parse_slot(raw: Option<&str>) -> Slot {
    let normalized: String = raw
        .unwrap_or("")
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "flat" | "flatlay" | "garment" | "product" => Slot::FlatLay,
        _ => Slot::Primary,
    }
}

/// Case-insensitive preset lookup; a number selects by position.
fn match_scenario(raw: &str) -> Result<String> {
    let wanted = raw.trim();
    if let Ok(index) = wanted.parse::<usize>() {
        if let Some(preset) = index.checked_sub(1).and_then(|i| SCENARIO_PRESETS.get(i)) {
            return Ok(preset.to_string());
        }
    }
    SCENARIO_PRESETS
        .iter()
        .find(|preset| preset.eq_ignore_ascii_case(wanted))
        .map(|preset| preset.to_string())
        .with_context(|| format!("Unknown scenario '{wanted}'; use /custom for free text"))
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
