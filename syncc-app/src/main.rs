mod app;

use anyhow::{Context, Result};
use app::WindowSurface;
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use syncc_comms::{
    DeviceClient, HttpDeviceClient, MarkerTransport, MemoryTransport, SimulatedDeviceClient,
    ZmqTransport,
};
use syncc_core::{Stage, Surface};
use syncc_procedure::{
    HeadlessSurface, ProcedureConfig, ProcedureContext, ProcedureError, ProcedureStateMachine,
    SessionIdentity,
};
use syncc_timing::MonotonicClock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status of a session ended with the abort key.
const ABORT_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "syncc")]
#[command(about = "Dyad fNIRS procedure: stimuli, markers and recording control")]
#[command(version)]
struct Cli {
    /// TOML configuration; compiled defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Participant id; a random six-digit id when omitted
    #[arg(short, long)]
    participant: Option<String>,

    #[arg(short, long, default_value = "001")]
    session: String,

    /// Stage to start at: calibration, movies or free-conversation (or 2, 3, 4)
    #[arg(long)]
    start_stage: Option<Stage>,

    /// Shorten every movie to the debug length
    #[arg(long)]
    debug: bool,

    /// Run without a window, paced by the clock alone
    #[arg(long)]
    headless: bool,

    /// Keep markers in memory and simulate the recording devices
    #[arg(long)]
    dry_run: bool,

    /// Font for on-screen text
    #[arg(long)]
    font: Option<PathBuf>,

    /// Refresh rate of the headless surface
    #[arg(long, default_value_t = 60.0, value_parser = parse_refresh_hz)]
    refresh_hz: f64,
}

fn parse_refresh_hz(s: &str) -> Result<f64, String> {
    let hz: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if hz.is_finite() && hz > 0.0 {
        Ok(hz)
    } else {
        Err(format!("refresh rate must be a positive number of Hz, got {s}"))
    }
}

fn load_config(cli: &Cli) -> Result<ProcedureConfig> {
    let mut config = match &cli.config {
        Some(path) => ProcedureConfig::load(path)?,
        None => ProcedureConfig::default(),
    };
    if let Some(stage) = cli.start_stage {
        config.start_stage = stage;
    }
    config.debug |= cli.debug;
    // Nobody is at the keyboard of a headless run.
    if cli.headless && config.timeouts.gate_secs.is_none() {
        config.timeouts.gate_secs = Some(1.0);
    }
    Ok(config)
}

fn run_procedure<S, D, T>(
    ctx: ProcedureContext,
    surface: S,
    clock: MonotonicClock,
    client: D,
    mut transport: T,
) -> Result<PathBuf, ProcedureError>
where
    S: Surface,
    D: DeviceClient,
    T: MarkerTransport,
{
    let mut machine =
        ProcedureStateMachine::setup(ctx, surface, clock, client, &mut transport, rand::rng())?;
    machine.run()
}

fn with_comms<S: Surface>(
    cli: &Cli,
    ctx: ProcedureContext,
    surface: S,
    clock: MonotonicClock,
) -> Result<Result<PathBuf, ProcedureError>> {
    if cli.dry_run {
        info!("dry run: simulated devices, in-memory markers");
        let client = SimulatedDeviceClient::new(clock);
        let transport = MemoryTransport::new(clock);
        return Ok(run_procedure(ctx, surface, clock, client, transport));
    }
    let timeouts = &ctx.config().timeouts;
    let client = HttpDeviceClient::new(timeouts.health(), timeouts.command())
        .context("building the device client")?;
    let transport = ZmqTransport::new(clock);
    Ok(run_procedure(ctx, surface, clock, client, transport))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli)?);
    let participant = cli
        .participant
        .clone()
        .unwrap_or_else(|| SessionIdentity::random_participant(&mut rand::rng()));
    let session = SessionIdentity::new(participant, cli.session.clone(), Local::now());
    info!(
        "syncc {} starting: participant {}, session {}",
        env!("CARGO_PKG_VERSION"),
        session.participant,
        session.session
    );

    let clock = MonotonicClock::new();
    let abort_key = config.keys.abort.clone();
    let ctx = ProcedureContext::new(config, session);

    let outcome = if cli.headless {
        let surface = HeadlessSurface::new(clock, 1.0 / cli.refresh_hz);
        with_comms(&cli, ctx, surface, clock)?
    } else {
        let surface = WindowSurface::open(clock, &abort_key, cli.font.clone())?;
        with_comms(&cli, ctx, surface, clock)?
    };

    match outcome {
        Ok(path) => {
            info!("session complete, record saved to {}", path.display());
            Ok(())
        }
        Err(ProcedureError::Aborted) => {
            error!("session aborted, nothing saved");
            std::process::exit(ABORT_EXIT_CODE);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_the_config() {
        let cli = Cli::parse_from(["syncc", "--start-stage", "4", "--debug", "--headless"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.start_stage, Stage::FreeConversation);
        assert!(config.debug);
        assert_eq!(config.timeouts.gate_secs, Some(1.0));
    }

    #[test]
    fn refresh_rate_must_be_positive() {
        for bad in ["0", "-60", "inf", "NaN"] {
            assert!(Cli::try_parse_from(["syncc", "--headless", "--refresh-hz", bad]).is_err());
        }
        let cli = Cli::try_parse_from(["syncc", "--refresh-hz", "144"]).unwrap();
        assert_eq!(cli.refresh_hz, 144.0);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(Cli::try_parse_from(["syncc", "--start-stage", "wrap-up"]).is_err());
    }
}
