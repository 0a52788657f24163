use crate::config::{DeviceConfig, ProcedureConfig};
use crate::context::ProcedureContext;
use crate::error::Result;
use crate::record::SessionRecord;
use crate::routines::{self, CountdownOutcome};
use crate::scheduler::RoutineScheduler;
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use syncc_comms::{DeviceClient, Devices, MarkerBroadcast, MarkerSink, MarkerTransport};
use syncc_core::{PatchState, Stage, Surface};
use syncc_timing::Clock;
use tracing::{info, warn};

/// Top-level sequencer: Setup, then every stage from the configured start
/// stage through WrapUp.
///
/// Construction is Setup. Devices are health-checked and every marker channel is
/// open before any stage can run, whichever stage the session starts at.
pub struct ProcedureStateMachine<S, C, D, K, R>
where
    S: Surface,
    C: Clock,
    D: DeviceClient,
    K: MarkerSink,
    R: Rng,
{
    ctx: ProcedureContext,
    scheduler: RoutineScheduler<S, C>,
    devices: Devices<D>,
    markers: MarkerBroadcast<K>,
    rng: R,
    stage: Stage,
    record: SessionRecord,
}

impl<S, C, D, K, R> ProcedureStateMachine<S, C, D, K, R>
where
    S: Surface,
    C: Clock,
    D: DeviceClient,
    K: MarkerSink,
    R: Rng,
{
    /// Validates the configuration, checks device health and opens one
    /// marker stream per device. Unreachable devices are logged and the
    /// session continues; a stream that cannot be opened is fatal.
    pub fn setup<T>(
        ctx: ProcedureContext,
        surface: S,
        clock: C,
        client: D,
        transport: &mut T,
        rng: R,
    ) -> Result<Self>
    where
        T: MarkerTransport<Sink = K>,
    {
        let config = Arc::clone(ctx.config());
        config.validate()?;
        info!(
            participant = %ctx.session().participant,
            stem = %ctx.session().stem,
            start_stage = %config.start_stage,
            debug = config.debug,
            "setting up procedure"
        );

        let mut devices = Devices::new(
            client,
            config.devices.iter().map(DeviceConfig::connection).collect(),
        );
        let health = devices.check_all();
        if health.iter().any(|ok| !ok) {
            warn!("continuing with unreachable devices; their recordings may be missing");
        }

        let mut markers = MarkerBroadcast::new(Arc::new(config.markers.clone()));
        for device in &config.devices {
            let sink = transport.open(&device.stream, &device.endpoint)?;
            markers.add_channel(&device.role, sink);
        }

        let mut scheduler =
            RoutineScheduler::new(surface, clock, config.frame_tolerance, config.keys.abort.clone());
        scheduler.set_patch(PatchState::Off);

        let mut record = SessionRecord::new(&ctx);
        record.stages.push(Stage::Setup);

        Ok(Self {
            ctx,
            scheduler,
            devices,
            markers,
            rng,
            stage: Stage::Setup,
            record,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn context(&self) -> &ProcedureContext {
        &self.ctx
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn scheduler(&self) -> &RoutineScheduler<S, C> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut RoutineScheduler<S, C> {
        &mut self.scheduler
    }

    pub fn devices(&self) -> &Devices<D> {
        &self.devices
    }

    pub fn markers(&self) -> &MarkerBroadcast<K> {
        &self.markers
    }

    /// Runs from the configured start stage to the end and returns the path
    /// of the saved session record. An abort returns
    /// [`crate::ProcedureError::Aborted`] and saves nothing.
    pub fn run(&mut self) -> Result<PathBuf> {
        let mut stage = self.ctx.config().start_stage;
        // Resuming after the movies still needs the researcher's word that
        // both devices are calibrated.
        if stage == Stage::FreeConversation {
            self.confirm_calibration()?;
        }
        loop {
            self.stage = stage;
            info!(stage = %stage, "entering stage");
            match stage {
                Stage::Setup => {}
                Stage::Calibration => self.calibration()?,
                Stage::Movies => self.movies()?,
                Stage::FreeConversation => self.free_conversation()?,
                Stage::WrapUp => return self.wrap_up(),
            }
            self.record.stages.push(stage);
            stage = stage.next().unwrap_or(Stage::WrapUp);
        }
    }

    fn config(&self) -> Arc<ProcedureConfig> {
        Arc::clone(self.ctx.config())
    }

    fn gate(&mut self, msg: &str) -> Result<()> {
        let config = self.config();
        routines::interrupt(
            &mut self.scheduler,
            msg,
            &[config.keys.next.as_str()],
            config.timeouts.gate_secs,
        )?;
        Ok(())
    }

    fn send_marker(&mut self, name: &str) -> Result<()> {
        self.markers.send_all(name)?;
        info!(marker = name, "marker sent to all devices");
        Ok(())
    }

    pub fn calibration(&mut self) -> Result<()> {
        let config = self.config();
        let key = &config.keys.next;
        self.gate(&format!(
            "Press '{key}' when the fNIRS caps are properly set. This will start calibration of the caregiver device."
        ))?;
        let stats = routines::measure_frames(&mut self.scheduler, config.calibration_frames)?;
        self.record.calibration = Some(stats);
        self.gate(&format!(
            "Press '{key}' when caregiver calibration has been successful. This will start calibration of the child device."
        ))?;
        Ok(())
    }

    /// The permutation to present: the configured replay order, or a fresh
    /// random one.
    fn movie_order(&mut self, config: &ProcedureConfig) -> Vec<String> {
        match &config.movies.order {
            Some(order) => order.clone(),
            None => {
                let mut names: Vec<String> =
                    config.movies.items.iter().map(|m| m.name.clone()).collect();
                names.shuffle(&mut self.rng);
                names
            }
        }
    }

    fn confirm_calibration(&mut self) -> Result<()> {
        let key = self.config().keys.next.clone();
        self.gate(&format!(
            "Press '{key}' when calibration has been successful. This will start recording and initialize the stimuli."
        ))
    }

    pub fn movies(&mut self) -> Result<()> {
        let config = self.config();
        let key = &config.keys.next;
        self.confirm_calibration()?;

        let ctx = &self.ctx;
        self.devices
            .start_all(|conn| ctx.recording_label(conn.tag(), "movies"));

        let order = self.movie_order(&config);
        info!(order = ?order, "movie order");
        self.record.movie_order = order.clone();

        routines::show_cross(&mut self.scheduler);
        self.gate(&format!("Press '{key}' to begin stimulus procedure..."))?;

        for name in &order {
            let (Some(movie), Some(ordinal)) = (config.movie(name), config.movie_ordinal(name))
            else {
                continue;
            };
            let duration = config.presentation_secs(movie);

            self.send_marker(&format!("{name}_start"))?;
            let outcome = routines::run_movie(
                &mut self.scheduler,
                movie,
                ordinal,
                duration,
                config.movies.photodiode_interval_secs,
            )?;
            self.send_marker(&format!("{name}_stop"))?;
            self.record.routines.push(outcome.routine);
            self.record.photodiode.push(outcome.photodiode);

            let fixation = routines::run_fixation(&mut self.scheduler, config.movies.fixation_secs)?;
            self.record.routines.push(fixation);
        }

        self.devices.stop_all();
        Ok(())
    }

    pub fn free_conversation(&mut self) -> Result<()> {
        let config = self.config();
        let key = &config.keys.next;
        let settle = Duration::from_secs_f64(config.recording_settle_secs);

        for segment in &config.conversation.segments {
            self.gate(&format!("Press '{key}' to begin {segment}..."))?;

            let ctx = &self.ctx;
            self.devices
                .start_all(|conn| ctx.recording_label(conn.tag(), segment));
            self.scheduler.clock().sleep(settle);
            self.send_marker(&format!("{segment}_start"))?;

            let outcome =
                routines::run_conversation(&mut self.scheduler, segment, &config.conversation, key)?;
            if outcome.countdown == CountdownOutcome::Skipped {
                info!(segment = %segment, "segment ended during the countdown");
            }
            self.record.conversations.push(outcome);

            self.send_marker(&format!("{segment}_stop"))?;
            self.devices.stop_all();
        }
        Ok(())
    }

    pub fn wrap_up(&mut self) -> Result<PathBuf> {
        self.stage = Stage::WrapUp;
        self.record.stages.push(Stage::WrapUp);
        self.record.markers = self.markers.sent().to_vec();
        self.record.devices = self.devices.outcomes().to_vec();

        let path = self.record.save(&self.ctx.config().save_dir)?;
        info!(path = %path.display(), "session record saved");
        Ok(path)
    }
}
