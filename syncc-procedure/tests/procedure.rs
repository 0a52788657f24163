use chrono::Local;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use std::sync::Arc;
use syncc_comms::{
    DeviceAddress, DeviceCommand, MarkerRecord, MemorySink, MemoryTransport, SimulatedDeviceClient,
};
use syncc_core::Stage;
use syncc_procedure::{
    ConfigError, ConversationConfig, CountdownOutcome, HeadlessSurface, MovieConfig, MovieSpec,
    ProcedureConfig, ProcedureContext, ProcedureError, ProcedureStateMachine, SessionIdentity,
    SessionRecord, TimeoutConfig,
};
use syncc_timing::{Clock, ManualClock};

const EPS: f64 = 0.005;
const CHILD: &str = "cv_child_marker_in";
const CAREGIVER: &str = "cv_caregiver_marker_in";

type Machine = ProcedureStateMachine<
    HeadlessSurface<ManualClock>,
    ManualClock,
    SimulatedDeviceClient<ManualClock>,
    MemorySink<ManualClock>,
    StdRng,
>;

struct Rig {
    clock: ManualClock,
    transport: MemoryTransport<ManualClock>,
    client: SimulatedDeviceClient<ManualClock>,
}

impl Rig {
    fn new() -> Self {
        let clock = ManualClock::new();
        Self {
            transport: MemoryTransport::new(clock.clone()),
            client: SimulatedDeviceClient::new(clock.clone()),
            clock,
        }
    }

    fn machine(
        &mut self,
        config: ProcedureConfig,
        keys: &[(f64, &str)],
    ) -> Result<Machine, ProcedureError> {
        let mut surface = HeadlessSurface::new(self.clock.clone(), 0.01);
        for (at, key) in keys {
            surface.press_at(*at, *key);
        }
        let ctx = ProcedureContext::new(
            Arc::new(config),
            SessionIdentity::new("123456", "001", Local::now()),
        );
        ProcedureStateMachine::setup(
            ctx,
            surface,
            self.clock.clone(),
            self.client.clone(),
            &mut self.transport,
            StdRng::seed_from_u64(11),
        )
    }

    fn stream(&self, stream: &str) -> Vec<MarkerRecord> {
        self.transport
            .records()
            .into_iter()
            .filter(|r| r.stream == stream)
            .collect()
    }

    fn marker_time(&self, stream: &str, code: &str) -> f64 {
        self.stream(stream)
            .iter()
            .find(|r| r.code == code)
            .map(|r| r.timestamp)
            .unwrap_or_else(|| panic!("marker {code} not sent on {stream}"))
    }

    /// Start/stop calls in issue order, as (role tag or "stop", time).
    fn recording_calls(&self) -> Vec<(String, f64)> {
        self.client
            .calls()
            .into_iter()
            .filter_map(|call| match call.command {
                DeviceCommand::Start { label } => Some((label, call.at)),
                DeviceCommand::Stop => Some(("stop".to_string(), call.at)),
                DeviceCommand::Health => None,
            })
            .collect()
    }
}

fn config(save_dir: &Path, start_stage: Stage) -> ProcedureConfig {
    ProcedureConfig {
        start_stage,
        save_dir: save_dir.to_path_buf(),
        calibration_frames: 30,
        movies: MovieConfig {
            items: vec![
                MovieSpec::new("m1", "m1.mp4", 3.5),
                MovieSpec::new("m2", "m2.mp4", 3.5),
                MovieSpec::new("m3", "m3.mp4", 3.5),
            ],
            order: Some(vec!["m2".into(), "m1".into(), "m3".into()]),
            fixation_secs: 1.0,
            ..MovieConfig::default()
        },
        conversation: ConversationConfig {
            segments: vec!["fc1".into()],
            countdown_secs: 2.0,
            length_secs: 3.0,
            ..ConversationConfig::default()
        },
        timeouts: TimeoutConfig {
            gate_secs: Some(0.2),
            ..TimeoutConfig::default()
        },
        ..ProcedureConfig::default()
    }
}

#[test]
fn movies_are_bracketed_by_their_markers() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = Rig::new();
    let mut machine = rig.machine(config(dir.path(), Stage::Movies), &[]).unwrap();
    machine.movies().unwrap();

    let expected = ["3", "4", "1", "2", "5", "6"];
    for stream in [CHILD, CAREGIVER] {
        let codes: Vec<_> = rig.stream(stream).into_iter().map(|r| r.code).collect();
        assert_eq!(codes, expected);
    }

    let record = machine.record();
    assert_eq!(record.movie_order, vec!["m2", "m1", "m3"]);
    let names: Vec<_> = record.routines.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["m2", "fixation", "m1", "fixation", "m3", "fixation"]);

    let codes = [("m2", "3", "4"), ("m1", "1", "2"), ("m3", "5", "6")];
    for (name, start_code, stop_code) in codes {
        let routine = record.routines.iter().find(|r| r.name == name).unwrap();
        let timing = routine.component(name).unwrap();
        for stream in [CHILD, CAREGIVER] {
            let start = rig.marker_time(stream, start_code);
            let stop = rig.marker_time(stream, stop_code);
            assert!(start < timing.t_start_refresh.unwrap());
            assert!(stop >= routine.origin + timing.t_stop.unwrap());
        }
        assert!((timing.presented_for().unwrap() - 3.5).abs() <= EPS);
    }

    let toggles: Vec<_> = record
        .photodiode
        .iter()
        .map(|p| (p.label.as_str(), p.toggles))
        .collect();
    assert_eq!(toggles, vec![("m2", 4), ("m1", 2), ("m3", 6)]);

    let calls = rig.recording_calls();
    let stem = &machine.context().session().stem;
    assert_eq!(calls[0].0, format!("{stem}_d_movies"));
    assert_eq!(calls[1].0, format!("{stem}_m_movies"));
    assert_eq!(calls[2].0, "stop");
    assert_eq!(calls[3].0, "stop");
    let last_fixation = record.routines.last().unwrap();
    let fixation_end = last_fixation.origin + last_fixation.components[0].t_stop.unwrap();
    assert!(calls[2].1 >= fixation_end);
    assert!(calls[1].1 < rig.marker_time(CHILD, "3"));
}

#[test]
fn free_conversation_runs_its_phases_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = Rig::new();
    let mut machine = rig
        .machine(config(dir.path(), Stage::FreeConversation), &[])
        .unwrap();
    machine.free_conversation().unwrap();

    let calls = rig.recording_calls();
    let stem = machine.context().session().stem.clone();
    let labels: Vec<String> = calls.iter().map(|(l, _)| l.clone()).collect();
    let expected = vec![
        format!("{stem}_d_fc1"),
        format!("{stem}_m_fc1"),
        "stop".to_string(),
        "stop".to_string(),
    ];
    assert_eq!(labels, expected);

    let fc1_start = rig.marker_time(CHILD, "7");
    let fc1_stop = rig.marker_time(CHILD, "8");
    assert!(calls[1].1 < fc1_start);
    assert!((fc1_start - calls[1].1 - 1.0).abs() < 1e-6);

    let outcome = &machine.record().conversations[0];
    assert_eq!(outcome.countdown, CountdownOutcome::Completed);
    assert_eq!(outcome.conversation, Some(CountdownOutcome::Completed));
    let [start, stop] = &outcome.beacons[..] else {
        panic!("expected two beacons");
    };
    assert_eq!((start.toggles, stop.toggles), (4, 4));
    assert!(start.started >= fc1_start + 2.0);
    assert!(start.finished - start.started >= 4.0 - EPS);
    assert!(stop.started - start.finished >= 3.0);
    assert!(stop.finished - stop.started >= 4.0 - EPS);
    assert!(fc1_stop >= stop.finished);

    let span = fc1_stop - fc1_start;
    assert!(span >= 13.0 - EPS && span < 13.5, "fc1 lasted {span}");
    assert!(calls[2].1 >= fc1_stop);

    let cues = machine.scheduler().surface().cues();
    assert_eq!(cues.len(), 2);
    assert!(cues[0] >= start.finished && cues[1] <= stop.started);
}

#[test]
fn early_exit_in_countdown_still_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = Rig::new();
    let mut machine = rig
        .machine(config(dir.path(), Stage::FreeConversation), &[(2.0, "x")])
        .unwrap();
    machine.free_conversation().unwrap();

    let codes: Vec<_> = rig.stream(CAREGIVER).into_iter().map(|r| r.code).collect();
    assert_eq!(codes, vec!["7", "8"]);
    let outcome = &machine.record().conversations[0];
    assert_eq!(outcome.countdown, CountdownOutcome::Skipped);
    assert!(outcome.beacons.is_empty());
    let calls = rig.recording_calls();
    assert_eq!(calls.iter().filter(|(l, _)| l == "stop").count(), 2);
}

#[test]
fn starting_late_still_runs_setup() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = Rig::new();
    let mut machine = rig
        .machine(config(dir.path(), Stage::FreeConversation), &[])
        .unwrap();

    let health = rig
        .client
        .calls()
        .into_iter()
        .filter(|c| c.command == DeviceCommand::Health)
        .count();
    assert_eq!(health, 2);
    assert_eq!(machine.markers().channels().len(), 2);
    assert_eq!(machine.stage(), Stage::Setup);

    let path = machine.run().unwrap();
    let record = SessionRecord::load(&path).unwrap();
    assert_eq!(
        record.stages,
        vec![Stage::Setup, Stage::FreeConversation, Stage::WrapUp]
    );
    assert!(record.calibration.is_none());
    assert!(record.movie_order.is_empty());
    assert_eq!(record.markers.len(), 4);
    assert_eq!(record.devices.len(), 6);
}

#[test]
fn resuming_at_free_conversation_confirms_calibration_first() {
    let dir = tempfile::tempdir().unwrap();

    let mut direct = Rig::new();
    direct
        .machine(config(dir.path(), Stage::FreeConversation), &[])
        .unwrap()
        .free_conversation()
        .unwrap();
    let one_gate = direct.recording_calls()[0].1;

    let mut resumed = Rig::new();
    resumed
        .machine(config(dir.path(), Stage::FreeConversation), &[])
        .unwrap()
        .run()
        .unwrap();
    let two_gates = resumed.recording_calls()[0].1;

    // Each gate waits out its 0.2 s timeout before continuing.
    let extra = two_gates - one_gate;
    assert!(extra >= 0.2 && extra < 0.5, "calibration gate took {extra}");
}

#[test]
fn full_session_writes_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = Rig::new();
    let mut machine = rig.machine(config(dir.path(), Stage::Calibration), &[]).unwrap();
    let path = machine.run().unwrap();

    assert!(path.starts_with(dir.path()));
    let record = SessionRecord::load(&path).unwrap();
    assert_eq!(
        record.stages,
        vec![
            Stage::Setup,
            Stage::Calibration,
            Stage::Movies,
            Stage::FreeConversation,
            Stage::WrapUp
        ]
    );
    let calibration = record.calibration.unwrap();
    assert_eq!(calibration.samples, 30);
    assert!((calibration.effective_fps - 100.0).abs() < 0.1);
    assert_eq!(record.markers.len(), 2 * 8);
    assert_eq!(record.routines.len(), 6);
    assert_eq!(record.conversations.len(), 1);
}

#[test]
fn abort_ends_the_session_without_a_record() {
    let dir = tempfile::tempdir().unwrap();
    let save_dir = dir.path().join("sessions");
    let mut rig = Rig::new();
    let mut machine = rig
        .machine(config(&save_dir, Stage::Movies), &[(2.0, "escape")])
        .unwrap();

    let err = machine.run().unwrap_err();
    assert!(err.is_abort());
    assert_eq!(machine.stage(), Stage::Movies);
    assert!(!save_dir.exists());

    let codes: Vec<_> = rig.stream(CHILD).into_iter().map(|r| r.code).collect();
    assert_eq!(codes, vec!["3"]);
    assert!(rig.clock.now() < 2.1);
}

#[test]
fn unmapped_marker_is_rejected_before_anything_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = Rig::new();
    let mut config = config(dir.path(), Stage::Movies);
    config.conversation.segments.push("fc3".into());

    let err = rig.machine(config, &[]).err().unwrap();
    assert!(matches!(
        err,
        ProcedureError::Config(ConfigError::UnmappedMarker(ref name)) if name == "fc3_start"
    ));
    assert!(rig.client.calls().is_empty());
    assert!(rig.transport.records().is_empty());
}

#[test]
fn unreachable_device_does_not_stop_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = Rig::new();
    rig.client.set_unreachable(DeviceAddress::new("localhost", 8888));
    let mut machine = rig
        .machine(config(dir.path(), Stage::FreeConversation), &[])
        .unwrap();
    machine.free_conversation().unwrap();

    let outcomes = machine.devices().outcomes();
    let caregiver: Vec<_> = outcomes
        .iter()
        .filter(|o| o.role == "caregiver")
        .map(|o| o.ok)
        .collect();
    let child: Vec<_> = outcomes
        .iter()
        .filter(|o| o.role == "child")
        .map(|o| o.ok)
        .collect();
    assert_eq!(caregiver, vec![true, true, true]);
    assert_eq!(child, vec![false, false, false]);
    assert_eq!(rig.stream(CHILD).len(), 2);
}
