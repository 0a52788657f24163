//! The building blocks stages are assembled from: researcher gates, timed
//! routines, photodiode sequences and countdowns. All of them run on the
//! scheduler's thread and honour the abort key.

use crate::config::{ConversationConfig, MovieSpec};
use crate::error::Result;
use crate::photodiode::{PhotodiodeReport, PhotodiodeSignal};
use crate::scheduler::{RoutineReport, RoutineScheduler};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use syncc_core::{MovieStim, PatchState, Presentable, Scene, ShapeStim, StimulusComponent, Surface};
use syncc_timing::{CalibrationStats, Clock, FrameIntervals};
use tracing::info;

const GATE_POLL: Duration = Duration::from_millis(50);
const GATE_SETTLE: Duration = Duration::from_millis(100);

/// Blocks until one of `keys` is pressed, or until `timeout` seconds pass.
/// Returns the key, or `None` on timeout. Keys pressed before the prompt
/// are discarded; the abort key is honoured throughout.
pub fn interrupt<S: Surface, C: Clock>(
    sched: &mut RoutineScheduler<S, C>,
    msg: &str,
    keys: &[&str],
    timeout: Option<f64>,
) -> Result<Option<String>> {
    info!(target: "researcher", "{msg}");
    sched.flip_rest();
    sched.poll_keys()?;

    let started = sched.clock().now();
    let pressed = loop {
        if let Some(key) = sched
            .poll_keys()?
            .into_iter()
            .find(|k| keys.contains(&k.as_str()))
        {
            break Some(key);
        }
        if let Some(limit) = timeout {
            if sched.clock().now() - started >= limit {
                info!(target: "researcher", "no key within {limit} s, continuing");
                break None;
            }
        }
        sched.clock().sleep(GATE_POLL);
    };

    sched.flip_rest();
    sched.clock().sleep(GATE_SETTLE);
    Ok(pressed)
}

/// Shows the fixation cross until the next flip.
pub fn show_cross<S: Surface, C: Clock>(sched: &mut RoutineScheduler<S, C>) -> f64 {
    let scene = Scene {
        visuals: vec![ShapeStim::fixation_cross().visual(0.0)],
        patch: sched.patch(),
    };
    sched.flip(&scene)
}

pub fn run_fixation<S: Surface, C: Clock>(
    sched: &mut RoutineScheduler<S, C>,
    duration: f64,
) -> Result<RoutineReport> {
    let mut comps = [StimulusComponent::new(ShapeStim::fixation_cross())];
    sched.run("fixation", &mut comps, Some(duration))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieOutcome {
    pub routine: RoutineReport,
    pub photodiode: PhotodiodeReport,
}

/// Presents one movie for `duration` seconds while the photodiode encodes
/// its ordinal. The patch returns to rest afterwards, aborted or not.
pub fn run_movie<S: Surface, C: Clock>(
    sched: &mut RoutineScheduler<S, C>,
    movie: &MovieSpec,
    ordinal: u32,
    duration: f64,
    interval: f64,
) -> Result<MovieOutcome> {
    info!(movie = %movie.name, ordinal, duration, "initializing movie");
    let mut comps = [StimulusComponent::new(MovieStim::new(
        &movie.name,
        &movie.path,
        movie.duration_secs,
    ))
    .with_duration(duration)];

    let mut signal = PhotodiodeSignal::for_movie(ordinal, interval);
    signal.reset_leading();
    let started = sched.clock().now();

    let result = sched.run_with(&movie.name, &mut comps, Some(duration), |frame, scene| {
        signal.tick(frame.flip_global);
        scene.patch = signal.state();
    });
    signal.rest();
    sched.set_patch(PatchState::Off);
    let routine = result?;

    info!(movie = %movie.name, toggles = signal.count(), "movie finished");
    Ok(MovieOutcome {
        routine,
        photodiode: PhotodiodeReport {
            label: movie.name.clone(),
            toggles: signal.count(),
            target: signal.target(),
            started,
            finished: sched.clock().now(),
        },
    })
}

/// Timing beacon: `toggles` transitions, the first one `interval` seconds
/// in. Flips every frame and returns after the last transition was shown.
pub fn beacon<S: Surface, C: Clock>(
    sched: &mut RoutineScheduler<S, C>,
    label: &str,
    toggles: u32,
    interval: f64,
) -> Result<PhotodiodeReport> {
    let mut signal = PhotodiodeSignal::new(toggles, interval);
    sched.routine_clock_mut().reset();
    signal.reset(0.0);
    let started = sched.routine_clock().origin();

    let result = loop {
        signal.tick(sched.routine_clock().elapsed());
        if let Err(e) = sched.poll_keys() {
            break Err(e);
        }
        sched.flip(&Scene::blank(signal.state()));
        if signal.is_complete() {
            break Ok(());
        }
    };
    sched.set_patch(PatchState::Off);
    result?;

    let finished = sched.clock().now();
    info!(beacon = label, toggles = signal.count(), elapsed = finished - started, "beacon done");
    Ok(PhotodiodeReport {
        label: label.to_string(),
        toggles: signal.count(),
        target: signal.target(),
        started,
        finished,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountdownOutcome {
    Completed,
    /// The researcher ended it early with the continuation key.
    Skipped,
}

/// Researcher-facing countdown. Keeps flipping the resting scene so the
/// abort key stays responsive.
pub fn countdown<S: Surface, C: Clock>(
    sched: &mut RoutineScheduler<S, C>,
    label: &str,
    duration: f64,
    next_key: &str,
) -> Result<CountdownOutcome> {
    let started = sched.clock().now();
    let mut shown = None;
    loop {
        let elapsed = sched.clock().now() - started;
        if elapsed >= duration {
            return Ok(CountdownOutcome::Completed);
        }
        let remaining = (duration - elapsed) as u64;
        if shown != Some(remaining) {
            info!(target: "researcher", "{label}: {remaining} s");
            shown = Some(remaining);
        }
        sched.flip_rest();
        if sched.poll_keys()?.iter().any(|k| k == next_key) {
            info!(target: "researcher", "{label}: ended early");
            return Ok(CountdownOutcome::Skipped);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationOutcome {
    pub segment: String,
    pub countdown: CountdownOutcome,
    /// `None` when the countdown was skipped and the conversation never ran.
    pub conversation: Option<CountdownOutcome>,
    pub beacons: Vec<PhotodiodeReport>,
}

/// One free-conversation segment between its start and stop markers:
/// countdown, start beacon, cue, timed conversation, cue, stop beacon.
/// Skipping the countdown skips everything after it.
pub fn run_conversation<S: Surface, C: Clock>(
    sched: &mut RoutineScheduler<S, C>,
    segment: &str,
    config: &ConversationConfig,
    next_key: &str,
) -> Result<ConversationOutcome> {
    sched.set_patch(PatchState::Off);
    let pre = countdown(sched, "Countdown. Time left", config.countdown_secs, next_key)?;
    if pre == CountdownOutcome::Skipped {
        return Ok(ConversationOutcome {
            segment: segment.to_string(),
            countdown: pre,
            conversation: None,
            beacons: Vec::new(),
        });
    }

    let start = beacon(
        sched,
        &format!("{segment}_start"),
        config.beacon_toggles,
        config.beacon_interval_secs,
    )?;
    sched.surface_mut().cue();

    let talk = countdown(
        sched,
        "Unrestricted conversation. Time left",
        config.length_secs,
        next_key,
    )?;

    sched.surface_mut().cue();
    let stop = beacon(
        sched,
        &format!("{segment}_stop"),
        config.beacon_toggles,
        config.beacon_interval_secs,
    )?;

    Ok(ConversationOutcome {
        segment: segment.to_string(),
        countdown: pre,
        conversation: Some(talk),
        beacons: vec![start, stop],
    })
}

/// Flips `frames` resting frames and summarises the intervals between them.
pub fn measure_frames<S: Surface, C: Clock>(
    sched: &mut RoutineScheduler<S, C>,
    frames: usize,
) -> Result<CalibrationStats> {
    let mut intervals = FrameIntervals::new(frames.max(1));
    let mut last = sched.flip_rest();
    for _ in 0..frames {
        sched.poll_keys()?;
        let at = sched.flip_rest();
        intervals.record_frame(Duration::from_secs_f64((at - last).max(0.0)));
        last = at;
    }

    let stats = intervals.calibration_stats();
    info!(
        "Calibration: {:.3} ms/frame, {:.1} Hz, jitter {:.3} ms over {} frames",
        stats.average_frame_time_ns / 1_000_000.0,
        stats.effective_fps,
        stats.jitter_ns / 1_000_000.0,
        stats.samples,
    );
    Ok(stats)
}
