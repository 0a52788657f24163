use std::sync::Arc;
use std::time::Duration;
use syncc_comms::{MarkerBroadcast, MarkerCodec, MarkerError, MarkerTransport, MemoryTransport};
use syncc_timing::ManualClock;

#[test]
fn start_stop_pairs_keep_order_and_transport_timestamps() {
    let clock = ManualClock::new();
    let mut transport = MemoryTransport::new(clock.clone());
    let mut markers = MarkerBroadcast::new(Arc::new(MarkerCodec::standard()));
    for (role, stream) in [("child", "cv_child_marker_in"), ("caregiver", "cv_caregiver_marker_in")] {
        markers.add_channel(role, transport.open(stream, "mem://").unwrap());
    }

    for movie in ["m2", "m1", "m3"] {
        markers.send_all(&format!("{movie}_start")).unwrap();
        clock.advance(Duration::from_secs(2));
        markers.send_all(&format!("{movie}_stop")).unwrap();
    }

    for stream in ["cv_child_marker_in", "cv_caregiver_marker_in"] {
        let records: Vec<_> = transport
            .records()
            .into_iter()
            .filter(|r| r.stream == stream)
            .collect();
        let codes: Vec<_> = records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["3", "4", "1", "2", "5", "6"]);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

#[test]
fn codec_loaded_from_configuration_is_used_as_is() {
    let codec: MarkerCodec = [("fc1_start".to_string(), "A".to_string())]
        .into_iter()
        .collect();
    let mut transport = MemoryTransport::new(ManualClock::new());
    let mut markers = MarkerBroadcast::new(Arc::new(codec));
    markers.add_channel("child", transport.open("child_in", "mem://").unwrap());

    markers.send_all("fc1_start").unwrap();
    assert_eq!(transport.records()[0].code, "A");

    let err = markers.send_all("fc1_stop").unwrap_err();
    assert!(matches!(err, MarkerError::UnknownMarker(_)));
    assert_eq!(transport.records().len(), 1);
}
