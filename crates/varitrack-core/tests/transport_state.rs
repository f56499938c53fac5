use std::{
    thread,
    time::{Duration, Instant},
};

use varitrack_core::{
    BoundaryAvailability, ChannelLayout, GraphError, PcmFormat, PlaybackState, TrackHandle,
    TrackId, TrackStore, TransportConfig, TransportError,
    fixtures::{CollectingSink, ObserverEvent, TransportHarness, tone_source},
};

const RATE: u32 = 100;

fn format() -> PcmFormat {
    PcmFormat::new(RATE, 1)
}

fn harness(tracks: &[(&str, f64)]) -> TransportHarness {
    let sources = tracks
        .iter()
        .map(|(id, seconds)| tone_source(id, RATE, ChannelLayout::Mono, *seconds))
        .collect();
    TransportHarness::new(format(), sources)
}

fn handle(harness: &TransportHarness, id: &str) -> TrackHandle {
    harness
        .store
        .list_tracks()
        .expect("memory store should list")
        .into_iter()
        .find(|handle| handle.id.as_str() == id)
        .expect("track should be in the store")
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn load_track_starts_paused_at_zero() {
    let h = harness(&[("a.wav", 4.0)]);
    assert_eq!(h.controller.state(), PlaybackState::Idle);

    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");

    assert_eq!(h.controller.state(), PlaybackState::Paused);
    assert_close(h.controller.position(), 0.0);
    assert_close(h.controller.duration(), 4.0);
    assert!(
        h.observer
            .events()
            .contains(&ObserverEvent::TrackLoaded(TrackId::new("a.wav"), 4.0))
    );
}

#[test]
fn seek_while_paused_moves_position_and_clamps() {
    let h = harness(&[("a.wav", 4.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");

    h.controller.seek(1.5).expect("seek should succeed");
    assert_close(h.controller.position(), 1.5);
    assert_eq!(h.observer.last_position(), Some(1.5));
    assert_eq!(h.controller.state(), PlaybackState::Paused);

    h.controller.seek(10.0).expect("seek past end should clamp");
    assert_close(h.controller.position(), 4.0);

    h.controller.seek(-3.0).expect("negative seek should clamp");
    assert_close(h.controller.position(), 0.0);
}

#[test]
fn position_follows_device_clock_across_pause() {
    let h = harness(&[("a.wav", 4.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");

    h.controller.play().expect("play should succeed");
    assert!(h.controller.is_playing());
    h.device.pump(100);
    assert_close(h.controller.position(), 1.0);

    h.controller.pause().expect("pause should succeed");
    assert_close(h.controller.position(), 1.0);
    h.device.pump(50);
    assert_close(h.controller.position(), 1.0);

    h.controller.play().expect("resume should succeed");
    h.device.pump(50);
    assert_close(h.controller.position(), 1.5);
    assert_eq!(h.observer.playback_changes(), vec![true, false, true]);
}

#[test]
fn seek_while_playing_keeps_playing_from_new_offset() {
    let h = harness(&[("a.wav", 4.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");
    h.device.pump(100);

    h.controller.seek(3.0).expect("seek should succeed");
    assert_eq!(h.controller.state(), PlaybackState::Playing);
    assert_close(h.controller.position(), 3.0);

    h.device.pump(50);
    assert_close(h.controller.position(), 3.5);
}

#[test]
fn rate_is_clamped_and_scales_track_time() {
    let h = harness(&[("a.wav", 4.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");

    assert!((h.controller.set_rate(5.0).expect("rate should apply") - 2.0).abs() < f32::EPSILON);
    assert!((h.controller.set_rate(0.1).expect("rate should apply") - 0.5).abs() < f32::EPSILON);
    assert!((h.controller.set_rate(1.5).expect("rate should apply") - 1.5).abs() < f32::EPSILON);

    h.controller.play().expect("play should succeed");
    h.device.pump(100);
    assert_close(h.controller.position(), 1.5);
}

#[test]
fn seek_at_non_unity_rate_lands_on_target() {
    let h = harness(&[("a.wav", 4.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.set_rate(1.5).expect("rate should apply");

    h.controller.seek(1.0).expect("paused seek should succeed");
    assert_close(h.controller.position(), 1.0);
    h.controller.play().expect("play should succeed");
    h.device.pump(50);
    assert_close(h.controller.position(), 1.75);

    h.controller.seek(2.0).expect("playing seek should succeed");
    assert_close(h.controller.position(), 2.0);
    assert!(h.controller.is_playing());
    h.device.pump(100);
    assert_close(h.controller.position(), 3.5);
}

#[test]
fn tick_publishes_position_before_end() {
    let h = harness(&[("a.wav", 1.0), ("b.wav", 1.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");
    h.device.pump(50);

    h.controller.tick();
    assert_eq!(h.observer.last_position(), Some(0.5));
    assert_eq!(h.controller.current_track(), Some(TrackId::new("a.wav")));
}

#[test]
fn end_of_track_advances_to_next_and_keeps_playing() {
    let h = harness(&[("a.wav", 1.0), ("b.wav", 2.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");
    h.device.pump(110);

    h.controller.tick();

    assert_eq!(h.controller.current_track(), Some(TrackId::new("b.wav")));
    assert_eq!(h.controller.state(), PlaybackState::Playing);
    assert_close(h.controller.position(), 0.0);
    assert_close(h.controller.duration(), 2.0);
    assert_eq!(h.observer.playback_changes(), vec![true]);
}

#[test]
fn end_of_last_track_settles_paused_at_duration() {
    let h = harness(&[("a.wav", 1.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");
    h.device.pump(120);

    h.controller.tick();

    assert_eq!(h.controller.state(), PlaybackState::Paused);
    assert_close(h.controller.position(), 1.0);
    assert_eq!(h.observer.last_position(), Some(1.0));
    assert_eq!(h.observer.playback_changes(), vec![true, false]);

    h.controller.play().expect("play at end should restart");
    assert_close(h.controller.position(), 0.0);
    assert!(h.controller.is_playing());
}

#[test]
fn repeat_restarts_the_same_track() {
    let h = harness(&[("a.wav", 1.0), ("b.wav", 1.0)]);
    assert!(h.controller.toggle_repeat().expect("toggle should succeed"));
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");
    h.device.pump(110);

    h.controller.tick();

    assert_eq!(h.controller.current_track(), Some(TrackId::new("a.wav")));
    assert_eq!(h.controller.state(), PlaybackState::Playing);
    assert_close(h.controller.position(), 0.0);
}

#[test]
fn toggle_repeat_flips_persisted_flag() {
    let h = harness(&[]);
    assert!(!h.controller.repeat_enabled());
    assert!(h.controller.toggle_repeat().expect("toggle should succeed"));
    assert!(h.controller.repeat_enabled());
    assert!(!h.controller.toggle_repeat().expect("toggle should succeed"));
    assert!(!h.controller.repeat_enabled());
}

#[test]
fn navigation_stops_at_playlist_boundaries() {
    let h = harness(&[("a.wav", 1.0), ("b.wav", 1.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    assert_eq!(
        h.observer.last_availability(),
        Some(BoundaryAvailability {
            has_previous: false,
            has_next: true,
        })
    );

    assert!(!h.controller.previous_track().expect("previous should resolve"));
    assert_eq!(h.controller.current_track(), Some(TrackId::new("a.wav")));

    assert!(h.controller.next_track().expect("next should resolve"));
    assert_eq!(h.controller.current_track(), Some(TrackId::new("b.wav")));
    assert_eq!(
        h.controller
            .boundary_availability()
            .expect("availability should resolve"),
        BoundaryAvailability {
            has_previous: true,
            has_next: false,
        }
    );

    assert!(!h.controller.next_track().expect("next should resolve"));
    assert_eq!(h.controller.current_track(), Some(TrackId::new("b.wav")));
}

#[test]
fn navigation_while_playing_keeps_playing() {
    let h = harness(&[("a.wav", 1.0), ("b.wav", 1.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");

    assert!(h.controller.next_track().expect("next should resolve"));
    assert_eq!(h.controller.state(), PlaybackState::Playing);
    assert_close(h.controller.position(), 0.0);
}

#[test]
fn unavailable_engine_fails_play_and_recovers() {
    let h = harness(&[("a.wav", 1.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.device.set_available(false);

    let error = h.controller.play().expect_err("play should fail");
    assert!(matches!(
        error,
        TransportError::Graph(GraphError::EngineUnavailable(_))
    ));
    assert_eq!(h.controller.state(), PlaybackState::Paused);

    h.device.set_available(true);
    h.controller.play().expect("play should recover");
    assert!(h.controller.is_playing());
}

#[test]
fn attach_failure_leaves_transport_idle() {
    let h = harness(&[("a.wav", 1.0)]);
    h.device.set_available(false);

    let error = h
        .controller
        .open_track(&handle(&h, "a.wav"))
        .expect_err("attach should fail");
    assert!(matches!(error, TransportError::Graph(GraphError::Attach(_))));
    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.current_track(), None);

    h.controller.play().expect("play without a track is a no-op");
    assert_eq!(h.controller.state(), PlaybackState::Idle);
}

#[test]
fn background_poll_detects_end_of_track() {
    let h = TransportHarness::with_config(
        format(),
        vec![tone_source("a.wav", RATE, ChannelLayout::Mono, 1.0)],
        TransportConfig {
            poll_interval: Duration::from_millis(10),
            ..TransportConfig::default()
        },
    );
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");
    h.device.pump(150);

    let deadline = Instant::now() + Duration::from_secs(5);
    while h.controller.is_playing() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(h.controller.state(), PlaybackState::Paused);
    assert_close(h.controller.position(), 1.0);
}

#[test]
fn shutdown_releases_the_device() {
    let h = harness(&[("a.wav", 1.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.play().expect("play should succeed");
    assert!(h.device.is_open());

    h.controller.shutdown();

    assert!(!h.device.is_open());
    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.current_track(), None);
}

#[test]
fn controller_refuses_work_after_shutdown() {
    let h = harness(&[("a.wav", 1.0), ("b.wav", 1.0)]);
    h.controller
        .open_track(&handle(&h, "a.wav"))
        .expect("track should load");
    h.controller.shutdown();

    assert!(matches!(
        h.controller.open_track(&handle(&h, "b.wav")),
        Err(TransportError::ShutDown)
    ));
    assert!(matches!(
        h.controller.load_track(tone_source("c.wav", RATE, ChannelLayout::Mono, 1.0)),
        Err(TransportError::ShutDown)
    ));
    assert!(matches!(h.controller.play(), Err(TransportError::ShutDown)));
    assert!(matches!(h.controller.seek(0.5), Err(TransportError::ShutDown)));
    assert!(matches!(h.controller.toggle_repeat(), Err(TransportError::ShutDown)));
    let (sink, output) = CollectingSink::new(format());
    assert!(matches!(
        h.controller.export(Box::new(sink)),
        Err(TransportError::ShutDown)
    ));

    h.controller.tick();
    assert!(!h.device.is_open());
    assert!(!h.device.is_playing());
    assert_eq!(h.controller.state(), PlaybackState::Idle);
    assert_eq!(h.controller.current_track(), None);
    assert!(!h.controller.repeat_enabled());
    assert!(output.lock().samples.is_empty());
}
