// Host-side scenario tests for the adaptive score, driven frame by frame
// against the offline backend's manual clock.

use score_core::*;

const FRAME: f64 = 1.0 / 60.0;

fn make_engine() -> MusicEngine<OfflineBackend> {
    MusicEngine::new(OfflineBackend::new())
}

// Engine whose smoothed tension jumps straight to the target, so threshold
// timing can be checked without waiting on the exponential approach.
fn make_direct_engine() -> MusicEngine<OfflineBackend> {
    let mut params = ScoreParams::default();
    params.tension.smoothing = 1.0;
    MusicEngine::with_params(Some(OfflineBackend::new()), params)
}

fn advance(engine: &mut MusicEngine<OfflineBackend>, secs: f64) {
    engine
        .backend_mut()
        .expect("offline backend present")
        .advance(secs);
}

/// Simulate gameplay frames holding `tension` for `secs`.
fn hold(engine: &mut MusicEngine<OfflineBackend>, tension: f32, secs: f64) {
    let frames = (secs / FRAME).round() as usize;
    for _ in 0..frames {
        advance(engine, FRAME);
        engine.update_tension(tension);
        engine.run_due();
    }
}

/// Let timers run without gameplay updates.
fn pump(engine: &mut MusicEngine<OfflineBackend>, secs: f64) {
    let frames = (secs / FRAME).round() as usize;
    for _ in 0..frames {
        advance(engine, FRAME);
        engine.run_due();
    }
}

fn present(engine: &MusicEngine<OfflineBackend>) -> Vec<LayerKind> {
    engine.active_layers().into_iter().collect()
}

#[test]
fn background_session_follows_tension() {
    let mut engine = make_engine();
    engine.start_background_music(1);
    assert_eq!(engine.mode(), SessionMode::Background);
    assert_eq!(engine.tension(), 0.0);
    assert_eq!(engine.tempo_bpm(), 60.0, "level start must sit at 60 BPM");
    assert_eq!(present(&engine), vec![LayerKind::Base]);

    hold(&mut engine, 0.5, 3.0);
    assert_eq!(
        present(&engine),
        vec![LayerKind::Base, LayerKind::Battle],
        "tension 0.5 should add battle only"
    );

    hold(&mut engine, 0.9, 3.0);
    assert_eq!(
        present(&engine),
        vec![
            LayerKind::Base,
            LayerKind::Battle,
            LayerKind::Intense,
            LayerKind::Extreme
        ]
    );
    assert!(engine.tempo_bpm() > 110.0);

    hold(&mut engine, 0.1, 3.0);
    assert_eq!(present(&engine), vec![LayerKind::Base]);
    assert_eq!(engine.layer_state(LayerKind::Base), Some(FadeState::Steady));
}

#[test]
fn threshold_decisions_land_within_debounce_window() {
    let mut engine = make_direct_engine();
    engine.start_background_music(1);

    hold(&mut engine, 0.31, 0.21);
    assert!(
        engine.layer(LayerKind::Battle).is_some(),
        "battle missing after 210ms above threshold"
    );

    hold(&mut engine, 0.30, 0.21);
    let state = engine.layer_state(LayerKind::Battle);
    assert!(
        matches!(state, None | Some(FadeState::FadingOut)),
        "battle still wanted after 210ms at threshold: {state:?}"
    );

    // Fade-out finishes and the instance goes away entirely.
    hold(&mut engine, 0.30, 0.6);
    assert_eq!(engine.layer_state(LayerKind::Battle), None);
}

#[test]
fn oscillating_tension_never_overlaps_instances() {
    let mut engine = make_direct_engine();
    engine.start_background_music(1);
    let mut last_id = None;
    let mut instances = 0;
    for cycle in 0..16 {
        let level = if cycle % 2 == 0 { 0.36 } else { 0.24 };
        for _ in 0..9 {
            hold(&mut engine, level, FRAME);
            let id = engine.layer(LayerKind::Battle).map(|l| l.id());
            if let (Some(prev), Some(cur)) = (last_id, id) {
                assert_eq!(prev, cur, "new battle instance began before the old one was absent");
            }
            if id.is_some() && last_id.is_none() {
                instances += 1;
            }
            last_id = id;
            // base (2 tones) + at most one battle instance (2 tones)
            let live = engine.backend().unwrap().live_tone_count();
            assert!(live <= 4, "{live} tones live, expected at most 4");
        }
    }
    assert!(instances >= 2, "battle should have come and gone, saw {instances}");
}

#[test]
fn accents_render_on_beats_in_queue_order() {
    let mut engine = make_engine();
    engine.start_background_music(1);
    engine.queue_kill_accent("tank", 1.0);
    engine.queue_kill_accent("basic", 1.0);

    pump(&mut engine, 0.9);
    assert_eq!(engine.accents_played(), 0, "accent played before the first beat");

    pump(&mut engine, 0.2);
    assert_eq!(engine.accents_played(), 1);
    let first = engine.last_accent().cloned().unwrap();
    assert_eq!(first.class, AccentClass::Heavy);
    assert!((first.frequency_hz - 100.0).abs() < 1.0);

    pump(&mut engine, 1.0);
    assert_eq!(engine.accents_played(), 2);
    let second = engine.last_accent().cloned().unwrap();
    assert_eq!(second.class, AccentClass::Standard);
    assert!((second.frequency_hz - 250.0).abs() < 1.0);
}

#[test]
fn accent_burst_is_trimmed_and_rate_limited() {
    let mut engine = make_engine();
    engine.start_background_music(1);
    for i in 0..20 {
        engine.queue_kill_accent("swarm", 0.8);
        assert!(engine.pending_accents() <= 10);
        if i == 10 {
            assert_eq!(engine.pending_accents(), 5, "overflow should trim to 5");
        }
    }
    let queued = engine.pending_accents();
    assert!(queued <= 10);

    for beat in 1..=3u64 {
        pump(&mut engine, 1.0 + 2.0 * FRAME);
        assert_eq!(engine.accents_played(), beat, "exactly one accent per beat");
        assert_eq!(engine.pending_accents(), queued - beat as usize);
    }
}

#[test]
fn stop_leaves_idle_and_silent() {
    let mut engine = make_engine();
    engine.start_background_music(3);
    hold(&mut engine, 0.95, 2.0);
    engine.queue_kill_accent("boss", 1.0);
    pump(&mut engine, 1.1);
    assert!(engine.active_tone_count() > 0);

    engine.stop_music();
    assert_eq!(engine.mode(), SessionMode::Idle);
    assert_eq!(engine.active_tone_count(), 0);
    assert_eq!(engine.backend().unwrap().live_tone_count(), 0);
    assert_eq!(engine.pending_timers(), 0);
    assert_eq!(engine.tension(), 0.0);
    assert_eq!(engine.beat_index(), None);

    engine.stop_music();
    engine.update_tension(0.7);
    engine.queue_kill_accent("tank", 1.0);
    engine.run_due();
    pump(&mut engine, 1.0);
    engine.stop_music();
    assert_eq!(engine.mode(), SessionMode::Idle);
    assert_eq!(engine.backend().unwrap().live_tone_count(), 0);
}

#[test]
fn modes_replace_each_other_without_overlap() {
    let mut engine = make_engine();
    engine.start_background_music(1);
    hold(&mut engine, 0.9, 2.0);

    engine.start_carrier_music();
    assert_eq!(engine.mode(), SessionMode::Carrier);
    assert!(engine.active_layers().is_empty());
    assert_eq!(engine.backend().unwrap().live_tone_count(), 3);
    assert_eq!(engine.tempo_bpm(), constants::CARRIER_BPM);

    // Carrier ignores tension entirely.
    hold(&mut engine, 1.0, 1.0);
    assert!(engine.active_layers().is_empty());
    assert_eq!(engine.tension(), 0.0);

    engine.start_victory_music();
    assert_eq!(engine.mode(), SessionMode::Victory);
    assert_eq!(engine.backend().unwrap().live_tone_count(), 3);
    assert_eq!(engine.tempo_bpm(), constants::VICTORY_BPM);

    let before = engine.arrangement().unwrap().sequence_index();
    pump(&mut engine, ArrangementKind::Victory.beat_duration() + FRAME);
    assert_ne!(engine.arrangement().unwrap().sequence_index(), before);
}
