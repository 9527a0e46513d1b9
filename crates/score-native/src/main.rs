//! Native demo: plays the adaptive score through cpal while a simulated
//! combat session drives tension and kill accents.
//!
//! Runs headless (and faster than real time) when no output device exists.

mod mixer;
mod output;

use std::thread;
use std::time::{Duration, Instant};

use rand::prelude::*;
use score_core::MusicEngine;

use crate::output::CpalBackend;

type Engine = MusicEngine<CpalBackend>;

const FRAME_SEC: f64 = 1.0 / 60.0;
const HEADLESS_SAMPLE_RATE: f32 = 48_000.0;
const LEVEL_SEC: f64 = 24.0;
const CARRIER_SEC: f64 = 10.0;
const VICTORY_SEC: f64 = 6.0;
const SNAPSHOT_EVERY_SEC: f64 = 2.0;
// Seconds per enemy wave in the simulated fight
const WAVE_PERIOD_SEC: f64 = 12.0;

const ENEMY_KINDS: &[&str] = &["basic", "basic", "swarm", "scout", "fast", "tank", "boss"];

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let backend = match CpalBackend::open() {
        Ok(b) => b,
        Err(e) => {
            log::warn!("no audio output ({}), running headless", e);
            CpalBackend::headless(HEADLESS_SAMPLE_RATE)
        }
    };
    let mut engine = MusicEngine::new(backend);
    let mut rng = StdRng::seed_from_u64(42);

    for level in 1..=2 {
        engine.start_background_music(level);
        play_for(&mut engine, LEVEL_SEC, |e, t| {
            e.update_tension(wave_tension(t, &mut rng));
            if rng.gen::<f32>() < 0.02 + 0.15 * e.tension() {
                let kind = ENEMY_KINDS[rng.gen_range(0..ENEMY_KINDS.len())];
                e.queue_kill_accent(kind, rng.gen_range(0.4..1.0));
            }
        });
    }

    engine.start_carrier_music();
    play_for(&mut engine, CARRIER_SEC, |_, _| {});

    engine.start_victory_music();
    play_for(&mut engine, VICTORY_SEC, |_, _| {});

    engine.stop_music();
    log::info!(
        "done: {} accents played, {}",
        engine.accents_played(),
        engine.snapshot()
    );
    Ok(())
}

/// Drive the engine at ~60 Hz for `secs`, calling `frame` with elapsed time.
fn play_for(engine: &mut Engine, secs: f64, mut frame: impl FnMut(&mut Engine, f64)) {
    let headless = engine.backend().map_or(true, |b| b.is_headless());
    let start = Instant::now();
    let mut elapsed = 0.0;
    let mut last_log = 0.0;
    while elapsed < secs {
        if headless {
            if let Some(b) = engine.backend() {
                b.render_headless(FRAME_SEC);
            }
            elapsed += FRAME_SEC;
        } else {
            thread::sleep(Duration::from_secs_f64(FRAME_SEC));
            elapsed = start.elapsed().as_secs_f64();
        }
        frame(engine, elapsed);
        engine.run_due();
        if elapsed - last_log >= SNAPSHOT_EVERY_SEC {
            log::info!("{}", engine.snapshot());
            last_log = elapsed;
        }
    }
}

/// Danger level for a fight made of enemy waves that build and clear.
fn wave_tension(t: f64, rng: &mut impl Rng) -> f32 {
    let phase = (t % WAVE_PERIOD_SEC) / WAVE_PERIOD_SEC;
    let swell = (std::f64::consts::PI * phase).sin() as f32;
    let wave = ((t / WAVE_PERIOD_SEC).floor() as f32 + 1.0) * 0.35;
    (swell * wave.min(1.0) + rng.gen_range(-0.05..0.05)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_tension_stays_in_range_and_swells() {
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..2000 {
            let t = wave_tension(i as f64 * 0.05, &mut rng);
            assert!((0.0..=1.0).contains(&t));
        }
        let quiet = wave_tension(WAVE_PERIOD_SEC * 2.0, &mut rng);
        let peak = wave_tension(WAVE_PERIOD_SEC * 2.5, &mut rng);
        assert!(peak > quiet + 0.5);
    }

    #[test]
    fn headless_session_runs_every_mode() {
        let mut engine = MusicEngine::new(CpalBackend::headless(8000.0));
        engine.start_background_music(1);
        play_for(&mut engine, 2.0, |e, _| e.update_tension(0.9));
        assert!(engine.active_layers().len() >= 2);
        engine.start_victory_music();
        play_for(&mut engine, 1.0, |_, _| {});
        assert!(engine.arrangement().is_some());
        engine.stop_music();
        assert_eq!(engine.active_tone_count(), 0);
    }
}
