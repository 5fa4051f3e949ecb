// Recorder boundary behavior and the WAV round-trip law.
//
// The finalize path runs through the real resampler and WAV writer; the
// OGG encode step needs ffmpeg and is allowed to fail here: the WAV is
// written before the encoder runs.

use std::sync::Arc;
use std::time::Duration;

use rds_guard::audio::Recorder;
use rds_guard::dsp::resample_to_16k;
use rds_guard::store::{now_ts, EventStore};
use rds_guard::transcribe::TranscriberHandle;
use serde_json::json;

const INPUT_RATE: usize = 171_000;

fn setup(min_sec: u64) -> (tempfile::TempDir, Arc<EventStore>, Arc<Recorder>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        EventStore::open(&dir.path().join("events.db"), &dir.path().join("audio")).unwrap(),
    );
    let transcriber = TranscriberHandle::new(16, store.clone());
    let (recorder, _cap_rx) = Recorder::new(
        dir.path().join("audio"),
        min_sec,
        600,
        store.clone(),
        transcriber,
    );
    (dir, store, recorder)
}

/// One second of a 1 kHz tone as s16le bytes at the capture rate.
fn tone_bytes(seconds: f64) -> Vec<u8> {
    let samples = (seconds * INPUT_RATE as f64) as usize;
    (0..samples)
        .flat_map(|n| {
            let ph = 2.0 * std::f64::consts::PI * 1000.0 * n as f64 / INPUT_RATE as f64;
            (((ph.sin()) * 10_000.0) as i16).to_le_bytes()
        })
        .collect()
}

#[tokio::test]
async fn below_minimum_duration_is_discarded() {
    let (_dir, _store, recorder) = setup(1);
    recorder.start(1).unwrap();
    recorder.feed(&tone_bytes(0.3));
    // Wall-clock elapsed is well under the 1 s minimum.
    assert!(!recorder.stop());
}

#[tokio::test]
async fn at_minimum_duration_is_saved() {
    let (dir, store, recorder) = setup(1);
    let id = store
        .insert_event(
            "traffic",
            "warning",
            "0x9E04",
            None,
            None,
            &json!({}),
            &now_ts(),
        )
        .unwrap();

    recorder.start(id).unwrap();
    recorder.feed(&tone_bytes(1.2));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    recorder.feed(&tone_bytes(0.1));
    assert!(recorder.stop());

    // The finalize task writes the WAV asynchronously.
    let wav_path = dir.path().join("audio").join(format!("{id}.wav"));
    for _ in 0..50 {
        if wav_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(wav_path.exists(), "wav file was not written");

    // Round-trip law: the 16 kHz WAV read back holds the resampled
    // sample count within one sample.
    let reader = hound::WavReader::open(&wav_path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 16_000);
    assert_eq!(spec.channels, 1);
    let wav_samples = reader.into_samples::<i16>().count();
    let input_samples = (tone_bytes(1.2).len() + tone_bytes(0.1).len()) / 2;
    let expected = resample_to_16k(&vec![0i16; input_samples]).len();
    assert!(
        (wav_samples as i64 - expected as i64).abs() <= 1,
        "wav has {wav_samples} samples, expected ~{expected}"
    );
}

#[tokio::test]
async fn resampler_ratio_matches_output_rate() {
    // One second in, 16 000 samples out.
    let one_second = vec![0i16; INPUT_RATE];
    assert_eq!(resample_to_16k(&one_second).len(), 16_000);
}
