//! PCM stream splitter.
//!
//! Sits between the audio source (rtl_fm stdout or a channelizer stream)
//! and the RDS decoder's stdin. Every chunk goes to the decoder: that
//! path is correctness-critical and blocks until written. The recorder is
//! fed best-effort only when a recording is active; it never holds up the
//! decoder.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::recorder::Recorder;

/// Read size for the byte-stream variant: ~24 ms at 171 kHz mono 16-bit.
const CHUNK_SIZE: usize = 8192;

/// Tee a byte stream (single-station path: rtl_fm stdout).
///
/// Runs until the source reaches EOF or the decoder sink closes. On exit
/// the decoder sink is dropped (EOF cascades) and any active recording is
/// stopped.
pub async fn run_reader<R, W>(mut src: R, mut decoder: W, recorder: Arc<Recorder>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("audio tee: source read failed: {e}");
                break;
            }
        };
        if !deliver(&mut decoder, &buf[..n], &recorder).await {
            break;
        }
    }
    finish(decoder, &recorder).await;
}

/// Tee a channel of PCM chunks (multi-station path: channelizer output).
pub async fn run_channel<W>(
    mut src: mpsc::Receiver<Vec<u8>>,
    mut decoder: W,
    recorder: Arc<Recorder>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = src.recv().await {
        if !deliver(&mut decoder, &chunk, &recorder).await {
            break;
        }
    }
    finish(decoder, &recorder).await;
}

/// Forward one chunk: decoder first (mandatory), recorder second
/// (best-effort). Returns false when the decoder sink is gone.
async fn deliver<W>(decoder: &mut W, chunk: &[u8], recorder: &Recorder) -> bool
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = decoder.write_all(chunk).await {
        warn!("audio tee: decoder stdin broken, stopping: {e}");
        return false;
    }
    if recorder.is_recording() {
        recorder.feed(chunk);
    }
    true
}

async fn finish<W>(mut decoder: W, recorder: &Recorder)
where
    W: AsyncWrite + Unpin,
{
    let _ = decoder.shutdown().await;
    if recorder.is_recording() {
        recorder.stop();
    }
    info!("audio tee: stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStore;
    use crate::transcribe::TranscriberHandle;

    fn recorder() -> (tempfile::TempDir, Arc<Recorder>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            EventStore::open(&dir.path().join("events.db"), &dir.path().join("audio")).unwrap(),
        );
        let transcriber = TranscriberHandle::new(16, store.clone());
        let (rec, _cap) = Recorder::new(dir.path().join("audio"), 2, 600, store, transcriber);
        (dir, rec)
    }

    #[tokio::test]
    async fn every_chunk_reaches_the_decoder_in_order() {
        let (_dir, rec) = recorder();
        let input: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let mut sink = std::io::Cursor::new(Vec::new());
        run_reader(std::io::Cursor::new(input.clone()), &mut sink, rec).await;
        assert_eq!(sink.into_inner(), input);
    }

    #[tokio::test]
    async fn channel_chunks_preserve_order() {
        let (_dir, rec) = recorder();
        let (tx, rx) = mpsc::channel(8);
        let mut sink = std::io::Cursor::new(Vec::new());
        let feeder = async {
            for i in 0..4u8 {
                tx.send(vec![i; 100]).await.unwrap();
            }
            drop(tx);
        };
        let ((), ()) = tokio::join!(feeder, run_channel(rx, &mut sink, rec));
        let expected: Vec<u8> = (0..4u8).flat_map(|i| vec![i; 100]).collect();
        assert_eq!(sink.into_inner(), expected);
    }

    #[tokio::test]
    async fn eof_stops_an_active_recording() {
        let (_dir, rec) = recorder();
        rec.start(1).unwrap();
        let mut sink = std::io::Cursor::new(Vec::new());
        run_reader(std::io::Cursor::new(vec![0u8; 1024]), &mut sink, rec.clone()).await;
        assert!(!rec.is_recording());
    }
}
