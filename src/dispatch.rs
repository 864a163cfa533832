use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use tokio_util::sync::CancellationToken;

use crate::common::MacAddress;
use crate::error::{Error, Result};
use crate::wake::WakeSequencer;

/// Where the capture loop hands a matched magic packet.
pub trait WakeTrigger {
    /// Returns false if the trigger was dropped because a wake sequence is
    /// already running.
    fn trigger(&mut self, source: Option<MacAddress>) -> Result<bool>;
}

/// Inline mode: the sequence runs on the capture thread.
impl<S: InputPin, O: OutputPin, D: DelayNs> WakeTrigger for WakeSequencer<S, O, D> {
    fn trigger(&mut self, source: Option<MacAddress>) -> Result<bool> {
        let attempt = self.wake(source)?;
        log::debug!("wake for {} from {:?} ended: {:?}", attempt.target, attempt.source, attempt.outcome);
        Ok(true)
    }
}

/// Runs wake sequences on a dedicated thread so frame reception continues.
///
/// At most one sequence is active: the busy flag is claimed before a trigger
/// is handed over and released once the sequence reaches its outcome.
/// Anything arriving in between is dropped, not queued.
pub struct WakeWorker {
    tx: SyncSender<Option<MacAddress>>,
    busy: Arc<AtomicBool>,
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl WakeWorker {
    pub fn spawn<S, O, D>(mut sequencer: WakeSequencer<S, O, D>, token: CancellationToken) -> Self
    where
        S: InputPin + Send + 'static,
        O: OutputPin + Send + 'static,
        D: DelayNs + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Option<MacAddress>>(1);
        let busy = Arc::new(AtomicBool::new(false));

        let worker_busy = busy.clone();
        let worker_token = token.clone();
        let handle = thread::spawn(move || {
            log::debug!("[waker] handling wake requests for {}", sequencer.target());
            loop {
                if worker_token.is_cancelled() { log::trace!("[waker] exit"); break; }

                let source = match rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(source) => source,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                };

                let result = sequencer.wake(source);
                worker_busy.store(false, Ordering::Release);
                match result {
                    Ok(attempt) => log::debug!("[waker] wake for {} from {:?} ended: {:?}",
                        attempt.target, attempt.source, attempt.outcome),
                    Err(e) => {
                        log::error!("[waker] {e}");
                        worker_token.cancel();
                        return Err(e);
                    }
                }
            }
            Ok(())
        });

        Self { tx, busy, token, handle }
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker thread; returns the error that stopped it, if any.
    pub fn join(self) -> Result<()> {
        drop(self.tx);
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl WakeTrigger for WakeWorker {
    fn trigger(&mut self, source: Option<MacAddress>) -> Result<bool> {
        if self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            log::warn!("WOL received from {}; wake already in progress, IGNORING!",
                source.map_or_else(|| "unknown".to_string(), |mac| mac.to_string()));
            return Ok(false);
        }

        match self.tx.try_send(source) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::Release);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                // shutting down, the worker left before this packet was read
                if self.token.is_cancelled() {
                    log::debug!("WOL received during shutdown, IGNORING!");
                    return Ok(false);
                }
                Err(Error::WorkerStopped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{Receiver, Sender};
    use std::time::Instant;

    use super::*;
    use crate::gpio::testing::{RecordingDelay, RecordingLine, ScriptedLine};
    use crate::gpio::PowerSense;
    use crate::wake::WakeOutcome;

    const TARGET: MacAddress = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    /// Each delay blocks until the test releases it.
    struct GatedDelay(Receiver<()>);

    impl DelayNs for GatedDelay {
        fn delay_ns(&mut self, _ns: u32) {
            let _ = self.0.recv();
        }

        fn delay_ms(&mut self, _ms: u32) {
            let _ = self.0.recv();
        }
    }

    fn gated(levels: &[bool]) -> (ScriptedLine, RecordingLine, Sender<()>, WakeSequencer<ScriptedLine, RecordingLine, GatedDelay>) {
        let sense = ScriptedLine::new(levels);
        let strobe = RecordingLine::default();
        let (gate_tx, gate_rx) = mpsc::channel();
        let seq = WakeSequencer::new(
            TARGET,
            PowerSense::new(sense.clone(), false),
            strobe.clone(),
            GatedDelay(gate_rx),
        );
        (sense, strobe, gate_tx, seq)
    }

    fn wait_idle(worker: &WakeWorker) {
        let start = Instant::now();
        while worker.is_busy() {
            assert!(start.elapsed() < Duration::from_secs(5), "worker stuck");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn inline_trigger_runs_sequence() {
        let sense = ScriptedLine::new(&[true, false]);
        let strobe = RecordingLine::default();
        let mut seq = WakeSequencer::new(TARGET, PowerSense::new(sense, false), strobe.clone(), RecordingDelay::default());
        assert!(seq.trigger(None).unwrap());
        assert_eq!(strobe.pulses(), 1);
    }

    #[test]
    fn overlapping_trigger_is_coalesced() {
        let (sense, strobe, gate, seq) = gated(&[true, false]);
        let token = CancellationToken::new();
        let mut worker = WakeWorker::spawn(seq, token.clone());

        assert!(worker.trigger(Some(MacAddress::new([2, 0, 0, 0, 0, 1]))).unwrap());
        // the first sequence is parked in its strobe delay
        assert!(worker.is_busy());
        assert!(!worker.trigger(Some(MacAddress::new([2, 0, 0, 0, 0, 2]))).unwrap());
        assert!(!worker.trigger(None).unwrap());

        // strobe pulse, settling delay
        gate.send(()).unwrap();
        gate.send(()).unwrap();
        wait_idle(&worker);

        assert_eq!(strobe.pulses(), 1);
        // trigger check plus the first verification poll
        assert_eq!(sense.reads(), 2);

        token.cancel();
        worker.join().unwrap();
    }

    #[test]
    fn accepts_new_trigger_after_outcome() {
        let (sense, strobe, gate, seq) = gated(&[true, false, false]);
        let token = CancellationToken::new();
        let mut worker = WakeWorker::spawn(seq, token.clone());

        assert!(worker.trigger(None).unwrap());
        gate.send(()).unwrap();
        gate.send(()).unwrap();
        wait_idle(&worker);

        // machine is on now, so the next trigger is accepted and ignored
        assert!(worker.trigger(None).unwrap());
        wait_idle(&worker);
        assert_eq!(strobe.pulses(), 1);
        assert_eq!(sense.reads(), 3);

        token.cancel();
        worker.join().unwrap();
    }

    #[test]
    fn hardware_failure_stops_worker_and_cancels() {
        struct BrokenLine;
        impl embedded_hal::digital::ErrorType for BrokenLine {
            type Error = embedded_hal::digital::ErrorKind;
        }
        impl InputPin for BrokenLine {
            fn is_high(&mut self) -> std::result::Result<bool, Self::Error> {
                Err(embedded_hal::digital::ErrorKind::Other)
            }
            fn is_low(&mut self) -> std::result::Result<bool, Self::Error> {
                Err(embedded_hal::digital::ErrorKind::Other)
            }
        }

        let seq = WakeSequencer::new(TARGET, PowerSense::new(BrokenLine, false), RecordingLine::default(), RecordingDelay::default());
        let token = CancellationToken::new();
        let mut worker = WakeWorker::spawn(seq, token.clone());
        assert!(worker.trigger(None).unwrap());

        let start = Instant::now();
        while !token.is_cancelled() {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(worker.join(), Err(Error::Hardware { line: "power sense", .. })));
    }

    fn wait_finished(worker: &WakeWorker) {
        let start = Instant::now();
        while !worker.is_finished() {
            assert!(start.elapsed() < Duration::from_secs(5), "worker still running");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn trigger_during_shutdown_is_dropped() {
        let (sense, strobe, _gate, seq) = gated(&[true]);
        let token = CancellationToken::new();
        let mut worker = WakeWorker::spawn(seq, token.clone());

        token.cancel();
        wait_finished(&worker);

        // a packet read just before the capture loop saw the cancellation
        assert!(!worker.trigger(Some(MacAddress::new([2, 0, 0, 0, 0, 1]))).unwrap());
        assert!(!worker.is_busy());
        assert_eq!(strobe.pulses(), 0);
        assert_eq!(sense.reads(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn trigger_to_vanished_worker_is_an_error() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        let mut worker = WakeWorker {
            tx,
            busy: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
            handle: thread::spawn(|| Ok(())),
        };

        assert!(matches!(worker.trigger(None), Err(Error::WorkerStopped)));
        assert!(!worker.is_busy());
        worker.join().unwrap();
    }

    #[test]
    fn sequencer_outcome_unaffected_by_dispatch() {
        let sense = ScriptedLine::new(&[false]);
        let mut seq = WakeSequencer::new(TARGET, PowerSense::new(sense, false), RecordingLine::default(), RecordingDelay::default());
        assert_eq!(seq.wake(None).unwrap().outcome, WakeOutcome::Ignored);
        assert!(seq.trigger(None).unwrap());
    }
}
