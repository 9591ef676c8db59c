//! Output Capture - Per-Test Isolation of the Shared Output Sink
//!
//! **Core Responsibility:**
//! Route everything test code writes to the shared output sink into a private
//! buffer for the test currently executing, and restore normal routing
//! afterwards.
//!
//! **Model:**
//! - One shared sink per capture; test units write through [`CaptureSink`]
//! - An explicit stack of active keys: writes land in the buffer of the most
//!   recently begun key, or in the passthrough writer when nothing is active
//! - `end` pops the key and hands back its text, restoring the prior route
//! - engines that know which test wrote a chunk use `write_for` and bypass
//!   the stack
//!
//! **Constraint on engines:**
//! The sink is a single resource. Two units writing simultaneously inside
//! their own `begin`/`end` windows cannot be told apart; engines that run
//! units in parallel must hold [`OutputCapture::exclusive`] around each
//! capture-guarded region.

use crate::error::CaptureError;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

struct CaptureState {
    buffers: HashMap<String, Vec<u8>>,
    active: Vec<String>,
    passthrough: Box<dyn Write + Send>,
}

struct CaptureInner {
    state: Mutex<CaptureState>,
    gate: Mutex<()>,
}

/// Shared handle over the capture slot. Clones refer to the same slot.
#[derive(Clone)]
pub struct OutputCapture {
    inner: Arc<CaptureInner>,
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("OutputCapture")
            .field("active", &state.active)
            .finish_non_exhaustive()
    }
}

impl OutputCapture {
    /// Capture with process stdout as the passthrough route
    pub fn new() -> Self {
        Self::with_passthrough(Box::new(io::stdout()))
    }

    pub fn with_passthrough(passthrough: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(CaptureInner {
                state: Mutex::new(CaptureState {
                    buffers: HashMap::new(),
                    active: Vec::new(),
                    passthrough,
                }),
                gate: Mutex::new(()),
            }),
        }
    }

    // A panic inside a test unit must not wedge the capture for everyone else
    fn state(&self) -> MutexGuard<'_, CaptureState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writer that test code uses as its standard output
    pub fn sink(&self) -> CaptureSink {
        CaptureSink {
            capture: self.clone(),
        }
    }

    /// Start capturing for `key` with a fresh buffer. Restarting a key that
    /// is still active discards what it captured so far.
    pub fn begin(&self, key: &str) {
        let mut state = self.state();
        if state.buffers.insert(key.to_string(), Vec::new()).is_some() {
            warn!(key = %key, "Capture restarted before it ended; earlier output discarded");
        }
        state.active.retain(|k| k != key);
        state.active.push(key.to_string());
        trace!(key = %key, depth = state.active.len(), "Capture started");
    }

    /// Stop capturing for `key` and return everything written in its window
    pub fn end(&self, key: &str) -> Result<String, CaptureError> {
        let mut state = self.state();
        let buffer = state.buffers.remove(key).ok_or_else(|| CaptureError::NotStarted {
            key: key.to_string(),
        })?;
        state.active.retain(|k| k != key);
        trace!(key = %key, bytes = buffer.len(), "Capture ended");
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Append `buf` to the buffer of `key` regardless of which capture is on
    /// top of the stack. Falls back to the passthrough when `key` is not open.
    pub fn write_for(&self, key: &str, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.buffers.get_mut(key) {
            Some(buffer) => {
                buffer.extend_from_slice(buf);
                Ok(())
            }
            None => state.passthrough.write_all(buf),
        }
    }

    /// Key currently receiving writes, if any
    pub fn active_key(&self) -> Option<String> {
        self.state().active.last().cloned()
    }

    pub fn is_capturing(&self, key: &str) -> bool {
        self.state().buffers.contains_key(key)
    }

    /// Drop every open capture and route writes back to the passthrough.
    /// Returns how many captures were still open.
    pub fn release_all(&self) -> usize {
        let mut state = self.state();
        let open = state.buffers.len();
        state.buffers.clear();
        state.active.clear();
        if let Err(e) = state.passthrough.flush() {
            warn!(error = %e, "Failed to flush passthrough output");
        }
        open
    }

    /// Serialize a capture-guarded region. Hold the returned gate from
    /// `begin` until `end` when units execute on several threads.
    pub fn exclusive(&self) -> CaptureGate<'_> {
        CaptureGate {
            _guard: self.inner.gate.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Held while one unit owns the capture slot
pub struct CaptureGate<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// `io::Write` handle onto the shared sink
#[derive(Clone)]
pub struct CaptureSink {
    capture: OutputCapture,
}

impl CaptureSink {
    /// Write on behalf of a known test, for engines that tag their output
    pub fn write_for(&self, key: &str, buf: &[u8]) -> io::Result<()> {
        self.capture.write_for(key, buf)
    }
}

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.capture.state();
        let state = &mut *guard;
        if let Some(key) = state.active.last() {
            if let Some(buffer) = state.buffers.get_mut(key) {
                buffer.extend_from_slice(buf);
                return Ok(buf.len());
            }
        }
        state.passthrough.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.capture.state().passthrough.flush()
    }
}

/// In-memory writer shared between a capture and the test observing it
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn make_capture() -> (OutputCapture, SharedBuffer) {
        let passthrough = SharedBuffer::default();
        (OutputCapture::with_passthrough(Box::new(passthrough.clone())), passthrough)
    }

    #[test]
    fn test_capture_roundtrip() {
        let (capture, passthrough) = make_capture();
        let mut sink = capture.sink();

        capture.begin("k");
        write!(sink, "abc").unwrap();
        assert_eq!(capture.end("k").unwrap(), "abc");

        write!(sink, "after").unwrap();
        assert_eq!(passthrough.contents(), "after");
        assert!(!capture.is_capturing("k"));
    }

    #[test]
    fn test_writes_outside_window_pass_through() {
        let (capture, passthrough) = make_capture();
        let mut sink = capture.sink();

        write!(sink, "before ").unwrap();
        capture.begin("k");
        write!(sink, "inside").unwrap();
        let text = capture.end("k").unwrap();

        assert_eq!(text, "inside");
        assert_eq!(passthrough.contents(), "before ");
    }

    #[test]
    fn test_end_without_begin_fails() {
        let (capture, _) = make_capture();
        let err = capture.end("never").unwrap_err();
        assert_eq!(err, CaptureError::NotStarted { key: "never".to_string() });
    }

    #[test]
    fn test_end_twice_fails() {
        let (capture, _) = make_capture();
        capture.begin("k");
        capture.end("k").unwrap();
        assert!(capture.end("k").is_err());
    }

    #[test]
    fn test_nested_capture_restores_prior_sink() {
        let (capture, _) = make_capture();
        let mut sink = capture.sink();

        capture.begin("outer");
        write!(sink, "1").unwrap();
        capture.begin("inner");
        assert_eq!(capture.active_key().as_deref(), Some("inner"));
        write!(sink, "2").unwrap();
        assert_eq!(capture.end("inner").unwrap(), "2");

        assert_eq!(capture.active_key().as_deref(), Some("outer"));
        write!(sink, "3").unwrap();
        assert_eq!(capture.end("outer").unwrap(), "13");
        assert_eq!(capture.active_key(), None);
    }

    #[test]
    fn test_restart_discards_previous_buffer() {
        let (capture, _) = make_capture();
        let mut sink = capture.sink();

        capture.begin("k");
        write!(sink, "stale").unwrap();
        capture.begin("k");
        write!(sink, "fresh").unwrap();
        assert_eq!(capture.end("k").unwrap(), "fresh");
    }

    #[test]
    fn test_write_for_targets_named_capture() {
        let (capture, passthrough) = make_capture();

        capture.begin("a");
        capture.begin("b");
        capture.write_for("a", b"from-a").unwrap();
        capture.write_for("b", b"from-b").unwrap();
        capture.write_for("closed", b"loose").unwrap();

        assert_eq!(capture.end("a").unwrap(), "from-a");
        assert_eq!(capture.end("b").unwrap(), "from-b");
        assert_eq!(passthrough.contents(), "loose");
    }

    #[test]
    fn test_release_all_restores_passthrough() {
        let (capture, passthrough) = make_capture();
        let mut sink = capture.sink();

        capture.begin("a");
        capture.begin("b");
        assert_eq!(capture.release_all(), 2);

        write!(sink, "visible").unwrap();
        assert_eq!(passthrough.contents(), "visible");
        assert!(capture.end("a").is_err());
    }

    #[test]
    fn test_exclusive_serializes_parallel_units() {
        let (capture, passthrough) = make_capture();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let capture = capture.clone();
                thread::spawn(move || {
                    let key = format!("unit-{}", i);
                    let _gate = capture.exclusive();
                    capture.begin(&key);
                    let mut sink = capture.sink();
                    for _ in 0..50 {
                        write!(sink, "{}", i).unwrap();
                    }
                    (i, capture.end(&key).unwrap())
                })
            })
            .collect();

        for handle in handles {
            let (i, text) = handle.join().unwrap();
            assert_eq!(text, i.to_string().repeat(50));
        }
        assert!(passthrough.contents().is_empty());
    }
}
