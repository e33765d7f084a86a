use crate::runner::Shutdown;
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Serialized stdout emitter for confirmed subdomains. One FQDN per line,
/// each emitted exactly once, flushed immediately so a downstream pipe sees
/// results as they are confirmed. stdout carries nothing else, ever.
///
/// A failed write means the consumer went away: the sink goes quiet and
/// triggers shutdown instead of spewing errors, and the orchestrator picks
/// the exit code from `broken`/`wrote_any`.
pub struct OutputSink {
    out: Mutex<Box<dyn Write + Send>>,
    seen: Mutex<HashSet<String>>,
    wrote_any: AtomicBool,
    broken: AtomicBool,
    shutdown: Arc<Shutdown>,
}

impl OutputSink {
    pub fn stdout(shutdown: Arc<Shutdown>) -> Self {
        Self::with_writer(Box::new(io::stdout()), shutdown)
    }

    pub fn with_writer(out: Box<dyn Write + Send>, shutdown: Arc<Shutdown>) -> Self {
        Self {
            out: Mutex::new(out),
            seen: Mutex::new(HashSet::new()),
            wrote_any: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Emit one confirmed FQDN. Returns whether the line was newly written;
    /// duplicates and writes after breakage return false.
    pub fn emit(&self, fqdn: &str) -> bool {
        if self.broken.load(Ordering::Relaxed) {
            return false;
        }
        {
            let mut seen = self.seen.lock().unwrap();
            if !seen.insert(fqdn.to_string()) {
                return false;
            }
        }
        let mut out = self.out.lock().unwrap();
        let result = writeln!(out, "{fqdn}").and_then(|()| out.flush());
        match result {
            Ok(()) => {
                self.wrote_any.store(true, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.broken.store(true, Ordering::Relaxed);
                self.shutdown.trigger();
                false
            }
        }
    }

    pub fn flush(&self) {
        let _ = self.out.lock().unwrap().flush();
    }

    pub fn broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    pub fn wrote_any(&self) -> bool {
        self.wrote_any.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::OutputSink;
    use crate::runner::Shutdown;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn emits_each_fqdn_exactly_once_with_newline() {
        let buf = SharedBuf::default();
        let sink = OutputSink::with_writer(Box::new(buf.clone()), Shutdown::new());
        assert!(sink.emit("www.example.com"));
        assert!(!sink.emit("www.example.com"));
        assert!(sink.emit("mail.example.com"));
        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "www.example.com\nmail.example.com\n");
    }

    #[test]
    fn stdout_stays_clean_of_decoration() {
        let buf = SharedBuf::default();
        let sink = OutputSink::with_writer(Box::new(buf.clone()), Shutdown::new());
        sink.emit("api.example.com");
        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        for line in written.lines() {
            assert!(line.ends_with(".example.com"));
            assert!(line.is_ascii());
            assert!(!line.contains('['));
        }
    }

    #[test]
    fn broken_writer_trips_shutdown_and_goes_quiet() {
        let shutdown = Shutdown::new();
        let sink = OutputSink::with_writer(Box::new(BrokenPipe), shutdown.clone());
        assert!(!sink.emit("www.example.com"));
        assert!(sink.broken());
        assert!(!sink.wrote_any());
        assert!(shutdown.is_triggered());
        // Subsequent emits are swallowed without touching the writer.
        assert!(!sink.emit("mail.example.com"));
    }
}
