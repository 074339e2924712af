use std::io;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().map_err(|_| io::Error::other("capture poisoned"))?.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/// Runs `f` under a subscriber scoped to this thread and returns what it logged
pub(crate) fn logged<R>(f: impl FnOnce() -> R) -> (R, String) {
    let capture = Capture::default();
    let subscriber = {
        let capture = capture.clone();
        tracing_subscriber::fmt().with_ansi(false).with_writer(move || capture.clone()).finish()
    };
    let result = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8_lossy(&capture.0.lock().unwrap()).into_owned();
    (result, output)
}
