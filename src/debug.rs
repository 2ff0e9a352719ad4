use core::fmt::Write;

use crate::vcell::VCell;

/// Destination for debug text, usually a UART transmit routine.
pub type Sink = fn(&[u8]);

static SINK: VCell<Option<Sink>> = VCell::new(None);

pub struct DebugMarker;

/// Install the sink.  The dbg* macros are silent until this is called.
pub fn init(sink: Sink) {
    SINK.write(Some(sink));
}

fn debug_bytes(s: &[u8]) -> core::fmt::Result {
    if let Some(sink) = SINK.read() {
        sink(s);
    }
    Ok(())
}

impl Write for DebugMarker {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        debug_bytes(s.as_bytes())
    }
    fn write_char(&mut self, c: char) -> core::fmt::Result {
        let mut buf = [0; 4];
        debug_bytes(c.encode_utf8(&mut buf).as_bytes())
    }
}

#[macro_export]
macro_rules! dbgln {
    () => ({let _ = core::fmt::Write::write_str(
        &mut $crate::debug::DebugMarker, "\n");});
    ($($tt:tt)*) => ({
        let _ = core::fmt::Write::write_fmt(
            &mut $crate::debug::DebugMarker, format_args!($($tt)*));
        let _ = core::fmt::Write::write_str(
            &mut $crate::debug::DebugMarker, "\n");
    });
}

#[cfg(test)]
static CAPTURED: std::sync::Mutex<Vec<u8>> = std::sync::Mutex::new(Vec::new());

#[cfg(test)]
fn capture(s: &[u8]) {
    CAPTURED.lock().unwrap().extend_from_slice(s);
}

#[test]
fn sink_receives_lines() {
    init(capture);
    dbgln!("pulses {}", 12);
    dbgln!();
    dbgln!("x");
    let text = String::from_utf8(CAPTURED.lock().unwrap().clone()).unwrap();
    // Other tests may log concurrently.
    assert!(text.contains("pulses 12"));
    assert!(text.contains("x\n"));
}
