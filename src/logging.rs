use log::{LevelFilter, Metadata, Record};
use spin::Once;

/// Where kernel text output ends up (VGA, serial port, a test buffer).
pub trait Console: Sync {
    fn write_str(&self, s: &str);
}

static CONSOLE: Once<&'static dyn Console> = Once::new();
static LOGGER: Logger = Logger;

pub(crate) struct Logger;
impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::kprintln!(
                "[{}:{}] {}",
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Registers the output sink and installs the logger. Only the first call
/// has any effect; it returns whether this call was the one.
pub fn init(console: &'static dyn Console, level: LevelFilter) -> bool {
    let mut first = false;
    CONSOLE.call_once(|| {
        first = true;
        console
    });
    if first && log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
    first
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::logging::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

struct ConsoleWriter(&'static dyn Console);

impl core::fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut buf = [0u8; 64];
        let mut len = 0;
        for byte in s.bytes() {
            buf[len] = match byte {
                // printable ASCII byte or newline
                0x20..=0x7e | b'\n' => byte,
                // not part of printable ASCII range
                _ => b'?',
            };
            len += 1;
            if len == buf.len() {
                self.emit(&buf[..len]);
                len = 0;
            }
        }
        self.emit(&buf[..len]);
        Ok(())
    }
}

impl ConsoleWriter {
    fn emit(&self, bytes: &[u8]) {
        if let Ok(s) = core::str::from_utf8(bytes) {
            if !s.is_empty() {
                self.0.write_str(s);
            }
        }
    }
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    if let Some(console) = CONSOLE.get() {
        let _ = ConsoleWriter(*console).write_fmt(args);
    }
}

#[cfg(test)]
mod test {
    use alloc::string::String;

    use super::*;
    use crate::locks::SpinLock;

    struct Capture(SpinLock<String>);

    impl Console for Capture {
        fn write_str(&self, s: &str) {
            self.0.lock().push_str(s);
        }
    }

    static CAPTURE: Capture = Capture(SpinLock::new(String::new()));

    #[test]
    fn output_reaches_the_console_once_registered() {
        // the sink is global, so this is the only test that registers one
        assert!(init(&CAPTURE, LevelFilter::Warn));
        assert!(!init(&CAPTURE, LevelFilter::Trace));

        crate::kprintln!("pid {} caf\u{e9}\t", 3);
        log::warn!("queue full");
        let out = CAPTURE.0.lock().clone();
        assert!(out.contains("pid 3 caf???\n"), "{:?}", out);
        assert!(out.contains("src/logging.rs:"), "{:?}", out);
        assert!(out.contains("] queue full\n"), "{:?}", out);
    }
}
