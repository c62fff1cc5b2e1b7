// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use crate::{
    debug::DEBUG,
    platform::{LogSinkImpl, exception_free},
};
use core::fmt::{Arguments, Write};
#[cfg(not(test))]
use core::{option_env, panic::PanicInfo};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Once, mutex::SpinMutex};

static LOGGER: Once<Logger> = Once::new();

struct Logger {
    sink: LogSinkImpl,
}

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        writeln!(
            self.sink,
            "{} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        self.sink.flush();
    }
}

/// Initialises logger.
pub fn init(sink: LogSinkImpl) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { sink });
    log::set_logger(logger)?;
    log::set_max_level(build_time_log_level());
    Ok(())
}

/// Gets a reference to the log sink, if it has been set.
pub fn get_log_sink() -> Option<&'static LogSinkImpl> {
    LOGGER.get().map(|logger| &logger.sink)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(sink) = get_log_sink() {
        writeln!(sink, "PANIC: {}", info);
        sink.flush();
    }
    crate::aarch32::mask_interrupts();
    loop {
        crate::aarch32::wfi();
    }
}

/// Returns the logging [`LevelFilter`] set by the build-time environment variable `LOG_LEVEL`.
/// `LOG_LEVEL` can have the lower-case string values "off", "error", "warn", "info", "debug", or
/// "trace", corresponding to the named values of [`LevelFilter`]. If `LOG_LEVEL` is absent or has
/// some other value, this function returns `LevelFilter::Debug` if [`DEBUG`] is true, otherwise
/// `LevelFilter::Info`.
pub const fn build_time_log_level() -> LevelFilter {
    let level = match option_env!("LOG_LEVEL") {
        Some(level) => level,
        None => "",
    };
    match level.as_bytes() {
        b"off" => LevelFilter::Off,
        b"error" => LevelFilter::Error,
        b"warn" => LevelFilter::Warn,
        b"info" => LevelFilter::Info,
        b"debug" => LevelFilter::Debug,
        b"trace" => LevelFilter::Trace,
        _ => {
            if DEBUG {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            }
        }
    }
}

/// Something to which logs can be sent.
///
/// Note that unlike `core::fmt::Write`, the `write_fmt` method on this trait takes `&self` rather
/// than `&mut self`. This means that the implementation is responsible for handling locking if
/// necessary, or can be made lock-free.
pub trait LogSink {
    /// Writes the given format arguments to the log sink.
    fn write_fmt(&self, args: Arguments);

    /// Waits until everything written so far has left the sink.
    fn flush(&self);
}

/// Something which can wait for written characters to be sent.
pub trait Flush {
    /// Blocks until all characters written so far have been transmitted.
    fn flush_output(&mut self);
}

impl Flush for arm_pl011_uart::Uart<'_> {
    fn flush_output(&mut self) {
        while self.is_busy() {
            core::hint::spin_loop();
        }
    }
}

/// An implementation of `LogSink` that wraps around any implementation of `core::fmt::Write`.
///
/// This wraps the given writer in a spin mutex, to allow a single instance it to be used safely
/// from multiple cores. This also ensures that a complete log line is written at once, rather than
/// being interleaved with characters from another core.
///
/// The lock is only held with IRQ and FIQ masked, so a thread can't be interrupted or suspended
/// while holding it.
pub struct LockedWriter<W: Write + Flush> {
    writer: SpinMutex<W>,
}

impl<W: Write + Flush> LockedWriter<W> {
    /// Creates a new `LockedWriter` wrapping the given [`Write`] implementation.
    #[allow(unused)]
    pub const fn new(writer: W) -> Self {
        Self {
            writer: SpinMutex::new(writer),
        }
    }
}

impl<W: Write + Flush> LogSink for LockedWriter<W> {
    fn write_fmt(&self, args: Arguments) {
        // Ignore errors.
        let _ = exception_free(|_| self.writer.lock().write_fmt(args));
    }

    fn flush(&self) {
        exception_free(|_| self.writer.lock().flush_output());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::in_exception_free;
    use arm_pl011_uart::{PL011Registers, Uart, UniqueMmioPointer};
    use std::string::String;
    use zerocopy::FromZeros;

    #[derive(Default)]
    struct Buffer {
        text: String,
        flushed: usize,
        unmasked_accesses: usize,
    }

    impl Buffer {
        fn check_masked(&mut self) {
            if !in_exception_free() {
                self.unmasked_accesses += 1;
            }
        }
    }

    impl Write for Buffer {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            self.check_masked();
            self.text.push_str(s);
            Ok(())
        }
    }

    impl Flush for Buffer {
        fn flush_output(&mut self) {
            self.check_masked();
            self.flushed = self.text.len();
        }
    }

    #[test]
    fn locked_writer_writes_whole_lines() {
        let writer = LockedWriter::new(Buffer::default());
        writeln!(writer, "CPU {} {}", 1, "up");
        LogSink::flush(&writer);
        let buffer = writer.writer.lock();
        assert_eq!(buffer.text, "CPU 1 up\n");
        assert_eq!(buffer.flushed, 9);
    }

    #[test]
    fn writer_only_used_with_interrupts_masked() {
        let writer = LockedWriter::new(Buffer::default());
        writeln!(writer, "FIQ {}", 37);
        LogSink::flush(&writer);
        let buffer = writer.writer.lock();
        assert_eq!(buffer.text, "FIQ 37\n");
        assert_eq!(buffer.unmasked_accesses, 0);
    }

    #[test]
    fn idle_uart_flushes() {
        let mut registers = PL011Registers::new_zeroed();
        // BUSY is clear in the zeroed flag register.
        Uart::new(UniqueMmioPointer::from(&mut registers)).flush_output();
    }

    #[test]
    fn default_level() {
        if option_env!("LOG_LEVEL").is_none() {
            assert_eq!(build_time_log_level(), LevelFilter::Debug);
        }
    }
}
