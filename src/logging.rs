use core::fmt;
use log::{Level, Metadata, Record, SetLoggerError};
use spin::Mutex;

pub type Sink = fn(fmt::Arguments);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);
static LOGGER: Logger = Logger;

pub(crate) struct Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = *SINK.lock();
        if let Some(sink) = sink {
            sink(format_args!(
                "[{}:{}] {}\n",
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

// Routes the `log` macros to `sink`. Only the first call installs the logger;
// later calls just swap the sink and level.
pub fn init(sink: Sink, level: Level) -> Result<(), SetLoggerError> {
    *SINK.lock() = Some(sink);
    log::set_max_level(level.to_level_filter());
    log::set_logger(&LOGGER)
}
