use std::{io, sync::Once, thread, time::SystemTime};

use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

// Logs every message at `level` and above. The chronology ticks every few milliseconds, so its trace
// lines are held back to debug.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                let millis = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|since_epoch| since_epoch.as_millis())
                    .unwrap_or_default();
                out.finish(format_args!(
                    "[{}][{:?}][{}][{}] {}",
                    millis,
                    thread::current().id(),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level)
            .level_for("spos_rs::consensus::chronology", level.min(LevelFilter::Debug))
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}
