use log::{LevelFilter, SetLoggerError};
use log4rs::{
    Config,
    append::console::ConsoleAppender,
    config::{Appender, Root, runtime::ConfigErrors},
    encode::pattern::PatternEncoder,
};

/// Failure to install the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// The log4rs configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    /// A logger is already installed.
    #[error(transparent)]
    SetLogger(#[from] SetLoggerError),
}

/// Install a console logger at `level` and log panics through it.
pub fn init_log(level: LevelFilter) -> Result<(), LoggerError> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("[{h({l})} - {f}:{L}] {m}{n}")))
        .build();
    let appender = Appender::builder().build("stdout", Box::new(stdout));

    log4rs::init_config(
        Config::builder()
            .appender(appender)
            .build(Root::builder().appender("stdout").build(level))?,
    )?;
    update_panic_hook();

    Ok(())
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        hook(info);
    }));
}
