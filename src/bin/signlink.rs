use std::env;
use std::process::ExitCode;
use log::{error, info};
use signlink::{init_logging, run};
use signlink::error::{AppRunError, StoreError};

fn main() -> ExitCode {
    init_logging();
    info!(concat!("signlink ", env!("CARGO_PKG_VERSION")));

    match run(env::args()) {
        Err(AppRunError::Store { source: StoreError::CanNotLock { .. } }) => {
            eprintln!("signlink is already running with this settings file");
            ExitCode::FAILURE
        },
        Err(err) => {
            error!("{}", err);
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        },
        Ok(()) => ExitCode::SUCCESS,
    }
}
