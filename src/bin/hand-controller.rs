use std::env;
use log::{error, info};
use hand_controller::{init_logging, run};
use hand_controller::error::AppRunError;

fn main() -> Result<(), AppRunError> {
    init_logging()?;
    info!(concat!("Hand Controller ", env!("CARGO_PKG_VERSION")));

    let args = env::args();

    if let Err(err) = run(args) {
        error!("{}", err);
        return Err(err);
    }
    Ok(())
}
