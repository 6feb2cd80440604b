use akaze_features::RunConfig;
use log::*;
use std::error::Error as _;
use std::io::IsTerminal;
use std::process::ExitCode;

/// Log at info unless `RUST_LOG` says otherwise. The logger itself accepts
/// debug so that `--verbose` only has to raise the global maximum.
fn init_logger() {
    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => {
            builder.parse_filters(&filters);
            builder.init();
        }
        Err(_) => {
            builder.filter_level(LevelFilter::Debug);
            builder.init();
            log::set_max_level(LevelFilter::Info);
        }
    }
}

fn main() -> ExitCode {
    init_logger();
    let run_config = RunConfig {
        display: cfg!(feature = "display") && std::io::stdin().is_terminal(),
        ..RunConfig::default()
    };
    match akaze_features::run(std::env::args_os().skip(1), &run_config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{}", error);
            let mut source = error.source();
            while let Some(cause) = source {
                error!("caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
