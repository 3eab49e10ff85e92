//! Volume plugin entry point, invoked by the kubelet as
//! `xenflex-driver <init|mount|unmount> [<mount dir>] [<json options>]`.

use clap::Parser;
use log::debug;
use xenflex_core::config::DriverSettings;
use xenflex_core::logging;
use xenflex_core::protocol::{self, DriverOutput};
use xenflex_core::VolumeDriver;
use xenflex_hal::LinuxHal;
use xenflex_xapi::{ClientOptions, JsonRpcConnector};

#[derive(Parser, Debug)]
#[command(
    name = "xenflex-driver",
    about = "XenServer volume plugin",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// Plugin command and its arguments, passed through untouched
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let output = match DriverSettings::load() {
        Ok(settings) => {
            logging::init_driver(&settings.log_file);
            // Only the command and mount dir: the options carry the password.
            debug!("xenflex-driver {:?}", &cli.args[..cli.args.len().min(2)]);

            let connector = JsonRpcConnector::new(ClientOptions {
                accept_invalid_certs: !settings.verify_tls,
                timeout: None,
            });
            let driver = VolumeDriver::new(connector, LinuxHal::new(), settings);
            protocol::run(&driver, &cli.args)
        }
        Err(err) => DriverOutput::failure(format!("{:#}", err)),
    };

    println!("{}", output.to_json());
    std::process::exit(output.exit_code());
}
