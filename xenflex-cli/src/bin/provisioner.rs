//! Manual front end to the provisioner: create or delete the VDI behind a
//! persistent volume.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::collections::BTreeMap;
use std::path::PathBuf;
use xenflex_core::config::ProvisionerConfig;
use xenflex_core::logging;
use xenflex_core::provisioner::{parse_capacity, SR_NAME_PARAMETER};
use xenflex_core::{Provisioner, VolumeDescriptor, VolumeOptions};
use xenflex_xapi::{ClientOptions, JsonRpcConnector};

#[derive(Parser, Debug)]
#[command(name = "xenflex-provisioner", version, about = "XenServer disk provisioner")]
struct Cli {
    /// TOML file overriding the XENSERVER_* environment
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a disk and print the volume descriptor as JSON
    Provision {
        /// Volume name; becomes the VDI name label
        #[arg(long)]
        name: String,

        /// Requested size (e.g. 10Gi, 500M, 1073741824)
        #[arg(long)]
        capacity: String,

        /// Name label of the storage repository to allocate from
        #[arg(long)]
        sr_name: String,

        #[arg(long = "access-mode", default_value = "ReadWriteOnce")]
        access_modes: Vec<String>,

        #[arg(long, default_value = "Delete")]
        reclaim_policy: String,
    },

    /// Delete the disk behind a volume; succeeds if it is already gone
    Delete {
        #[arg(long)]
        name: String,
    },
}

fn main() -> Result<()> {
    logging::init_provisioner();
    let cli = Cli::parse();

    let mut config = ProvisionerConfig::from_env();
    if let Some(path) = &cli.config {
        config = config.merge_file(path)?;
    }
    info!("Using XenServer at {}", config.credentials.host);

    let connector = JsonRpcConnector::new(ClientOptions {
        accept_invalid_certs: !config.verify_tls,
        timeout: None,
    });
    let provisioner = Provisioner::new(connector, config);

    match cli.command {
        Command::Provision {
            name,
            capacity,
            sr_name,
            access_modes,
            reclaim_policy,
        } => {
            let options = VolumeOptions {
                pv_name: name,
                capacity_bytes: Some(parse_capacity(&capacity)?),
                access_modes,
                reclaim_policy,
                parameters: BTreeMap::from([(SR_NAME_PARAMETER.to_string(), sr_name)]),
            };
            let descriptor = provisioner.provision(&options)?;
            let json = serde_json::to_string_pretty(&descriptor)
                .context("Failed to encode volume descriptor")?;
            println!("{}", json);
        }
        Command::Delete { name } => {
            provisioner.delete(&VolumeDescriptor::named(name))?;
        }
    }
    Ok(())
}
