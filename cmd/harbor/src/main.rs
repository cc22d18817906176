mod cli;

use clap::Parser;
use ethereum_types::U256;
use eyre::eyre;
use tracing::info;
use tracing_subscriber::EnvFilter;

use harbor_common::signer::address_from_secret_key;
use harbor_session::{DeploymentKind, Environment, FileStore, SessionMachine, StoreEngine};

use crate::cli::{CLI, Command, DeployOptions, StatusOptions};

fn main() -> eyre::Result<()> {
    init_tracing();
    match CLI::parse().command {
        Command::Deploy(opts) => deploy(opts),
        Command::Status(opts) => status(&opts),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn deploy(opts: DeployOptions) -> eyre::Result<()> {
    let operator = address_from_secret_key(&opts.operator_private_key)?;
    let mut env = Environment::new(operator, operator);
    env.reveal_confirmations = opts.reveal_confirmations;

    let mut machine = SessionMachine::new(env, Box::new(FileStore::new(&opts.state_file)));
    if opts.resume {
        machine.resume()?;
    } else {
        let salt_string = opts
            .salt_string
            .ok_or_else(|| eyre!("--salt-string is required to start a session"))?;
        let owner = opts
            .owner
            .ok_or_else(|| eyre!("--owner is required to start a session"))?;
        machine.start(opts.network.clone(), salt_string, owner)?;
    }

    for spec in &opts.contracts {
        let address = machine.deploy_contract(spec.key.as_str(), &spec.init_code, U256::zero())?;
        info!(key = %spec.key, address = %format!("{address:#x}"), "contract deployed");
    }
    for spec in &opts.proxies {
        let address = machine.deploy_proxy(
            spec.key.as_str(),
            spec.implementation_key.as_str(),
            &spec.init_data,
        )?;
        info!(key = %spec.key, proxy = %format!("{address:#x}"), "proxy deployed");
    }

    if opts.finish {
        machine.finish()?;
        info!("session finished, ownership handed over");
    }
    Ok(())
}

fn status(opts: &StatusOptions) -> eyre::Result<()> {
    let Some(document) = FileStore::new(&opts.state_file).load()? else {
        println!("no session state at {}", opts.state_file.display());
        return Ok(());
    };

    println!(
        "campaign {:?} on {} ({})",
        document.salt_string.as_deref().unwrap_or("<unset>"),
        document.network.as_deref().unwrap_or("<unknown network>"),
        if document.finished { "finished" } else { "active" },
    );
    if let Some(owner) = document.owner {
        println!("owner    {owner:#x}");
    }
    if let Some(deployer) = document.deployer {
        println!("deployer {deployer:#x}");
    }
    for (key, record) in &document.deployment {
        let mut line = format!("  {key}: {:#x}", record.address);
        if let Some(implementation) = &record.implementation {
            line.push_str(&format!(" -> {implementation}"));
        }
        if record.kind == DeploymentKind::Proxy && !record.stub_upgraded {
            line.push_str(" (stub pending)");
        }
        println!("{line}");
    }
    println!(
        "{} deployment(s), {} run(s)",
        document.deployment.len(),
        document.runs.len()
    );
    Ok(())
}
