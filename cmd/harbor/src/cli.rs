use std::path::PathBuf;
use std::str::FromStr;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use ethereum_types::Address;
use secp256k1::SecretKey;

use harbor_common::utils::parse_hex;

pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "harbor",
    author,
    version = VERSION_STRING,
    about = "Deterministic cross-chain contract deployment sessions"
)]
pub struct CLI {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(about = "Run a deployment session: start or resume, deploy, optionally finish.")]
    Deploy(DeployOptions),
    #[command(about = "Print the persisted session record.")]
    Status(StatusOptions),
}

#[derive(Parser)]
pub struct DeployOptions {
    #[arg(
        long,
        value_name = "NETWORK",
        env = "HARBOR_NETWORK",
        help_heading = "Session options",
        help = "Label of the target chain, recorded in the session state."
    )]
    pub network: Option<String>,
    #[arg(
        long = "salt-string",
        value_name = "STRING",
        env = "HARBOR_SALT_STRING",
        help_heading = "Session options",
        help = "Campaign salt string every address derives from. Required to start."
    )]
    pub salt_string: Option<String>,
    #[arg(
        long,
        value_name = "ADDRESS",
        value_parser = parse_address,
        env = "HARBOR_OWNER",
        help_heading = "Session options",
        help = "Final owner of every deployed artifact. Required to start."
    )]
    pub owner: Option<Address>,
    #[arg(
        long = "operator-private-key",
        value_name = "PRIVATE_KEY",
        value_parser = parse_private_key,
        env = "HARBOR_OPERATOR_PRIVATE_KEY",
        help_heading = "Session options",
        help = "Key of the operator executing commits and reveals."
    )]
    pub operator_private_key: SecretKey,
    #[arg(
        long = "state-file",
        value_name = "PATH",
        default_value = "harbor-session.json",
        env = "HARBOR_STATE_FILE",
        help_heading = "Session options"
    )]
    pub state_file: PathBuf,
    #[arg(
        long,
        env = "HARBOR_RESUME",
        help_heading = "Session options",
        help = "Resume from the state file instead of starting a fresh session."
    )]
    pub resume: bool,
    #[arg(
        long,
        env = "HARBOR_FINISH",
        help_heading = "Session options",
        help = "Finish the session after the requested deployments: hand ownership over and seal the record."
    )]
    pub finish: bool,
    #[arg(
        long = "reveal-confirmations",
        value_name = "UINT64",
        default_value = "1",
        env = "HARBOR_REVEAL_CONFIRMATIONS",
        help_heading = "Session options",
        help = "Blocks to wait between commit and reveal."
    )]
    pub reveal_confirmations: u64,
    #[arg(
        long = "contract",
        value_name = "KEY=INITCODE_HEX",
        value_parser = ContractSpec::from_str,
        help_heading = "Deployment options",
        help = "Deploy a contract under KEY with the given init code. Repeatable."
    )]
    pub contracts: Vec<ContractSpec>,
    #[arg(
        long = "proxy",
        value_name = "KEY=IMPL_KEY[:INITDATA_HEX]",
        value_parser = ProxySpec::from_str,
        help_heading = "Deployment options",
        help = "Deploy a proxy under KEY pointing at the contract deployed under IMPL_KEY. Repeatable."
    )]
    pub proxies: Vec<ProxySpec>,
}

#[derive(Parser)]
pub struct StatusOptions {
    #[arg(
        long = "state-file",
        value_name = "PATH",
        default_value = "harbor-session.json",
        env = "HARBOR_STATE_FILE"
    )]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ContractSpec {
    pub key: String,
    pub init_code: Bytes,
}

impl FromStr for ContractSpec {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, code) = s
            .split_once('=')
            .ok_or_else(|| eyre::eyre!("expected KEY=INITCODE_HEX, got {s:?}"))?;
        Ok(Self {
            key: key.to_owned(),
            init_code: parse_hex(code)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProxySpec {
    pub key: String,
    pub implementation_key: String,
    pub init_data: Bytes,
}

impl FromStr for ProxySpec {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, rest) = s
            .split_once('=')
            .ok_or_else(|| eyre::eyre!("expected KEY=IMPL_KEY[:INITDATA_HEX], got {s:?}"))?;
        let (implementation, init_data) = match rest.split_once(':') {
            Some((implementation, data)) => (implementation, parse_hex(data)?),
            None => (rest, Bytes::new()),
        };
        Ok(Self {
            key: key.to_owned(),
            implementation_key: implementation.to_owned(),
            init_data,
        })
    }
}

pub fn parse_private_key(s: &str) -> eyre::Result<SecretKey> {
    Ok(SecretKey::from_slice(&parse_hex(s)?)?)
}

pub fn parse_address(s: &str) -> eyre::Result<Address> {
    let raw = parse_hex(s)?;
    if raw.len() != 20 {
        eyre::bail!("expected a 20-byte address, got {} bytes", raw.len());
    }
    Ok(Address::from_slice(&raw))
}
