use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::error;
use tunecho::address::{AddressAssigner, NoopAssigner, SystemAssigner};
use tunecho::{EchoConfig, LoopStats, ResponderMode, TunBuilder, TunError};
use tunecho_proto::NetworkAddress;

/// Answer ICMP echo requests on a virtual TUN interface
#[derive(Parser, Debug)]
#[command(name = "tunecho")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write every packet back to the interface unchanged
    Echo(DeviceArgs),
    /// Reply to echo requests and drop everything else
    Ping(DeviceArgs),
    /// Reply to echo requests and pass everything else back untouched
    ReplyPing(DeviceArgs),
}

#[derive(Args, Debug)]
struct DeviceArgs {
    /// Interface name (empty lets the OS choose)
    #[arg(long = "if-name", default_value = "")]
    if_name: String,

    /// Address assigned to the interface
    #[arg(long = "address", default_value = "10.10.10.10")]
    address: NetworkAddress,

    /// Netmask prefix length [default: 32 for echo, 24 otherwise]
    #[arg(long = "netmask-prefix")]
    netmask_prefix: Option<u8>,

    /// Largest packet read from the interface
    #[arg(long = "mtu", default_value_t = tunecho::config::DEFAULT_MTU)]
    mtu: usize,

    /// Leave the interface unconfigured
    #[arg(long = "no-assign")]
    no_assign: bool,

    /// Keep the kernel's packet-information header (Linux)
    #[arg(long = "packet-info")]
    packet_info: bool,
}

impl Command {
    fn split(self) -> (ResponderMode, DeviceArgs) {
        match self {
            Command::Echo(args) => (ResponderMode::Loopback, args),
            Command::Ping(args) => (ResponderMode::Ping, args),
            Command::ReplyPing(args) => (ResponderMode::Reply, args),
        }
    }
}

fn config_for(mode: ResponderMode, args: &DeviceArgs) -> EchoConfig {
    let default_prefix = match mode {
        ResponderMode::Loopback => 32,
        _ => tunecho::config::DEFAULT_PREFIX_LEN,
    };
    EchoConfig {
        if_name: Some(args.if_name.clone()).filter(|name| !name.is_empty()),
        address: args.address,
        prefix_len: args.netmask_prefix.unwrap_or(default_prefix),
        mtu: args.mtu,
        mode,
    }
}

fn run(cli: Cli) -> Result<LoopStats, TunError> {
    let (mode, args) = cli.command.split();
    let config = config_for(mode, &args);
    config.validate()?;

    let builder = TunBuilder::from_config(&config).packet_information(args.packet_info);
    let (device, name) = builder.open()?;
    println!("Created TUN device {}", name);

    let assigner: Box<dyn AddressAssigner> = if args.no_assign {
        Box::new(NoopAssigner)
    } else {
        Box::new(SystemAssigner)
    };
    assigner.assign_address(&name, config.address, config.prefix_len)?;
    println!("Assigned address {}/{} to {}", config.address, config.prefix_len, name);

    let mut engine = builder.engine_for(device);
    let shutdown = engine.shutdown_handle();
    ctrlc::set_handler(move || shutdown.shutdown())
        .map_err(|e| TunError::Os(format!("failed to install Ctrl-C handler: {}", e)))?;

    engine.run()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(stats) => {
            println!("{}", stats);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (ResponderMode, DeviceArgs) {
        Cli::try_parse_from(args).unwrap().command.split()
    }

    #[test]
    fn test_echo_defaults_to_host_prefix() {
        let (mode, args) = parse(&["tunecho", "echo"]);
        let config = config_for(mode, &args);
        assert_eq!(config.mode, ResponderMode::Loopback);
        assert_eq!(config.prefix_len, 32);
        assert_eq!(config.if_name, None);
        assert_eq!(config.address.to_string(), "10.10.10.10");
    }

    #[test]
    fn test_ping_options() {
        let (mode, args) = parse(&[
            "tunecho",
            "reply-ping",
            "--if-name",
            "utun7",
            "--address",
            "10.0.0.1",
            "--netmask-prefix",
            "16",
            "--mtu",
            "9000",
        ]);
        let config = config_for(mode, &args);
        assert_eq!(config.mode, ResponderMode::Reply);
        assert_eq!(config.if_name.as_deref(), Some("utun7"));
        assert_eq!(config.prefix_len, 16);
        assert_eq!(config.mtu, 9000);

        let (mode, args) = parse(&["tunecho", "ping"]);
        assert_eq!(config_for(mode, &args).prefix_len, 24);
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(Cli::try_parse_from(["tunecho", "ping", "--address", "nope"]).is_err());
    }
}
