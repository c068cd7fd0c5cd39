//! Giving the interface an address so the OS routes traffic into it.

use std::process::Command;

use log::{debug, info};
use tunecho_proto::NetworkAddress;

use crate::error::TunError;

pub trait AddressAssigner {
    fn assign_address(&self, device: &str, address: NetworkAddress, prefix_len: u8) -> Result<(), TunError>;
}

/// Which OS tool set to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Platform::MacOs)
        } else if cfg!(windows) {
            Some(Platform::Windows)
        } else {
            None
        }
    }
}

/// Commands that configure `address/prefix_len` on `device` and bring it up.
pub fn assignment_commands(
    platform: Platform,
    device: &str,
    address: NetworkAddress,
    prefix_len: u8,
) -> Result<Vec<Vec<String>>, TunError> {
    if prefix_len > address.max_prefix_len() {
        return Err(TunError::InvalidConfiguration(format!(
            "prefix length {} is too long for {}",
            prefix_len, address
        )));
    }

    let cidr = format!("{}/{}", address, prefix_len);
    let commands: Vec<Vec<String>> = match (platform, address) {
        (Platform::Linux, _) => vec![
            argv(&["ip", "addr", "add", cidr.as_str(), "dev", device]),
            argv(&["ip", "link", "set", "dev", device, "up"]),
        ],
        (Platform::MacOs, NetworkAddress::V4(_)) => {
            let addr = address.to_string();
            vec![
                argv(&["/sbin/ifconfig", device, "add", addr.as_str(), addr.as_str()]),
                argv(&["/sbin/ifconfig", device, "up"]),
                argv(&["/sbin/route", "add", "-net", cidr.as_str(), "-iface", device]),
            ]
        }
        (Platform::MacOs, NetworkAddress::V6(_)) => vec![
            argv(&["/sbin/ifconfig", device, "inet6", address.to_string().as_str(), "prefixlen", prefix_len.to_string().as_str()]),
            argv(&["/sbin/ifconfig", device, "up"]),
        ],
        (Platform::Windows, NetworkAddress::V4(_)) => {
            let mask = NetworkAddress::ipv4_netmask(prefix_len)
                .ok_or_else(|| TunError::InvalidConfiguration(format!("bad IPv4 prefix {}", prefix_len)))?;
            vec![argv(&[
                "netsh",
                "interface",
                "ipv4",
                "set",
                "address",
                format!("name={}", device).as_str(),
                "static",
                address.to_string().as_str(),
                mask.to_string().as_str(),
            ])]
        }
        (Platform::Windows, NetworkAddress::V6(_)) => vec![argv(&[
            "netsh",
            "interface",
            "ipv6",
            "add",
            "address",
            format!("interface={}", device).as_str(),
            cidr.as_str(),
        ])],
    };
    Ok(commands)
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Runs the platform's network tools (`ip`, `ifconfig`/`route`, `netsh`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAssigner;

impl AddressAssigner for SystemAssigner {
    fn assign_address(&self, device: &str, address: NetworkAddress, prefix_len: u8) -> Result<(), TunError> {
        let platform = Platform::current()
            .ok_or_else(|| TunError::Os("address assignment is not supported on this platform".into()))?;
        for command in assignment_commands(platform, device, address, prefix_len)? {
            run_command(&command)?;
        }
        info!("assigned {}/{} to {}", address, prefix_len, device);
        Ok(())
    }
}

fn run_command(command: &[String]) -> Result<(), TunError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    let line = command.join(" ");
    debug!("executing `{}`", line);

    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| TunError::Os(format!("Executing `{}` failed: {}", line, e)))?;
    if !status.success() {
        let code = status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(TunError::Os(format!("Executing `{}` returned non-zero exit code ({}).", line, code)));
    }
    Ok(())
}

/// Leaves the interface unconfigured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAssigner;

impl AddressAssigner for NoopAssigner {
    fn assign_address(&self, device: &str, address: NetworkAddress, prefix_len: u8) -> Result<(), TunError> {
        if prefix_len > address.max_prefix_len() {
            return Err(TunError::InvalidConfiguration(format!(
                "prefix length {} is too long for {}",
                prefix_len, address
            )));
        }
        debug!("skipping address assignment of {}/{} on {}", address, prefix_len, device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: NetworkAddress = NetworkAddress::V4([10, 10, 10, 10]);

    fn joined(commands: Vec<Vec<String>>) -> Vec<String> {
        commands.into_iter().map(|c| c.join(" ")).collect()
    }

    #[test]
    fn test_linux_commands() {
        let commands = assignment_commands(Platform::Linux, "tun0", ADDR, 24).unwrap();
        assert_eq!(joined(commands), vec!["ip addr add 10.10.10.10/24 dev tun0", "ip link set dev tun0 up"]);
    }

    #[test]
    fn test_macos_commands() {
        let commands = assignment_commands(Platform::MacOs, "utun3", ADDR, 32).unwrap();
        assert_eq!(
            joined(commands),
            vec![
                "/sbin/ifconfig utun3 add 10.10.10.10 10.10.10.10",
                "/sbin/ifconfig utun3 up",
                "/sbin/route add -net 10.10.10.10/32 -iface utun3",
            ]
        );
    }

    #[test]
    fn test_windows_commands() {
        let commands = assignment_commands(Platform::Windows, "tunecho0", ADDR, 24).unwrap();
        assert_eq!(
            joined(commands),
            vec!["netsh interface ipv4 set address name=tunecho0 static 10.10.10.10 255.255.255.0"]
        );
    }

    #[test]
    fn test_ipv6_commands() {
        let v6: NetworkAddress = "fd00::1".parse().unwrap();
        let commands = assignment_commands(Platform::Linux, "tun0", v6, 64).unwrap();
        assert_eq!(joined(commands)[0], "ip addr add fd00::1/64 dev tun0");
        let commands = assignment_commands(Platform::MacOs, "utun3", v6, 64).unwrap();
        assert_eq!(joined(commands)[0], "/sbin/ifconfig utun3 inet6 fd00::1 prefixlen 64");
    }

    #[test]
    fn test_prefix_too_long() {
        for platform in [Platform::Linux, Platform::MacOs, Platform::Windows] {
            assert!(matches!(
                assignment_commands(platform, "tun0", ADDR, 33),
                Err(TunError::InvalidConfiguration(_))
            ));
        }
        assert!(NoopAssigner.assign_address("tun0", ADDR, 33).is_err());
        assert!(NoopAssigner.assign_address("tun0", ADDR, 32).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_reported() {
        let err = run_command(&argv(&["sh", "-c", "exit 3"])).unwrap_err();
        assert_eq!(err.to_string(), "OS command failed: Executing `sh -c exit 3` returned non-zero exit code (3).");
    }

    #[test]
    fn test_missing_program_is_reported() {
        let err = run_command(&argv(&["tunecho-no-such-program"])).unwrap_err();
        assert!(matches!(err, TunError::Os(_)));
    }
}
