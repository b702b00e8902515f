//! Listening-port enumeration for candidate backend processes.
//!
//! Each platform shells out to the tool it ships with. A missing tool, a
//! failing tool or unparsable output all mean "no ports", never an error.
//!
//! # Platform Behavior
//! - **Linux/macOS**: `lsof -nP -a -p PID -iTCP -sTCP:LISTEN`, falling back
//!   to `ss -ltnpH` when `lsof` is unavailable
//! - **Windows**: `netstat -ano -p tcp`

use super::process::find_processes_by_name;
use std::process::Command;
use tracing::debug;

/// A process listening on a local TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub pid: u32,
    pub port: u16,
}

/// Finds candidate backend endpoints on this host.
pub trait EndpointEnumerator: Send + Sync {
    /// PIDs of running processes whose executable matches one of `names`.
    fn find_processes(&self, names: &[String]) -> Vec<u32>;

    /// TCP ports `pid` is listening on.
    fn listening_ports(&self, pid: u32) -> Vec<u16>;

    /// Every `(pid, port)` pair for processes matching `names`.
    fn candidate_endpoints(&self, names: &[String]) -> Vec<Endpoint> {
        self.find_processes(names)
            .into_iter()
            .flat_map(|pid| {
                self.listening_ports(pid)
                    .into_iter()
                    .map(move |port| Endpoint { pid, port })
            })
            .collect()
    }
}

/// Enumerator backed by the process table and the platform's socket tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEndpoints;

impl EndpointEnumerator for SystemEndpoints {
    fn find_processes(&self, names: &[String]) -> Vec<u32> {
        find_processes_by_name(names)
            .into_iter()
            .map(|(pid, _)| pid)
            .collect()
    }

    fn listening_ports(&self, pid: u32) -> Vec<u16> {
        let mut ports = platform_listening_ports(pid);
        ports.sort_unstable();
        ports.dedup();
        debug!("Process {} listens on {:?}", pid, ports);
        ports
    }
}

#[cfg(unix)]
fn platform_listening_ports(pid: u32) -> Vec<u16> {
    let pid_arg = pid.to_string();
    if let Some(stdout) = run_tool(
        "lsof",
        &["-nP", "-a", "-p", &pid_arg, "-iTCP", "-sTCP:LISTEN"],
    ) {
        return parse_lsof(&stdout);
    }
    match run_tool("ss", &["-ltnpH"]) {
        Some(stdout) => parse_ss(&stdout, pid),
        None => Vec::new(),
    }
}

#[cfg(windows)]
fn platform_listening_ports(pid: u32) -> Vec<u16> {
    match run_tool("netstat", &["-ano", "-p", "tcp"]) {
        Some(stdout) => parse_netstat(&stdout, pid),
        None => Vec::new(),
    }
}

#[cfg(not(any(unix, windows)))]
fn platform_listening_ports(_pid: u32) -> Vec<u16> {
    Vec::new()
}

/// Run a tool and return its stdout, or `None` if it is missing.
///
/// `lsof` exits 1 when nothing matched; that still counts as a run with
/// empty output.
fn run_tool(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output() {
        Ok(output) => {
            if !output.status.success() && output.stdout.is_empty() && !output.stderr.is_empty() {
                debug!(
                    "{} failed: {}",
                    program,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return None;
            }
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Err(e) => {
            debug!("Failed to run {}: {}", program, e);
            None
        }
    }
}

/// Port after the last `:` of a local address (`127.0.0.1:8744`, `[::1]:8744`, `*:8744`).
fn port_of(address: &str) -> Option<u16> {
    address.rsplit_once(':')?.1.parse().ok()
}

/// Parse `lsof -nP -iTCP -sTCP:LISTEN` output.
///
/// ```text
/// COMMAND   PID USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
/// ida64   41233 me     12u  IPv4 0x1234      0t0  TCP 127.0.0.1:13337 (LISTEN)
/// ```
pub(crate) fn parse_lsof(stdout: &str) -> Vec<u16> {
    stdout
        .lines()
        .skip(1)
        .filter(|line| line.contains("(LISTEN)"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let name = tokens.iter().rev().nth(1)?;
            port_of(name)
        })
        .collect()
}

/// Parse `ss -ltnpH` output for sockets owned by `pid`.
///
/// ```text
/// LISTEN 0 128 127.0.0.1:13337 0.0.0.0:* users:(("ida64",pid=41233,fd=12))
/// ```
pub(crate) fn parse_ss(stdout: &str, pid: u32) -> Vec<u16> {
    let needle = format!("pid={},", pid);
    stdout
        .lines()
        .filter(|line| line.contains(&needle))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            port_of(tokens.get(3)?)
        })
        .collect()
}

/// Parse `netstat -ano -p tcp` output for sockets owned by `pid`.
///
/// ```text
///   TCP    127.0.0.1:13337        0.0.0.0:0              LISTENING       41233
/// ```
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn parse_netstat(stdout: &str, pid: u32) -> Vec<u16> {
    let pid = pid.to_string();
    stdout
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 5 || !tokens[0].eq_ignore_ascii_case("tcp") {
                return None;
            }
            if tokens[3] != "LISTENING" || tokens[4] != pid {
                return None;
            }
            port_of(tokens[1])
        })
        .collect()
}
