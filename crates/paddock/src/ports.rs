use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// The OS refused to deliver the kill signal (no such process, not
/// permitted). Callers treat this as non-fatal.
#[derive(Debug, Error)]
#[error("failed to kill pid {pid}: {errno}")]
pub struct TerminationError {
	pub pid: u32,
	pub errno: nix::Error,
}

/// Narrow seam around the OS-specific parts of port handling, so the
/// supervisor stays platform-agnostic.
pub trait PortInspector: Send + Sync {
	/// Pid of the process with a listening TCP socket on `port`, if any.
	/// Every lookup failure collapses to `None`.
	fn find_owner(&self, port: u16) -> Option<u32>;

	/// Forcefully kill `pid`.
	fn terminate(&self, pid: u32) -> Result<(), TerminationError>;
}

/// Inspector backed by the OS socket table.
pub struct SystemPorts;

impl PortInspector for SystemPorts {
	fn find_owner(&self, port: u16) -> Option<u32> {
		use netstat2::*;

		let af = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
		let sockets = get_sockets_info(af, ProtocolFlags::TCP).ok()?;
		for si in &sockets {
			if let ProtocolSocketInfo::Tcp(ref tcp) = si.protocol_socket_info {
				if tcp.state == TcpState::Listen && tcp.local_port == port {
					if let Some(&pid) = si.associated_pids.first() {
						return Some(pid);
					}
				}
			}
		}
		None
	}

	fn terminate(&self, pid: u32) -> Result<(), TerminationError> {
		kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
			.map_err(|errno| TerminationError { pid, errno })
	}
}
