use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static description of one manageable command. Supplied once at
/// construction and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDef {
	pub id: String,
	pub title: String,
	pub command: String,
	#[serde(default)]
	pub cwd: Option<PathBuf>,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ProcessState {
	Stopped,
	Running { pid: u32 },
	Errored { message: String },
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running { .. })
	}

	pub fn is_errored(&self) -> bool {
		matches!(self, ProcessState::Errored { .. })
	}
}

/// Error view of a definition's state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorState {
	pub flag: bool,
	pub message: Option<String>,
}

/// One row of the status board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatus {
	pub id: String,
	pub title: String,
	pub state: ProcessState,
	pub port: Option<u16>,
	pub group: Option<String>,
}

impl ProcessStatus {
	pub fn pid(&self) -> Option<u32> {
		match self.state {
			ProcessState::Running { pid } => Some(pid),
			_ => None,
		}
	}
}
