use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};

use crate::output::OutputCapture;
use crate::ports::{PortInspector, SystemPorts};
use crate::types::*;

const KILL_GRACE: Duration = Duration::from_secs(3);

pub struct SupervisorConfig {
	pub log_dir: PathBuf,
}

/// A port conflict waiting on the rendering layer's yes/no answer.
/// Reply `true` to kill the owner before the spawn; anything else
/// (including dropping the reply) leaves it alone. The spawn proceeds
/// either way.
pub struct ConfirmRequest {
	pub id: String,
	pub port: u16,
	pub owner: u32,
	pub reply: oneshot::Sender<bool>,
}

pub struct Supervisor {
	defs: Vec<ProcessDef>,
	procs: RwLock<HashMap<String, RunState>>,
	changes: broadcast::Sender<()>,
	confirm: RwLock<Option<mpsc::Sender<ConfirmRequest>>>,
	inspector: Box<dyn PortInspector>,
	config: SupervisorConfig,
}

struct RunState {
	state: ProcessState,
	// claims the id across the confirm-prompt await inside start()
	starting: bool,
	output: OutputCapture,
	cancel: Option<watch::Sender<bool>>,
}

impl RunState {
	fn new() -> Self {
		Self {
			state: ProcessState::Stopped,
			starting: false,
			output: OutputCapture::new(),
			cancel: None,
		}
	}
}

impl Supervisor {
	pub fn new(defs: Vec<ProcessDef>, config: SupervisorConfig) -> Arc<Self> {
		Self::with_inspector(defs, config, Box::new(SystemPorts))
	}

	pub fn with_inspector(
		defs: Vec<ProcessDef>,
		config: SupervisorConfig,
		inspector: Box<dyn PortInspector>,
	) -> Arc<Self> {
		let mut uniq: Vec<ProcessDef> = Vec::with_capacity(defs.len());
		for def in defs {
			if uniq.iter().any(|d| d.id == def.id) {
				tracing::warn!("duplicate process id '{}', keeping the first", def.id);
				continue;
			}
			uniq.push(def);
		}

		let procs = uniq
			.iter()
			.map(|def| (def.id.clone(), RunState::new()))
			.collect();
		let (changes, _) = broadcast::channel(64);

		Arc::new(Self {
			defs: uniq,
			procs: RwLock::new(procs),
			changes,
			confirm: RwLock::new(None),
			inspector,
			config,
		})
	}

	/// Hook up the channel that carries port-conflict prompts to the
	/// rendering layer. Without one, conflicting owners are left alone.
	pub async fn attach_confirm(&self, tx: mpsc::Sender<ConfirmRequest>) {
		*self.confirm.write().await = Some(tx);
	}

	/// One `()` per state transition, fire-and-forget.
	pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
		self.changes.subscribe()
	}

	pub async fn start(self: &Arc<Self>, id: &str) -> Result<String, String> {
		let def = match self.def(id) {
			Some(def) => def.clone(),
			None => return Err(format!("unknown process: {}", id)),
		};

		{
			let mut procs = self.procs.write().await;
			let rs = match procs.get_mut(id) {
				Some(rs) => rs,
				None => return Err(format!("unknown process: {}", id)),
			};
			if rs.state.is_running() || rs.starting {
				return Ok(format!("{}: already running", id));
			}
			rs.starting = true;
		}

		if let Some(port) = def.port {
			if let Some(owner) = self.inspector.find_owner(port) {
				if self.confirm_kill(id, port, owner).await {
					match self.inspector.terminate(owner) {
						Ok(()) => {
							tracing::info!("{}: killed pid {} holding port {}", id, owner, port)
						}
						Err(e) => tracing::warn!("{}: {}", id, e),
					}
				}
			}
		}

		// Clear the previous run's log and error for this run.
		let (output, cancel_rx) = {
			let mut procs = self.procs.write().await;
			let rs = match procs.get_mut(id) {
				Some(rs) => rs,
				None => return Err(format!("unknown process: {}", id)),
			};
			let (cancel_tx, cancel_rx) = watch::channel(false);
			rs.cancel = Some(cancel_tx);
			rs.state = ProcessState::Stopped;
			(rs.output.clone(), cancel_rx)
		};

		output.reset(&self.config.log_dir, id).await;
		output
			.write(format!("[paddock] starting: {}\n", def.command).as_bytes())
			.await;

		let mut child = match spawn_process(&def) {
			Ok(c) => c,
			Err(e) => {
				output.write(format!("[paddock] {}\n", e).as_bytes()).await;
				{
					let mut procs = self.procs.write().await;
					if let Some(rs) = procs.get_mut(id) {
						rs.starting = false;
						rs.cancel = None;
						rs.state = ProcessState::Errored { message: e.clone() };
					}
				}
				self.notify();
				return Err(format!("{}: {}", id, e));
			}
		};

		let pid = child.id().unwrap_or(0);

		if let Some(stdout) = child.stdout.take() {
			let out = output.clone();
			tokio::spawn(async move {
				pipe_output(stdout, out).await;
			});
		}
		if let Some(stderr) = child.stderr.take() {
			let out = output.clone();
			tokio::spawn(async move {
				pipe_output(stderr, out).await;
			});
		}

		{
			let mut procs = self.procs.write().await;
			if let Some(rs) = procs.get_mut(id) {
				rs.starting = false;
				rs.state = ProcessState::Running { pid };
			}
		}
		self.notify();

		let sup = Arc::clone(self);
		let observer_id = id.to_string();
		tokio::spawn(async move {
			watch_exit(sup, observer_id, child, output, cancel_rx).await;
		});

		Ok(format!("{}: started (pid {})", id, pid))
	}

	pub async fn stop(self: &Arc<Self>, id: &str) -> Result<String, String> {
		let (output, pid, cancel) = {
			let mut procs = self.procs.write().await;
			let rs = match procs.get_mut(id) {
				Some(rs) => rs,
				None => return Err(format!("unknown process: {}", id)),
			};
			let pid = match rs.state {
				ProcessState::Running { pid } => pid,
				_ => return Ok(format!("{}: not running", id)),
			};
			rs.state = ProcessState::Stopped;
			(rs.output.clone(), pid, rs.cancel.take())
		};

		output.write(b"[paddock] stopping\n").await;

		if let Some(cancel) = cancel {
			let _ = cancel.send(true);
		}
		if pid == 0 {
			tracing::warn!("{}: no pid recorded, nothing to signal", id);
		} else {
			kill_process_tree(pid);
		}

		self.notify();
		Ok(format!("{}: stopped", id))
	}

	/// Reset an errored definition back to Stopped without signalling
	/// anything, for recovering from launch failures where no real OS
	/// process exists.
	pub async fn clear_error(&self, id: &str) -> Result<String, String> {
		{
			let mut procs = self.procs.write().await;
			let rs = match procs.get_mut(id) {
				Some(rs) => rs,
				None => return Err(format!("unknown process: {}", id)),
			};
			rs.cancel = None;
			rs.state = ProcessState::Stopped;
		}
		self.notify();
		Ok(format!("{}: error cleared", id))
	}

	pub async fn start_group(self: &Arc<Self>, group: &str) -> Result<String, String> {
		let ids = self.group_members(group);
		if ids.is_empty() {
			return Err(format!("no processes in group '{}'", group));
		}
		let n = ids.len();
		self.start_detached(ids);
		Ok(format!("{}: starting {} process(es)", group, n))
	}

	pub async fn stop_group(self: &Arc<Self>, group: &str) -> Result<String, String> {
		let ids = self.group_members(group);
		if ids.is_empty() {
			return Err(format!("no processes in group '{}'", group));
		}
		let n = ids.len();
		for id in &ids {
			if let Err(e) = self.stop(id).await {
				tracing::warn!("{}", e);
			}
		}
		Ok(format!("{}: stopped {} process(es)", group, n))
	}

	pub async fn start_all(self: &Arc<Self>) -> Result<String, String> {
		let ids: Vec<String> = self.defs.iter().map(|d| d.id.clone()).collect();
		let n = ids.len();
		self.start_detached(ids);
		Ok(format!("starting {} process(es)", n))
	}

	pub async fn stop_all(self: &Arc<Self>) -> Result<String, String> {
		let ids: Vec<String> = self.defs.iter().map(|d| d.id.clone()).collect();
		let n = ids.len();
		for id in &ids {
			if let Err(e) = self.stop(id).await {
				tracing::warn!("{}", e);
			}
		}
		Ok(format!("stopped {} process(es)", n))
	}

	pub async fn is_running(&self, id: &str) -> bool {
		let procs = self.procs.read().await;
		procs.get(id).map(|rs| rs.state.is_running()).unwrap_or(false)
	}

	pub async fn state(&self, id: &str) -> Option<ProcessState> {
		let procs = self.procs.read().await;
		procs.get(id).map(|rs| rs.state.clone())
	}

	pub async fn error_state(&self, id: &str) -> ErrorState {
		let procs = self.procs.read().await;
		match procs.get(id).map(|rs| &rs.state) {
			Some(ProcessState::Errored { message }) => ErrorState {
				flag: true,
				message: Some(message.clone()),
			},
			_ => ErrorState::default(),
		}
	}

	/// Definitions in the order they were supplied at construction.
	pub fn definitions(&self) -> &[ProcessDef] {
		&self.defs
	}

	pub async fn statuses(&self) -> Vec<ProcessStatus> {
		let procs = self.procs.read().await;
		self.defs
			.iter()
			.map(|def| {
				let state = procs
					.get(&def.id)
					.map(|rs| rs.state.clone())
					.unwrap_or(ProcessState::Stopped);
				ProcessStatus {
					id: def.id.clone(),
					title: def.title.clone(),
					state,
					port: def.port,
					group: def.group.clone(),
				}
			})
			.collect()
	}

	/// Live port lookup for the rendering layer's "port in use" display.
	pub fn port_owner(&self, port: u16) -> Option<u32> {
		self.inspector.find_owner(port)
	}

	/// The current run's output capture for `id`.
	pub async fn output(&self, id: &str) -> Result<OutputCapture, String> {
		let procs = self.procs.read().await;
		procs
			.get(id)
			.map(|rs| rs.output.clone())
			.ok_or_else(|| format!("unknown process: {}", id))
	}

	/// Kill whatever currently owns the definition's configured port,
	/// without touching the definition's own state.
	pub fn kill_port(&self, id: &str) -> Result<String, String> {
		let def = match self.def(id) {
			Some(def) => def,
			None => return Err(format!("unknown process: {}", id)),
		};
		let port = match def.port {
			Some(port) => port,
			None => return Err(format!("{}: no port configured", id)),
		};
		match self.inspector.find_owner(port) {
			Some(pid) => match self.inspector.terminate(pid) {
				Ok(()) => Ok(format!("killed pid {} on port {}", pid, port)),
				Err(e) => Err(e.to_string()),
			},
			None => Ok(format!("port {} not in use", port)),
		}
	}

	fn def(&self, id: &str) -> Option<&ProcessDef> {
		self.defs.iter().find(|d| d.id == id)
	}

	fn group_members(&self, group: &str) -> Vec<String> {
		self.defs
			.iter()
			.filter(|d| d.group.as_deref() == Some(group))
			.map(|d| d.id.clone())
			.collect()
	}

	// Bulk starts run as independent tasks so one member's pending
	// confirm prompt never blocks the others.
	fn start_detached(self: &Arc<Self>, ids: Vec<String>) {
		for id in ids {
			let sup = Arc::clone(self);
			tokio::spawn(async move {
				if let Err(e) = sup.start(&id).await {
					tracing::warn!("{}", e);
				}
			});
		}
	}

	async fn confirm_kill(&self, id: &str, port: u16, owner: u32) -> bool {
		let tx = self.confirm.read().await.clone();
		let tx = match tx {
			Some(tx) => tx,
			None => {
				tracing::debug!("{}: port {} owned by pid {}, no prompt consumer", id, port, owner);
				return false;
			}
		};

		let (reply_tx, reply_rx) = oneshot::channel();
		let req = ConfirmRequest {
			id: id.to_string(),
			port,
			owner,
			reply: reply_tx,
		};
		if tx.send(req).await.is_err() {
			return false;
		}
		reply_rx.await.unwrap_or(false)
	}

	async fn transition(&self, id: &str, state: ProcessState) {
		{
			let mut procs = self.procs.write().await;
			if let Some(rs) = procs.get_mut(id) {
				rs.state = state;
			}
		}
		self.notify();
	}

	fn notify(&self) {
		let _ = self.changes.send(());
	}
}

fn spawn_process(def: &ProcessDef) -> Result<Child, String> {
	let mut cmd = Command::new("sh");
	cmd.args(["-c", &def.command])
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.process_group(0);

	if let Some(dir) = &def.cwd {
		cmd.current_dir(dir);
	}

	cmd.spawn().map_err(|e| format!("spawn failed: {}", e))
}

async fn watch_exit(
	supervisor: Arc<Supervisor>,
	id: String,
	mut child: Child,
	output: OutputCapture,
	mut cancel: watch::Receiver<bool>,
) {
	let status = tokio::select! {
		status = child.wait() => status,
		_ = cancel.changed() => {
			// stop() already signalled the group and updated state; reap only
			let _ = child.wait().await;
			return;
		}
	};

	if *cancel.borrow() {
		return;
	}

	match status {
		Ok(status) => match status.code() {
			Some(code) if code != 0 => {
				output
					.write(format!("[paddock] exited with code {}\n", code).as_bytes())
					.await;
				supervisor
					.transition(
						&id,
						ProcessState::Errored {
							message: format!("exited with code {}", code),
						},
					)
					.await;
			}
			Some(_) => {
				output.write(b"[paddock] exited with code 0\n").await;
				supervisor.transition(&id, ProcessState::Stopped).await;
			}
			None => {
				output.write(b"[paddock] terminated by signal\n").await;
				supervisor.transition(&id, ProcessState::Stopped).await;
			}
		},
		Err(e) => {
			output
				.write(format!("[paddock] wait error: {}\n", e).as_bytes())
				.await;
			supervisor
				.transition(&id, ProcessState::Errored { message: e.to_string() })
				.await;
		}
	}
}

async fn pipe_output<R: tokio::io::AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => output.write(&buf[..n]).await,
			Err(_) => break,
		}
	}
}

/// SIGTERM the whole process group now, SIGKILL whatever is left after
/// the grace period. Spawned children land in the same group because the
/// child is started with `process_group(0)`.
pub fn kill_process_tree(pid: u32) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;

	let pgid = Pid::from_raw(pid as i32);
	let _ = killpg(pgid, Signal::SIGTERM);
	tokio::spawn(async move {
		tokio::time::sleep(KILL_GRACE).await;
		let _ = killpg(pgid, Signal::SIGKILL);
	});
}
