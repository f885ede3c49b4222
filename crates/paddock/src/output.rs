use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

const RING_CAPACITY: usize = 64 * 1024;

/// Captured output of a definition. Stdout and stderr both feed the same
/// capture, interleaved in arrival order: a bounded in-memory ring for
/// snapshots, a log file on disk, and a broadcast channel for live tailing.
///
/// The capture lives as long as its definition; [`reset`](Self::reset)
/// clears it at the start of each run, so subscribers stay attached across
/// restarts.
#[derive(Clone)]
pub struct OutputCapture {
	ring: Arc<Mutex<VecDeque<u8>>>,
	file: Arc<Mutex<Option<File>>>,
	sender: broadcast::Sender<Vec<u8>>,
}

impl OutputCapture {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(256);
		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
			file: Arc::new(Mutex::new(None)),
			sender,
		}
	}

	/// Begin a fresh run: empty the ring and point the capture at a
	/// truncated `<log_dir>/<id>.log`.
	pub async fn reset(&self, log_dir: &Path, id: &str) {
		let _ = fs::create_dir_all(log_dir);
		let path = log_dir.join(format!("{}.log", id));
		let file = OpenOptions::new()
			.create(true)
			.write(true)
			.truncate(true)
			.open(&path)
			.ok();

		self.ring.lock().await.clear();
		*self.file.lock().await = file;
	}

	pub async fn write(&self, data: &[u8]) {
		{
			let mut ring = self.ring.lock().await;
			for &byte in data {
				if ring.len() >= RING_CAPACITY {
					ring.pop_front();
				}
				ring.push_back(byte);
			}
		}

		{
			let mut file = self.file.lock().await;
			if let Some(ref mut f) = *file {
				let _ = f.write_all(data);
			}
		}

		let _ = self.sender.send(data.to_vec());
	}

	pub async fn snapshot(&self) -> Vec<u8> {
		let ring = self.ring.lock().await;
		ring.iter().copied().collect()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
		self.sender.subscribe()
	}
}

impl Default for OutputCapture {
	fn default() -> Self {
		Self::new()
	}
}
