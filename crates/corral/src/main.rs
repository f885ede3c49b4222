mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use paddock::{
	ConfirmRequest, PortInspector, ProcessState, Supervisor, SupervisorConfig, SystemPorts,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();

	if args.is_empty() {
		print_usage();
		return;
	}

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("corral {}", env!("CARGO_PKG_VERSION")),
		"ls" | "list" => cmd_ls(&args[1..]),
		"logs" => cmd_logs(&args[1..]),
		"up" => cmd_up(&args[1..]).await,
		name => {
			eprintln!("unknown command: {}", name);
			eprintln!("run 'corral help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} — dev process supervisor", "corral".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [options]", "corral".bold());
	eprintln!();
	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {} [ids... | --group <name>]   Start processes and watch them", "up".bold());
	eprintln!("       {}                    also stream captured output", "--echo".bold());
	eprintln!("  {} [--json]                    List configured processes", "ls".bold());
	eprintln!("  {} <id>                      Print a process's last run log", "logs".bold());
	eprintln!();
	eprintln!("processes are read from {} in the current directory", config::CONFIG_NAME.bold());
}

fn load_defs_or_exit() -> Vec<paddock::ProcessDef> {
	let path = PathBuf::from(config::CONFIG_NAME);
	match config::load(&path) {
		Ok(defs) if defs.is_empty() => {
			eprintln!("no processes defined in {}", path.display());
			std::process::exit(1);
		}
		Ok(defs) => defs,
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(1);
		}
	}
}

// ── ls ───────────────────────────────────────────────────────────────────────

fn cmd_ls(args: &[String]) {
	let defs = load_defs_or_exit();

	if args.iter().any(|a| a == "--json") {
		match serde_json::to_string_pretty(&defs) {
			Ok(json) => println!("{}", json),
			Err(e) => {
				eprintln!("failed to serialize: {}", e);
				std::process::exit(1);
			}
		}
		return;
	}

	for def in &defs {
		let port = match def.port {
			Some(port) => {
				if SystemPorts.find_owner(port).is_some() {
					format!(":{} {}", port, "(in use)".yellow())
				} else {
					format!(":{}", port)
				}
			}
			None => String::new(),
		};
		let group = def
			.group
			.as_deref()
			.map(|g| format!("[{}]", g.cyan()))
			.unwrap_or_default();
		println!("  {:<16} {:<24} {} {}", def.id.bold(), def.title, port, group);
	}
}

// ── logs ─────────────────────────────────────────────────────────────────────

fn cmd_logs(args: &[String]) {
	let id = match args.first() {
		Some(id) => id,
		None => {
			eprintln!("usage: corral logs <id>");
			std::process::exit(1);
		}
	};

	let path = config::log_dir().join(format!("{}.log", id));
	match std::fs::read_to_string(&path) {
		Ok(content) => print!("{}", content),
		Err(_) => {
			eprintln!("no log for '{}' ({})", id, path.display());
			std::process::exit(1);
		}
	}
}

// ── up ───────────────────────────────────────────────────────────────────────

enum Target {
	All,
	Group(String),
	Ids(Vec<String>),
}

async fn cmd_up(args: &[String]) {
	tracing_subscriber::fmt().init();

	let echo = args.iter().any(|a| a == "--echo");
	let target = parse_target(args);
	let defs = load_defs_or_exit();
	let sup = Supervisor::new(defs, SupervisorConfig { log_dir: config::log_dir() });

	// port-conflict prompts are answered on stdin
	let (confirm_tx, confirm_rx) = mpsc::channel(8);
	sup.attach_confirm(confirm_tx).await;
	tokio::spawn(answer_prompts(confirm_rx));

	if echo {
		for def in sup.definitions() {
			let id = def.id.clone();
			if let Ok(capture) = sup.output(&id).await {
				tokio::spawn(echo_output(id, capture));
			}
		}
	}

	let mut changes = sup.subscribe_changes();

	match &target {
		Target::All => {
			let _ = sup.start_all().await;
		}
		Target::Group(group) => {
			if let Err(e) = sup.start_group(group).await {
				eprintln!("{}", e);
				std::process::exit(1);
			}
		}
		Target::Ids(ids) => {
			for id in ids {
				let sup = Arc::clone(&sup);
				let id = id.clone();
				tokio::spawn(async move {
					if let Err(e) = sup.start(&id).await {
						eprintln!("{}", e);
					}
				});
			}
		}
	}

	render(&sup).await;

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				eprintln!();
				let _ = sup.stop_all().await;
				// let SIGTERM land before the runtime tears everything down
				tokio::time::sleep(Duration::from_millis(300)).await;
				break;
			}
			recv = changes.recv() => {
				if matches!(recv, Err(broadcast::error::RecvError::Closed)) {
					break;
				}
				// collapse bursts of notifications into one redraw
				while changes.try_recv().is_ok() {}
				render(&sup).await;
			}
		}
	}
}

fn parse_target(args: &[String]) -> Target {
	let mut group: Option<String> = None;
	let mut ids: Vec<String> = Vec::new();

	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"--group" | "-g" => group = iter.next().cloned(),
			"--echo" => {}
			other => ids.push(other.to_string()),
		}
	}

	if let Some(group) = group {
		Target::Group(group)
	} else if ids.is_empty() {
		Target::All
	} else {
		Target::Ids(ids)
	}
}

async fn render(sup: &Supervisor) {
	println!();
	for status in sup.statuses().await {
		let port = status.port.map(|p| format!(":{}", p)).unwrap_or_default();
		match &status.state {
			ProcessState::Running { pid } => {
				println!(
					"  {} {:<16} {:<6} {} (pid {})",
					"●".green(),
					status.id,
					port,
					status.title.dimmed(),
					pid
				);
			}
			ProcessState::Errored { message } => {
				println!("  {} {:<16} {:<6} {}", "●".red(), status.id, port, message.red());
			}
			ProcessState::Stopped => {
				let busy = status.port.map(|p| sup.port_owner(p).is_some()).unwrap_or(false);
				if busy {
					println!(
						"  {} {:<16} {:<6} {}",
						"○".yellow(),
						status.id,
						port,
						"port in use".yellow()
					);
				} else {
					println!("  {} {:<16} {:<6} {}", "○".dimmed(), status.id, port, "stopped".dimmed());
				}
			}
		}
	}
}

async fn echo_output(id: String, capture: paddock::OutputCapture) {
	use tokio::sync::broadcast::error::RecvError;

	let mut rx = capture.subscribe();
	loop {
		match rx.recv().await {
			Ok(chunk) => {
				let text = String::from_utf8_lossy(&chunk);
				for line in text.lines() {
					println!("{} {}", format!("{} |", id).dimmed(), line);
				}
			}
			Err(RecvError::Lagged(_)) => continue,
			Err(RecvError::Closed) => break,
		}
	}
}

async fn answer_prompts(mut rx: mpsc::Receiver<ConfirmRequest>) {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	while let Some(req) = rx.recv().await {
		eprint!(
			"{} port {} is in use by pid {}. kill it? [y/N] ",
			req.id.bold(),
			req.port,
			req.owner
		);
		let answer = match lines.next_line().await {
			Ok(Some(line)) => {
				let line = line.trim();
				line.eq_ignore_ascii_case("y") || line.eq_ignore_ascii_case("yes")
			}
			_ => false,
		};
		let _ = req.reply.send(answer);
	}
}
