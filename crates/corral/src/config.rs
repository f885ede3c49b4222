use paddock::ProcessDef;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_NAME: &str = "corral.toml";

// ── corral.toml format ───────────────────────────────────────────────────────
//
// Ordered [[process]] tables; the on-screen order is the file order.
//
//   [[process]]
//   id = "web"
//   title = "Web dev server"
//   run = "npm run dev"
//   dir = "web"
//   port = 5173
//   group = "frontend"

#[derive(Debug, Deserialize)]
struct ConfigFile {
	#[serde(default, rename = "process")]
	processes: Vec<ProcessEntry>,
}

#[derive(Debug, Deserialize)]
struct ProcessEntry {
	id: String,
	run: String,
	title: Option<String>,
	dir: Option<PathBuf>,
	port: Option<u16>,
	group: Option<String>,
}

pub fn load(path: &Path) -> Result<Vec<ProcessDef>, String> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
	parse(&content)
}

fn parse(content: &str) -> Result<Vec<ProcessDef>, String> {
	let file: ConfigFile =
		toml::from_str(content).map_err(|e| format!("invalid config: {}", e))?;

	let mut defs: Vec<ProcessDef> = Vec::new();
	for entry in file.processes {
		if entry.id.is_empty() || entry.run.is_empty() {
			eprintln!("warning: skipping process with an empty id or command");
			continue;
		}
		if defs.iter().any(|d| d.id == entry.id) {
			eprintln!("warning: duplicate process id '{}', keeping the first", entry.id);
			continue;
		}
		defs.push(ProcessDef {
			title: entry.title.unwrap_or_else(|| entry.id.clone()),
			id: entry.id,
			command: entry.run,
			cwd: entry.dir,
			port: entry.port,
			group: entry.group,
		});
	}
	Ok(defs)
}

pub fn log_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("CORRAL_LOG_DIR") {
		PathBuf::from(dir)
	} else {
		PathBuf::from(".corral").join("logs")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_keeps_file_order() {
		let defs = parse(
			r#"
			[[process]]
			id = "web"
			run = "npm run dev"
			port = 5173
			group = "frontend"

			[[process]]
			id = "api"
			run = "cargo run"

			[[process]]
			id = "db"
			run = "postgres -D data"
			"#,
		)
		.unwrap();

		let ids: Vec<&str> = defs.iter().map(|d| d.id.as_str()).collect();
		assert_eq!(ids, vec!["web", "api", "db"]);
	}

	#[test]
	fn parse_applies_defaults() {
		let defs = parse("[[process]]\nid = \"web\"\nrun = \"npm run dev\"\n").unwrap();
		assert_eq!(defs[0].title, "web");
		assert_eq!(defs[0].port, None);
		assert_eq!(defs[0].group, None);
		assert_eq!(defs[0].cwd, None);
	}

	#[test]
	fn parse_drops_duplicates() {
		let defs = parse(
			"[[process]]\nid = \"web\"\nrun = \"first\"\n[[process]]\nid = \"web\"\nrun = \"second\"\n",
		)
		.unwrap();
		assert_eq!(defs.len(), 1);
		assert_eq!(defs[0].command, "first");
	}

	#[test]
	fn parse_rejects_bad_toml() {
		assert!(parse("[[process]]\nid = ").is_err());
	}

	#[test]
	fn parse_rejects_missing_run() {
		assert!(parse("[[process]]\nid = \"web\"\n").is_err());
	}
}
