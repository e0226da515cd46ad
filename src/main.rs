use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use remsync::callbacks::CallbackBuilder;
use remsync::config::Config;
use remsync::logging::init_tracing;
use remsync::types::{RuleSpec, SyncRule};
use remsync::SyncManager;

///////////////////////
// Utility functions //
///////////////////////

fn rule_args(cmd: Command, required: bool) -> Command {
	cmd.arg(
		Arg::new("host")
			.long("host")
			.value_name("HOST")
			.required(required)
			.help("SSH host identifier"),
	)
	.arg(
		Arg::new("remote")
			.long("remote")
			.value_name("PATH")
			.required(required)
			.help("Remote root directory"),
	)
	.arg(
		Arg::new("local")
			.long("local")
			.value_name("PATH")
			.required(required)
			.help("Local root directory"),
	)
	.arg(
		Arg::new("source")
			.long("source")
			.value_name("SIDE")
			.value_parser(["local", "remote"])
			.help("Authoritative side (default: local)"),
	)
	.arg(Arg::new("name").long("name").value_name("NAME").help("Display name"))
}

/// Overlay command-line values on top of an existing rule (or defaults)
fn rule_spec(matches: &ArgMatches, base: Option<&SyncRule>) -> RuleSpec {
	let pick = |key: &str, current: Option<&String>| -> String {
		matches
			.get_one::<String>(key)
			.or(current)
			.cloned()
			.unwrap_or_default()
	};
	let default_source = "local".to_string();
	let base_source = base.map(|r| r.source.to_string());

	RuleSpec {
		server_name: pick("name", base.map(|r| &r.server_name)),
		ssh_host: pick("host", base.map(|r| &r.ssh_host)),
		remote_path: pick("remote", base.map(|r| &r.remote_path)),
		local_path: pick("local", base.map(|r| &r.local_path)),
		source: pick("source", Some(base_source.as_ref().unwrap_or(&default_source))),
	}
}

fn print_rule(rule: &SyncRule) {
	println!(
		"{}  {:<7} {:<6} {} <-> {}:{}{}",
		rule.id,
		rule.status,
		rule.source,
		rule.local_path,
		rule.ssh_host,
		rule.remote_path,
		if rule.server_name.is_empty() { String::new() } else { format!("  ({})", rule.server_name) }
	);
	if !rule.last_sync.is_empty() {
		println!("    last sync: {}", rule.last_sync);
	}
}

fn load_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let mut config = Config::load(matches.get_one::<String>("config").map(PathBuf::from).as_deref())?;
	if let Some(dir) = matches.get_one::<String>("state-dir") {
		config.state_dir = PathBuf::from(dir);
	}
	if let Some(level) = matches.get_one::<String>("log-level") {
		config.log_level = level.clone();
	}
	Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("remsync")
		.version("0.1.0")
		.author("Szilard Hajba <szilard@symbion.hu>")
		.about("Continuous local <-> remote directory sync over SSH")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Config file"),
		)
		.arg(
			Arg::new("state-dir")
				.long("state-dir")
				.value_name("DIR")
				.global(true)
				.help("Directory holding sync-rules.json"),
		)
		.arg(
			Arg::new("log-level")
				.long("log-level")
				.value_name("LEVEL")
				.global(true)
				.help("trace, debug, info, warn or error"),
		)
		.subcommand(Command::new("list").about("List sync rules"))
		.subcommand(rule_args(Command::new("add").about("Add a sync rule"), true))
		.subcommand(rule_args(
			Command::new("update")
				.about("Update an inactive sync rule")
				.arg(Arg::new("id").required(true)),
			false,
		))
		.subcommand(
			Command::new("remove").about("Remove a sync rule").arg(Arg::new("id").required(true)),
		)
		.subcommand(
			Command::new("source")
				.about("Set the authoritative side of a rule")
				.arg(Arg::new("id").required(true))
				.arg(Arg::new("side").required(true).value_parser(["local", "remote"])),
		)
		.subcommand(
			Command::new("start")
				.about("Start rules and keep them in sync until interrupted")
				.arg(Arg::new("id").action(ArgAction::Append).num_args(0..))
				.arg(
					Arg::new("all")
						.long("all")
						.action(ArgAction::SetTrue)
						.help("Start every rule"),
				),
		)
		.subcommand(
			Command::new("test")
				.about("Test connectivity to a host")
				.arg(Arg::new("host").required(true)),
		)
		.subcommand(
			Command::new("deps")
				.about("Check which sync tools a host offers")
				.arg(Arg::new("host").required(true)),
		)
		.subcommand(Command::new("hosts").about("List configured hosts"))
		.get_matches();

	let config = load_config(&matches)?;
	init_tracing(&config.log_level);

	let events = CallbackBuilder::new()
		.on_status(|event| {
			let mut line = format!("[{}] {}", event.rule_id, event.status);
			if !event.detail.is_empty() {
				line.push_str(&format!(": {}", event.detail));
			}
			if !event.error.is_empty() {
				line.push_str(&format!(" ({})", event.error));
			}
			println!("{}", line);
		})
		.on_log(|entry| {
			let direction = entry.direction.map(|d| format!(" {}", d)).unwrap_or_default();
			let path =
				if entry.file_path.is_empty() { String::new() } else { format!(" {}", entry.file_path) };
			println!(
				"{} [{}] {}{}{} {}",
				entry.timestamp, entry.rule_id, entry.action, path, direction, entry.message
			);
		})
		.build();

	let manager = SyncManager::with_ssh(config, Arc::from(events))?;

	match matches.subcommand() {
		Some(("list", _)) => {
			for rule in manager.list_rules() {
				print_rule(&rule);
			}
		}
		Some(("add", sub)) => {
			let rule = manager.add_rule(rule_spec(sub, None))?;
			print_rule(&rule);
		}
		Some(("update", sub)) => {
			let id = sub.get_one::<String>("id").ok_or("update: rule id required")?;
			let current = manager.get_rule(id).ok_or_else(|| format!("sync rule not found: {}", id))?;
			let rule = manager.update_rule(id, rule_spec(sub, Some(&current)))?;
			print_rule(&rule);
		}
		Some(("remove", sub)) => {
			let id = sub.get_one::<String>("id").ok_or("remove: rule id required")?;
			manager.remove_rule(id).await?;
		}
		Some(("source", sub)) => {
			let id = sub.get_one::<String>("id").ok_or("source: rule id required")?;
			let side = sub.get_one::<String>("side").ok_or("source: side required")?;
			manager.set_source(id, side).await?;
		}
		Some(("start", sub)) => {
			let ids: Vec<String> = if sub.get_flag("all") {
				manager.list_rules().into_iter().map(|r| r.id).collect()
			} else {
				sub.get_many::<String>("id").map(|v| v.cloned().collect()).unwrap_or_default()
			};
			if ids.is_empty() {
				return Err("start: give rule ids or --all".into());
			}

			for id in &ids {
				if let Err(e) = manager.start(id).await {
					eprintln!("Failed to start {}: {}", id, e);
				}
			}

			tokio::signal::ctrl_c().await?;
			eprintln!("Interrupted, stopping...");
			manager.stop_all().await;
		}
		Some(("test", sub)) => {
			let host = sub.get_one::<String>("host").ok_or("test: host required")?;
			manager.test_connection(host).await?;
			println!("Connection to {} OK", host);
		}
		Some(("deps", sub)) => {
			let host = sub.get_one::<String>("host").ok_or("deps: host required")?;
			let deps = manager.check_remote_deps(host).await?;
			println!("mirror tool:     {}", if deps.has_mirror_tool { "yes" } else { "no" });
			if !deps.mirror_tool_version.is_empty() {
				println!("  version:       {}", deps.mirror_tool_version);
			}
			println!("streaming watch: {}", if deps.has_streaming_watch { "yes" } else { "no" });
			println!("{}", deps.message);
		}
		Some(("hosts", _)) => {
			for host in manager.hosts() {
				println!("{:<16} {}  port {}", host.host, host.destination(), host.port);
			}
		}
		_ => unreachable!("subcommand_required"),
	}

	Ok(())
}

// vim: ts=4
