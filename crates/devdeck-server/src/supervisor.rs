use std::collections::{HashMap, VecDeque};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, watch, RwLock};

use devdeck_core::protocol::ServerEvent;
use devdeck_core::types::{
	LogEntry, LogType, ServiceConfig, ServiceSnapshot, ServiceState, WebLink,
};

/// Grace period between SIGTERM and SIGKILL during a stop.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Settle delay between stop and start during a restart, so the OS can
/// release ports and other resources.
const RESTART_SETTLE: Duration = Duration::from_millis(500);

/// Owns the configured services, their runtime state, and all
/// start/stop/restart logic. Every state change is pushed through the
/// injected broadcast channel; the supervisor holds no subscriber state.
///
/// The service table lives behind a single `RwLock`, which serializes all
/// state transitions. Operations that wait on a process exit (`stop`) never
/// hold the lock while waiting; exit confirmation arrives over a per-start
/// watch channel from the monitor task that owns the child handle.
pub struct Supervisor {
	services: RwLock<HashMap<String, ManagedService>>,
	order: Vec<String>,
	max_log_lines: usize,
	events: broadcast::Sender<ServerEvent>,
}

struct ManagedService {
	def: ResolvedService,
	status: ServiceState,
	logs: VecDeque<LogEntry>,
	error_details: Option<String>,
	/// Pid of the live process; `None` when no process is attached.
	pid: Option<u32>,
	/// Fires once the monitor task has confirmed the current process's exit.
	exited: Option<watch::Receiver<bool>>,
}

#[derive(Clone)]
struct ResolvedService {
	id: String,
	name: String,
	command: Vec<String>,
	cwd: PathBuf,
	env: HashMap<String, String>,
	web_links: Vec<WebLink>,
}

impl Supervisor {
	pub fn new(
		configs: Vec<ServiceConfig>,
		max_log_lines: usize,
		default_cwd: Option<PathBuf>,
		events: broadcast::Sender<ServerEvent>,
	) -> Arc<Self> {
		let fallback_cwd =
			std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
		let mut order = Vec::with_capacity(configs.len());
		let mut services = HashMap::new();

		for config in configs {
			let cwd = config
				.cwd
				.clone()
				.or_else(|| default_cwd.clone())
				.unwrap_or_else(|| fallback_cwd.clone());
			order.push(config.id.clone());
			services.insert(
				config.id.clone(),
				ManagedService {
					def: ResolvedService {
						id: config.id,
						name: config.name,
						command: config.command,
						cwd,
						env: config.env,
						web_links: config.web_links,
					},
					status: ServiceState::Stopped,
					logs: VecDeque::new(),
					error_details: None,
					pid: None,
					exited: None,
				},
			);
		}

		Arc::new(Self {
			services: RwLock::new(services),
			order,
			max_log_lines,
			events,
		})
	}

	/// Snapshot of every service in configuration order. No side effects.
	pub async fn snapshots(&self) -> Vec<ServiceSnapshot> {
		let services = self.services.read().await;
		self.order
			.iter()
			.filter_map(|id| services.get(id))
			.map(snapshot_of)
			.collect()
	}

	pub async fn get(&self, service_id: &str) -> Option<ServiceSnapshot> {
		let services = self.services.read().await;
		services.get(service_id).map(snapshot_of)
	}

	pub async fn contains(&self, service_id: &str) -> bool {
		self.services.read().await.contains_key(service_id)
	}

	/// Starts a service. No-op with a logged warning if the id is unknown,
	/// a process is already attached, or the status is not stopped/error.
	pub async fn start(self: &Arc<Self>, service_id: &str) {
		let def = {
			let mut services = self.services.write().await;
			let Some(svc) = services.get_mut(service_id) else {
				tracing::warn!("unknown service: {}", service_id);
				return;
			};
			if svc.pid.is_some() || !svc.status.can_start() {
				tracing::warn!(
					"service {} is {}, cannot start",
					svc.def.name,
					svc.status
				);
				return;
			}
			tracing::info!("starting service: {}", svc.def.name);
			self.set_status(svc, ServiceState::Starting, None);
			self.push_log(
				svc,
				&format!("Attempting to start {}...", svc.def.name),
				LogType::System,
			);
			svc.def.clone()
		};

		let Some((program, args)) = def.command.split_first() else {
			self.fail_start(service_id, &def.name, "empty command").await;
			return;
		};

		let mut child = match Command::new(program)
			.args(args)
			.current_dir(&def.cwd)
			.envs(&def.env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
		{
			Ok(child) => child,
			Err(e) => {
				self.fail_start(service_id, &def.name, &e.to_string()).await;
				return;
			}
		};

		let pid = child.id();
		let (exit_tx, exit_rx) = watch::channel(false);

		{
			let mut services = self.services.write().await;
			if let Some(svc) = services.get_mut(service_id) {
				svc.pid = pid;
				svc.exited = Some(exit_rx);
				tracing::info!(
					"service {} started (pid {})",
					svc.def.name,
					pid.unwrap_or(0)
				);
				self.push_log(
					svc,
					&format!("{} started successfully.", svc.def.name),
					LogType::System,
				);
				self.set_status(svc, ServiceState::Running, None);
			}
		}

		if let Some(stdout) = child.stdout.take() {
			let sup = Arc::clone(self);
			let id = service_id.to_string();
			tokio::spawn(async move {
				sup.pipe_lines(&id, stdout, LogType::Stdout).await;
			});
		}
		if let Some(stderr) = child.stderr.take() {
			let sup = Arc::clone(self);
			let id = service_id.to_string();
			tokio::spawn(async move {
				sup.pipe_lines(&id, stderr, LogType::Stderr).await;
			});
		}

		let sup = Arc::clone(self);
		let id = service_id.to_string();
		tokio::spawn(async move {
			let result = child.wait().await;
			sup.handle_exit(&id, result).await;
			// Notify only after state has settled, so a pending stop()
			// resolves against the post-exit state.
			let _ = exit_tx.send(true);
		});
	}

	/// Stops a service and resolves once the exit is confirmed. Sends
	/// SIGTERM, escalates to SIGKILL after the grace period. No-op if no
	/// process is attached; re-broadcasts the current status when already
	/// stopped/stopping so a tardy subscriber catches up.
	pub async fn stop(self: &Arc<Self>, service_id: &str) {
		let (name, pid, exited) = {
			let mut services = self.services.write().await;
			let Some(svc) = services.get_mut(service_id) else {
				tracing::warn!("unknown service: {}", service_id);
				return;
			};
			let resting = matches!(
				svc.status,
				ServiceState::Stopped | ServiceState::Stopping
			);
			if svc.pid.is_none() || resting {
				if resting {
					let _ = self.events.send(ServerEvent::StatusUpdate {
						service_id: svc.def.id.clone(),
						status: svc.status,
						error_details: svc.error_details.clone(),
					});
				}
				return;
			}
			tracing::info!("stopping service: {}", svc.def.name);
			self.set_status(svc, ServiceState::Stopping, None);
			self.push_log(
				svc,
				&format!("Attempting to stop {}...", svc.def.name),
				LogType::System,
			);
			(svc.def.name.clone(), svc.pid, svc.exited.clone())
		};

		let (Some(pid), Some(mut exited)) = (pid, exited) else {
			return;
		};

		send_signal(pid, Signal::SIGTERM);

		let timed_out = tokio::select! {
			changed = exited.changed() => {
				let _ = changed;
				false
			}
			_ = tokio::time::sleep(STOP_GRACE) => true,
		};

		if timed_out {
			// The process may have exited and been cleared while the timer
			// was running; only escalate if this pid is still attached.
			let still_attached = {
				let mut services = self.services.write().await;
				match services.get_mut(service_id) {
					Some(svc) if svc.pid == Some(pid) => {
						tracing::warn!(
							"service {} did not stop gracefully with SIGTERM, sending SIGKILL",
							name
						);
						self.push_log(
							svc,
							&format!(
								"{} did not stop gracefully, forcing SIGKILL.",
								name
							),
							LogType::System,
						);
						true
					}
					_ => false,
				}
			};
			if still_attached {
				send_signal(pid, Signal::SIGKILL);
			}
			let _ = exited.changed().await;
		}
	}

	/// Restarts a service: stop, settle, start. Behaves as a plain start
	/// when no process is attached.
	pub async fn restart(self: &Arc<Self>, service_id: &str) {
		let should_stop = {
			let mut services = self.services.write().await;
			let Some(svc) = services.get_mut(service_id) else {
				tracing::warn!("unknown service: {}", service_id);
				return;
			};
			tracing::info!("restarting service: {}", svc.def.name);
			self.push_log(
				svc,
				&format!("Attempting to restart {}...", svc.def.name),
				LogType::System,
			);
			svc.pid.is_some()
				&& !matches!(
					svc.status,
					ServiceState::Stopped | ServiceState::Error
				)
		};

		if should_stop {
			self.stop(service_id).await;
			tokio::time::sleep(RESTART_SETTLE).await;
		}
		self.start(service_id).await;
	}

	/// Empties the log buffer and emits a dedicated `logs_cleared` event so
	/// subscribers reset their view instead of appending.
	pub async fn clear_logs(&self, service_id: &str) {
		let mut services = self.services.write().await;
		let Some(svc) = services.get_mut(service_id) else {
			tracing::warn!("unknown service: {}", service_id);
			return;
		};
		svc.logs.clear();
		tracing::info!("server-side logs cleared for service: {}", svc.def.name);
		self.push_log(svc, "Log buffer cleared by user.", LogType::System);
		let _ = self.events.send(ServerEvent::LogsCleared {
			service_id: svc.def.id.clone(),
		});
	}

	/// Concurrently stops every service that is running or starting. Used
	/// during shutdown; individual failures are logged, never propagated.
	pub async fn stop_all(self: &Arc<Self>) {
		let ids: Vec<String> = {
			let services = self.services.read().await;
			self.order
				.iter()
				.filter(|id| {
					services
						.get(*id)
						.map(|s| s.pid.is_some() && s.status.is_active())
						.unwrap_or(false)
				})
				.cloned()
				.collect()
		};

		let mut handles = Vec::with_capacity(ids.len());
		for id in ids {
			let sup = Arc::clone(self);
			handles.push(tokio::spawn(async move { sup.stop(&id).await }));
		}

		let mut failed = 0usize;
		for handle in handles {
			if handle.await.is_err() {
				failed += 1;
			}
		}
		if failed == 0 {
			tracing::info!("all services stopped");
		} else {
			tracing::error!("{} service(s) failed to stop during shutdown", failed);
		}
	}

	async fn fail_start(&self, service_id: &str, name: &str, err: &str) {
		tracing::error!("failed to start service {}: {}", name, err);
		let mut services = self.services.write().await;
		if let Some(svc) = services.get_mut(service_id) {
			self.push_log(
				svc,
				&format!("Error starting {}: {}", name, err),
				LogType::System,
			);
			self.set_status(svc, ServiceState::Error, Some(err.to_string()));
			svc.pid = None;
			svc.exited = None;
		}
	}

	async fn pipe_lines<R>(&self, service_id: &str, reader: R, log_type: LogType)
	where
		R: AsyncRead + Unpin,
	{
		let mut lines = BufReader::new(reader).lines();
		while let Ok(Some(line)) = lines.next_line().await {
			let mut services = self.services.write().await;
			if let Some(svc) = services.get_mut(service_id) {
				self.push_log(svc, &line, log_type);
			}
		}
	}

	async fn handle_exit(
		&self,
		service_id: &str,
		result: std::io::Result<ExitStatus>,
	) {
		let (code, signal) = match &result {
			Ok(status) => (status.code(), status.signal()),
			Err(e) => {
				tracing::error!("wait failed for service {}: {}", service_id, e);
				(None, None)
			}
		};

		let mut services = self.services.write().await;
		let Some(svc) = services.get_mut(service_id) else {
			return;
		};

		if svc.status == ServiceState::Stopping {
			// Intentional stop confirmed.
			tracing::info!("service {} confirmed stopped", svc.def.name);
			self.push_log(
				svc,
				&format!("{} confirmed stopped.", svc.def.name),
				LogType::System,
			);
			let details = svc.error_details.clone();
			self.set_status(svc, ServiceState::Stopped, details);
		} else {
			let (status, exit_type, details) = classify_exit(code, signal);
			let message = format!(
				"Service {} {} ({}).",
				svc.def.name,
				exit_type,
				describe_exit(code, signal)
			);
			if status == ServiceState::Stopped {
				tracing::info!("{}", message);
			} else {
				tracing::error!("{}", message);
			}
			self.push_log(svc, &message, LogType::System);
			self.set_status(svc, status, details);
		}

		svc.pid = None;
		svc.exited = None;
	}

	/// Single transition point: status and errorDetails always move
	/// together, and every transition is broadcast.
	fn set_status(
		&self,
		svc: &mut ManagedService,
		status: ServiceState,
		error_details: Option<String>,
	) {
		svc.status = status;
		svc.error_details = error_details.clone();
		let _ = self.events.send(ServerEvent::StatusUpdate {
			service_id: svc.def.id.clone(),
			status,
			error_details,
		});
	}

	fn push_log(&self, svc: &mut ManagedService, line: &str, log_type: LogType) {
		let entry = LogEntry {
			timestamp: now_millis(),
			line: strip_ansi(line),
			log_type,
		};
		svc.logs.push_back(entry.clone());
		if svc.logs.len() > self.max_log_lines {
			svc.logs.pop_front();
		}
		let _ = self.events.send(ServerEvent::Log {
			service_id: svc.def.id.clone(),
			line: entry.line,
			log_type,
			timestamp: entry.timestamp,
		});
	}
}

fn snapshot_of(svc: &ManagedService) -> ServiceSnapshot {
	ServiceSnapshot {
		id: svc.def.id.clone(),
		name: svc.def.name.clone(),
		status: svc.status,
		logs: svc.logs.iter().cloned().collect(),
		error_details: svc.error_details.clone(),
		web_links: svc.def.web_links.clone(),
	}
}

/// Classifies an unsolicited process exit into a status, a short phrase for
/// the system log, and error details.
///
/// Exit code 1 and other small codes are recoverable application errors;
/// signal deaths and codes >= 128 (conventionally 128+signal) are crashes.
/// SIGTERM/SIGINT from outside map to a plain stop rather than a crash.
fn classify_exit(
	code: Option<i32>,
	signal: Option<i32>,
) -> (ServiceState, &'static str, Option<String>) {
	if code == Some(0) {
		return (ServiceState::Stopped, "clean exit", None);
	}
	if let Some(sig) = signal {
		return match Signal::try_from(sig) {
			Ok(s @ (Signal::SIGTERM | Signal::SIGINT)) => (
				ServiceState::Stopped,
				"terminated by signal",
				Some(format!("Terminated by {}", s)),
			),
			Ok(Signal::SIGKILL) => (
				ServiceState::Crashed,
				"force killed",
				Some("Process was force killed (SIGKILL)".to_string()),
			),
			_ => (
				ServiceState::Crashed,
				"crashed",
				Some(format!("Process crashed with signal {}", signal_name(sig))),
			),
		};
	}
	match code {
		Some(1) => (
			ServiceState::Error,
			"error",
			Some("Exited with error code 1 (general error)".to_string()),
		),
		Some(c) if c >= 128 => (
			ServiceState::Crashed,
			"crashed",
			Some(format!("Process crashed with exit code {}", c)),
		),
		Some(c) if c > 0 => (
			ServiceState::Error,
			"error",
			Some(format!("Exited with error code {}", c)),
		),
		_ => (
			ServiceState::Error,
			"unexpected exit",
			Some(format!("Unexpected exit ({})", describe_exit(code, signal))),
		),
	}
}

fn describe_exit(code: Option<i32>, signal: Option<i32>) -> String {
	let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
	let signal = signal.map_or_else(|| "none".to_string(), signal_name);
	format!("code {}, signal {}", code, signal)
}

fn signal_name(sig: i32) -> String {
	match Signal::try_from(sig) {
		Ok(s) => s.to_string(),
		Err(_) => sig.to_string(),
	}
}

fn send_signal(pid: u32, signal: Signal) {
	let _ = kill(Pid::from_raw(pid as i32), signal);
}

fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

/// Removes ANSI escape sequences (CSI color/cursor codes, OSC titles) so the
/// stored line is plain text.
fn strip_ansi(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut chars = input.chars();
	while let Some(c) = chars.next() {
		if c != '\u{1b}' {
			out.push(c);
			continue;
		}
		match chars.clone().next() {
			Some('[') => {
				chars.next();
				// CSI: parameter/intermediate bytes, then one final byte
				// in 0x40..=0x7e.
				for c2 in chars.by_ref() {
					if ('\u{40}'..='\u{7e}').contains(&c2) {
						break;
					}
				}
			}
			Some(']') => {
				chars.next();
				// OSC: terminated by BEL or ESC-backslash.
				while let Some(c2) = chars.next() {
					if c2 == '\u{7}' {
						break;
					}
					if c2 == '\u{1b}' {
						chars.next();
						break;
					}
				}
			}
			Some(_) => {
				chars.next();
			}
			None => {}
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classify_clean_exit() {
		let (status, exit_type, details) = classify_exit(Some(0), None);
		assert_eq!(status, ServiceState::Stopped);
		assert_eq!(exit_type, "clean exit");
		assert!(details.is_none());
	}

	#[test]
	fn classify_sigterm_is_stopped() {
		let (status, _, details) = classify_exit(None, Some(Signal::SIGTERM as i32));
		assert_eq!(status, ServiceState::Stopped);
		assert_eq!(details.as_deref(), Some("Terminated by SIGTERM"));
	}

	#[test]
	fn classify_sigint_is_stopped() {
		let (status, _, details) = classify_exit(None, Some(Signal::SIGINT as i32));
		assert_eq!(status, ServiceState::Stopped);
		assert_eq!(details.as_deref(), Some("Terminated by SIGINT"));
	}

	#[test]
	fn classify_sigkill_is_crashed() {
		let (status, exit_type, details) =
			classify_exit(None, Some(Signal::SIGKILL as i32));
		assert_eq!(status, ServiceState::Crashed);
		assert_eq!(exit_type, "force killed");
		assert_eq!(details.as_deref(), Some("Process was force killed (SIGKILL)"));
	}

	#[test]
	fn classify_other_signal_is_crashed() {
		let (status, _, details) = classify_exit(None, Some(Signal::SIGSEGV as i32));
		assert_eq!(status, ServiceState::Crashed);
		assert_eq!(details.as_deref(), Some("Process crashed with signal SIGSEGV"));
	}

	#[test]
	fn classify_exit_code_one_is_general_error() {
		let (status, _, details) = classify_exit(Some(1), None);
		assert_eq!(status, ServiceState::Error);
		assert_eq!(
			details.as_deref(),
			Some("Exited with error code 1 (general error)")
		);
	}

	#[test]
	fn classify_high_exit_code_is_crashed() {
		let (status, _, details) = classify_exit(Some(137), None);
		assert_eq!(status, ServiceState::Crashed);
		assert_eq!(details.as_deref(), Some("Process crashed with exit code 137"));
	}

	#[test]
	fn classify_small_exit_code_is_error() {
		let (status, _, details) = classify_exit(Some(2), None);
		assert_eq!(status, ServiceState::Error);
		assert_eq!(details.as_deref(), Some("Exited with error code 2"));
	}

	#[test]
	fn classify_indeterminate_exit() {
		let (status, exit_type, details) = classify_exit(None, None);
		assert_eq!(status, ServiceState::Error);
		assert_eq!(exit_type, "unexpected exit");
		assert_eq!(
			details.as_deref(),
			Some("Unexpected exit (code none, signal none)")
		);
	}

	#[test]
	fn strip_ansi_removes_sgr_codes() {
		assert_eq!(strip_ansi("\u{1b}[31mred\u{1b}[0m plain"), "red plain");
		assert_eq!(strip_ansi("\u{1b}[1;32;40mbold\u{1b}[m"), "bold");
	}

	#[test]
	fn strip_ansi_removes_cursor_and_osc() {
		assert_eq!(strip_ansi("\u{1b}[2J\u{1b}[Hcleared"), "cleared");
		assert_eq!(strip_ansi("\u{1b}]0;title\u{7}body"), "body");
	}

	#[test]
	fn strip_ansi_leaves_plain_text() {
		assert_eq!(strip_ansi("hello [31m world"), "hello [31m world");
		assert_eq!(strip_ansi(""), "");
	}

	#[test]
	fn strip_ansi_handles_truncated_escape() {
		assert_eq!(strip_ansi("tail\u{1b}"), "tail");
		assert_eq!(strip_ansi("tail\u{1b}[31"), "tail");
	}
}
