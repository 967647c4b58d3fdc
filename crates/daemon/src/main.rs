//! Warden Daemon
//!
//! FTPS listener front with live user-directory reconciliation, plus the
//! operator commands that edit the directory it reconciles from.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::ipc::{
    get_daemon_pid, get_pid_file_path, get_socket_path, is_daemon_running, serve_ipc,
    write_pid_file, IpcClient, IpcResponse, IpcServer, IpcSessionInfo,
};
use daemon::orchestrator::{DaemonOrchestrator, OrchestratorEvent};
use directory::{
    CredentialStore, HomeDirectory, JsonFileStore, PermissionCatalog, UserDirectory, UserEdit,
    UserRecord,
};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;

/// Warden - FTPS listener with a live user directory.
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to a daily rolling file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the listener in the foreground
    Start {
        /// Serve plain TCP instead of implicit TLS
        #[arg(long)]
        insecure: bool,
    },

    /// Stop the running daemon
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,

        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show daemon status
    Status,

    /// List authenticated sessions of the running daemon
    Sessions {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage the user directory
    #[command(subcommand)]
    Users(UsersCommands),

    /// Manage named permission sets
    #[command(subcommand)]
    Sets(SetsCommands),
}

/// Subcommands for user management.
#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommands {
    /// Add a user
    Add {
        /// Login name
        username: String,

        /// Password (read from stdin when omitted)
        #[arg(long, short)]
        password: Option<String>,

        /// Home directory: `local`, `~sub/dir` or a path
        #[arg(long, default_value = "local")]
        home: String,

        /// Capability letters, a preset or `<set name>`
        #[arg(long, default_value = "read-only")]
        permissions: String,
    },

    /// Remove a user
    Remove {
        /// Login name
        username: String,
    },

    /// Edit a user
    Edit {
        /// Login name
        username: String,

        /// New password
        #[arg(long, short)]
        password: Option<String>,

        /// New home directory
        #[arg(long)]
        home: Option<String>,

        /// New permissions
        #[arg(long)]
        permissions: Option<String>,

        /// New login name
        #[arg(long)]
        rename: Option<String>,
    },

    /// List users
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Subcommands for permission set management.
#[derive(Subcommand, Debug, Clone)]
pub enum SetsCommands {
    /// Save a permission set, replacing one with the same name
    Add {
        /// Set name, referenced as `<name>`
        name: String,

        /// Capability letters or a preset
        permissions: String,

        /// What the set is for
        #[arg(long, short)]
        description: String,
    },

    /// Remove a permission set
    Remove {
        /// Set name
        name: String,
    },

    /// List permission sets
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let _log_guard = init_tracing(level, cli.log_file.as_deref())?;

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    // Handle commands
    match cli.command {
        Commands::Start { insecure } => {
            // Check for existing daemon BEFORE starting
            if is_daemon_running() {
                let pid = get_daemon_pid().unwrap_or(0);
                eprintln!("Error: Daemon already running (PID: {})", pid);
                eprintln!();
                eprintln!("To stop the existing daemon, run:");
                eprintln!("  warden stop");
                std::process::exit(1);
            }

            if insecure {
                config.listener.secure = false;
            }

            let orchestrator = DaemonOrchestrator::new(config)?;
            run_headless(orchestrator).await?;
        }
        Commands::Stop { force, timeout } => {
            tracing::debug!("Stopping daemon (force: {})", force);

            let result = if force {
                force_stop_daemon().map(|()| "Daemon forcefully terminated")
            } else {
                graceful_stop_daemon(timeout)
                    .await
                    .map(|()| "Daemon stopped successfully")
            };

            match result {
                Ok(message) => println!("{}", message),
                Err(e) => {
                    eprintln!("Failed to stop daemon: {}", e);
                    if !force {
                        eprintln!("Try: warden stop --force");
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => match query_daemon_status().await {
            Ok(status) => print_status(&status),
            Err(e) => {
                eprintln!("Daemon is not running: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Sessions { json } => match query_sessions_list().await {
            Ok(sessions) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&sessions)?);
                } else {
                    print_sessions_table(&sessions);
                }
            }
            Err(e) => {
                eprintln!("Failed to list sessions: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Users(cmd) => run_users_command(&config, cmd)?,
        Commands::Sets(cmd) => run_sets_command(&config, cmd)?,
    }

    Ok(())
}

/// Installs the global subscriber.
///
/// With a log file the output goes through a non-blocking daily rolling
/// appender; the returned guard must live until exit to flush it.
fn init_tracing(level: &str, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_file) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", log_file.display()))?;
    std::fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

/// Opens the credential store named by the configuration.
fn open_store(config: &Config) -> Arc<dyn CredentialStore> {
    let path = config.store_path();
    tracing::debug!(path = %path.display(), "Using credential store");
    Arc::new(JsonFileStore::new(path))
}

fn run_users_command(config: &Config, cmd: UsersCommands) -> anyhow::Result<()> {
    let store = open_store(config);
    let users = UserDirectory::new(Arc::clone(&store));
    let catalog = PermissionCatalog::new(store);
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;

    match cmd {
        UsersCommands::Add {
            username,
            password,
            home,
            permissions,
        } => {
            let password = match password {
                Some(password) => password,
                None => read_password_from_stdin()?,
            };
            let home = HomeDirectory::from_input(&home, &cwd)?;
            let permissions = catalog.resolve(&permissions)?;
            let record = users.add_user(&username, &password, home, permissions)?;
            println!(
                "User {} added ({}, home {})",
                record.username, record.permissions, record.home_dir
            );
        }
        UsersCommands::Remove { username } => {
            let record = users.remove_user(&username)?;
            println!("User {} removed", record.username);
        }
        UsersCommands::Edit {
            username,
            password,
            home,
            permissions,
            rename,
        } => {
            let edit = UserEdit {
                password,
                home_dir: home
                    .map(|home| HomeDirectory::from_input(&home, &cwd))
                    .transpose()?,
                permissions: permissions
                    .map(|token| catalog.resolve(&token))
                    .transpose()?,
                rename,
            };
            if edit.is_empty() {
                anyhow::bail!("Nothing to change: pass at least one of --password, --home, --permissions, --rename");
            }
            let record = users.edit_user(&username, edit)?;
            println!(
                "User {} updated ({}, home {})",
                record.username, record.permissions, record.home_dir
            );
        }
        UsersCommands::List { json } => {
            let records = users.list_users()?;
            if json {
                let listing: Vec<_> = records
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "username": r.username,
                            "home_dir": r.home_dir.to_string(),
                            "permissions": r.permissions.to_string(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                print_users_table(&records);
            }
        }
    }
    Ok(())
}

fn run_sets_command(config: &Config, cmd: SetsCommands) -> anyhow::Result<()> {
    let catalog = PermissionCatalog::new(open_store(config));

    match cmd {
        SetsCommands::Add {
            name,
            permissions,
            description,
        } => {
            let set = catalog.save(&name, &description, &permissions)?;
            println!("Permission set <{}> saved ({})", set.name, set.permissions);
        }
        SetsCommands::Remove { name } => {
            let set = catalog.remove(&name)?;
            println!("Permission set <{}> removed", set.name);
        }
        SetsCommands::List => {
            let sets = catalog.list()?;
            if sets.is_empty() {
                println!("No permission sets.");
            }
            for set in sets.values() {
                println!("<{}> {} - {}", set.name, set.permissions, set.description);
                for line in set.permissions.describe() {
                    println!("    {}", line);
                }
            }
        }
    }
    Ok(())
}

fn read_password_from_stdin() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Print users in a formatted ASCII table.
fn print_users_table(users: &[UserRecord]) {
    if users.is_empty() {
        println!("No users.");
        return;
    }

    let name_width = users
        .iter()
        .map(|u| u.username.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!(
        "{:<name_width$}  {:<11}  HOME",
        "USERNAME",
        "PERMISSIONS",
        name_width = name_width
    );
    println!("{}", "-".repeat(name_width + 19));

    for user in users {
        println!(
            "{:<name_width$}  {:<11}  {}",
            user.username,
            user.permissions.to_string(),
            user.home_dir,
            name_width = name_width
        );
    }

    println!();
    println!("Total: {} user(s)", users.len());
}

/// Status information returned from the daemon.
struct DaemonStatus {
    running: bool,
    uptime_secs: u64,
    port: Option<u16>,
    user_count: usize,
    session_count: usize,
    connection_count: usize,
}

fn print_status(status: &DaemonStatus) {
    println!(
        "Daemon Status: {}",
        if status.running { "running" } else { "stopped" }
    );
    if let Some(port) = status.port {
        println!("  Port:        {}", port);
    }
    println!("  Uptime:      {}", format_duration(status.uptime_secs));
    println!("  Users:       {}", status.user_count);
    println!("  Sessions:    {}", status.session_count);
    println!("  Connections: {}", status.connection_count);
}

/// Connects to the running daemon's control socket.
async fn connect_daemon() -> anyhow::Result<IpcClient> {
    let socket_path = get_socket_path();
    IpcClient::connect_with_timeout(&socket_path, Duration::from_secs(5))
        .await
        .map_err(|_| anyhow::anyhow!("Daemon is not running (cannot connect to socket)"))
}

/// Query the daemon status via IPC.
async fn query_daemon_status() -> anyhow::Result<DaemonStatus> {
    let mut client = connect_daemon().await?;

    let response = client
        .status()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query status: {}", e))?;

    match response {
        IpcResponse::Status {
            running,
            uptime_secs,
            port,
            user_count,
            session_count,
            connection_count,
        } => Ok(DaemonStatus {
            running,
            uptime_secs,
            port,
            user_count,
            session_count,
            connection_count,
        }),
        IpcResponse::Error { message } => {
            anyhow::bail!("Daemon returned error: {}", message)
        }
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Query the list of authenticated sessions from the daemon.
async fn query_sessions_list() -> anyhow::Result<Vec<IpcSessionInfo>> {
    let mut client = connect_daemon().await?;

    let response = client
        .list_sessions()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query sessions: {}", e))?;

    match response {
        IpcResponse::Sessions { sessions } => Ok(sessions),
        IpcResponse::Error { message } => {
            anyhow::bail!("Daemon returned error: {}", message)
        }
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Print sessions in a formatted ASCII table.
fn print_sessions_table(sessions: &[IpcSessionInfo]) {
    if sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    let name_width = sessions
        .iter()
        .map(|s| s.username.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!(
        "{:<name_width$}  {:>12}",
        "USERNAME",
        "CONNECTED",
        name_width = name_width
    );
    println!("{}", "-".repeat(name_width + 14));

    for session in sessions {
        println!(
            "{:<name_width$}  {:>12}",
            truncate_str(&session.username, name_width),
            format_relative_time(session.connected_at),
            name_width = name_width
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());

    let elapsed = now.saturating_sub(timestamp);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Gracefully stop the daemon via IPC.
///
/// Sends a shutdown request and waits for the control socket to go away.
async fn graceful_stop_daemon(timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = get_socket_path();
    let mut client = connect_daemon().await?;

    println!("Sending shutdown request...");

    client.set_timeout(Duration::from_secs(timeout_secs));
    let response = client
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send stop request: {}", e))?;

    match response {
        IpcResponse::Stopping => {
            println!("Shutdown acknowledged, waiting for daemon to exit...");
        }
        IpcResponse::Error { message } => {
            anyhow::bail!("Daemon returned error: {}", message);
        }
        _ => {
            anyhow::bail!("Unexpected response from daemon");
        }
    }

    // Wait for daemon to actually exit by polling the socket
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }

        if IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Err(anyhow::anyhow!(
        "Timeout waiting for daemon to exit ({}s)",
        timeout_secs
    ))
}

/// Force stop the daemon using SIGKILL.
///
/// Reads the daemon PID from the PID file and sends SIGKILL.
fn force_stop_daemon() -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid_path = get_pid_file_path();

    if !pid_path.exists() {
        anyhow::bail!("Daemon PID file not found - is the daemon running?");
    }

    let pid_str = std::fs::read_to_string(&pid_path)
        .map_err(|e| anyhow::anyhow!("Failed to read PID file: {}", e))?;
    let pid: i32 = pid_str
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid PID in file: {}", e))?;

    kill(Pid::from_raw(pid), Signal::SIGKILL)
        .map_err(|e| anyhow::anyhow!("Failed to kill daemon (PID {}): {}", pid, e))?;

    println!("Sent SIGKILL to daemon (PID {})", pid);

    // A killed daemon cannot clean up after itself
    let _ = std::fs::remove_file(&pid_path);
    let _ = std::fs::remove_file(get_socket_path());

    Ok(())
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Run the daemon in the foreground until a signal or an IPC stop request.
async fn run_headless(mut orchestrator: DaemonOrchestrator) -> anyhow::Result<()> {
    let mut events = orchestrator.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::UserLoggedIn { username } => {
                    tracing::debug!(username = %username, "Login event");
                }
                OrchestratorEvent::UserLoggedOut { username } => {
                    tracing::debug!(username = %username, "Logout event");
                }
                OrchestratorEvent::Reconciled(result) => {
                    tracing::debug!(
                        added = result.added.len(),
                        removed = result.removed.len(),
                        updated = result.updated.len(),
                        skipped = result.skipped.len(),
                        "Reconciliation pass applied"
                    );
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    orchestrator.start().await?;
    let orchestrator = Arc::new(orchestrator);

    let _pid_guard = write_pid_file(&get_pid_file_path())
        .map_err(|e| tracing::warn!("Failed to write PID file: {}", e))
        .ok();

    let stop = CancellationToken::new();
    let ipc_task = match IpcServer::bind(&get_socket_path()).await {
        Ok(server) => Some(tokio::spawn(serve_ipc(
            server,
            Arc::clone(&orchestrator),
            stop.clone(),
        ))),
        Err(e) => {
            tracing::warn!("IPC socket unavailable, stop the daemon with a signal: {}", e);
            None
        }
    };

    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result.context("Failed to install signal handlers")?;
        }
        _ = stop.cancelled() => {}
    }

    stop.cancel();
    orchestrator.stop().await?;
    if let Some(task) = ipc_task {
        let _ = task.await;
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["warden", "start"]).unwrap();
        assert!(matches!(cli.command, Commands::Start { insecure: false }));
    }

    #[test]
    fn test_start_insecure() {
        let cli = Cli::try_parse_from(["warden", "start", "--insecure"]).unwrap();
        assert!(matches!(cli.command, Commands::Start { insecure: true }));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "warden",
            "status",
            "-v",
            "--config",
            "/etc/warden.toml",
            "--log-file",
            "/var/log/warden/warden.log",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/warden.toml")));
        assert_eq!(cli.log_file, Some(PathBuf::from("/var/log/warden/warden.log")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_stop_command() {
        let cli = Cli::try_parse_from(["warden", "stop"]).unwrap();
        match cli.command {
            Commands::Stop { force, timeout } => {
                assert!(!force);
                assert_eq!(timeout, 30);
            }
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_stop_with_force_and_timeout() {
        let cli = Cli::try_parse_from(["warden", "stop", "-f", "--timeout", "10"]).unwrap();
        match cli.command {
            Commands::Stop { force, timeout } => {
                assert!(force);
                assert_eq!(timeout, 10);
            }
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_sessions_json() {
        let cli = Cli::try_parse_from(["warden", "sessions", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Sessions { json: true }));
    }

    #[test]
    fn test_users_add_defaults() {
        let cli = Cli::try_parse_from(["warden", "users", "add", "alice", "-p", "secret1"]).unwrap();
        match cli.command {
            Commands::Users(UsersCommands::Add {
                username,
                password,
                home,
                permissions,
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(password.as_deref(), Some("secret1"));
                assert_eq!(home, "local");
                assert_eq!(permissions, "read-only");
            }
            _ => panic!("Expected Users Add command"),
        }
    }

    #[test]
    fn test_users_add_with_set_reference() {
        let cli = Cli::try_parse_from([
            "warden",
            "users",
            "add",
            "bob",
            "--home",
            "~shared/bob",
            "--permissions",
            "<editors>",
        ])
        .unwrap();
        match cli.command {
            Commands::Users(UsersCommands::Add {
                password,
                home,
                permissions,
                ..
            }) => {
                assert!(password.is_none());
                assert_eq!(home, "~shared/bob");
                assert_eq!(permissions, "<editors>");
            }
            _ => panic!("Expected Users Add command"),
        }
    }

    #[test]
    fn test_users_edit() {
        let cli = Cli::try_parse_from([
            "warden",
            "users",
            "edit",
            "bob",
            "--permissions",
            "elradfmw",
            "--rename",
            "robert",
        ])
        .unwrap();
        match cli.command {
            Commands::Users(UsersCommands::Edit {
                username,
                password,
                home,
                permissions,
                rename,
            }) => {
                assert_eq!(username, "bob");
                assert!(password.is_none());
                assert!(home.is_none());
                assert_eq!(permissions.as_deref(), Some("elradfmw"));
                assert_eq!(rename.as_deref(), Some("robert"));
            }
            _ => panic!("Expected Users Edit command"),
        }
    }

    #[test]
    fn test_users_remove_and_list() {
        let cli = Cli::try_parse_from(["warden", "users", "remove", "alice"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Users(UsersCommands::Remove { ref username }) if username == "alice"
        ));

        let cli = Cli::try_parse_from(["warden", "users", "list", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Users(UsersCommands::List { json: true })
        ));
    }

    #[test]
    fn test_sets_add_requires_description() {
        assert!(Cli::try_parse_from(["warden", "sets", "add", "editors", "elradfmw"]).is_err());

        let cli = Cli::try_parse_from([
            "warden",
            "sets",
            "add",
            "editors",
            "read-write",
            "-d",
            "upload and manage files",
        ])
        .unwrap();
        match cli.command {
            Commands::Sets(SetsCommands::Add {
                name,
                permissions,
                description,
            }) => {
                assert_eq!(name, "editors");
                assert_eq!(permissions, "read-write");
                assert_eq!(description, "upload and manage files");
            }
            _ => panic!("Expected Sets Add command"),
        }
    }

    #[test]
    fn test_sets_remove_and_list() {
        let cli = Cli::try_parse_from(["warden", "sets", "remove", "editors"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sets(SetsCommands::Remove { ref name }) if name == "editors"
        ));

        let cli = Cli::try_parse_from(["warden", "sets", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::Sets(SetsCommands::List)));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["warden", "pair"]).is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("carol", 8), "carol");
        assert_eq!(truncate_str("a-very-long-username", 10), "a-very-...");
    }

    #[test]
    fn test_format_relative_time() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(format_relative_time(now - 120), "2m ago");
        assert_eq!(format_relative_time(now - 7200), "2h ago");
        assert_eq!(format_relative_time(now + 50), "0s ago");
    }
}
