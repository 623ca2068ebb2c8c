//! Command-line front end.
//!
//! Every subcommand resolves the auth state first and then drives the stores
//! of a single [`Console`]:
//! - `status` - Show server health and system information
//! - `setup`, `login`, `logout`, `whoami` - Session management
//! - `vms ...` - VM listing, lifecycle actions and live watch
//! - `configs ...` - Config template management

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::PathBuf;

use crate::api::{ConfigTemplate, Vm, VmAction};
use crate::store::spawn_poller;
use crate::Console;

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "vmctl")]
#[command(author, version, about = "Manage microVMs on a remote server", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "vmctl.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// API URL to connect to (overrides [server].api_url)
    #[arg(long, env = "VMCTL_API_URL")]
    pub api_url: Option<String>,

    /// Authentication token for this invocation only (not saved)
    #[arg(long, env = "VMCTL_TOKEN")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show server health and system information
    Status,

    /// Create the first admin account and log in with it
    Setup { username: String, password: String },

    /// Log in and save the session token
    Login { username: String, password: String },

    /// End the session and forget the saved token
    Logout,

    /// Show the logged-in user
    Whoami,

    /// VM management commands
    #[command(subcommand)]
    Vms(VmsCommands),

    /// Config template commands
    #[command(subcommand)]
    Configs(ConfigsCommands),
}

#[derive(Subcommand, Debug)]
pub enum VmsCommands {
    /// List all VMs
    List,
    /// Show details for a VM
    Show { id: String },
    /// Create a VM from a config template
    Create {
        name: String,
        /// Config template ID to copy the machine configuration from
        #[arg(long = "from-config")]
        from_config: String,
    },
    /// Start one or more VMs
    Start {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Force-stop one or more VMs
    Stop {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Ask one or more guests to shut down
    Shutdown {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete a VM
    Delete { id: String },
    /// Show the latest metrics for a VM
    Metrics { id: String },
    /// Keep the VM list on screen, refreshing periodically (Ctrl+C to stop)
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum ConfigsCommands {
    /// List all config templates
    List,
    /// Show a config template
    Show { id: String },
    /// Delete a config template
    Delete { id: String },
}

/// Run a CLI command against the console's stores
pub async fn run_command(console: &Console, command: &Commands) -> Result<()> {
    console.auth.init().await;

    match command {
        Commands::Status => cmd_status(console).await,
        Commands::Setup { username, password } => cmd_setup(console, username, password).await,
        Commands::Login { username, password } => cmd_login(console, username, password).await,
        Commands::Logout => cmd_logout(console).await,
        Commands::Whoami => cmd_whoami(console),
        Commands::Vms(sub) => {
            require_login(console)?;
            run_vms_command(console, sub).await
        }
        Commands::Configs(sub) => {
            require_login(console)?;
            run_configs_command(console, sub).await
        }
    }
}

async fn run_vms_command(console: &Console, command: &VmsCommands) -> Result<()> {
    match command {
        VmsCommands::List => cmd_vms_list(console).await,
        VmsCommands::Show { id } => cmd_vms_show(console, id).await,
        VmsCommands::Create { name, from_config } => {
            cmd_vms_create(console, name, from_config).await
        }
        VmsCommands::Start { ids } => cmd_vms_action(console, VmAction::Start, ids).await,
        VmsCommands::Stop { ids } => cmd_vms_action(console, VmAction::Stop, ids).await,
        VmsCommands::Shutdown { ids } => cmd_vms_action(console, VmAction::Shutdown, ids).await,
        VmsCommands::Delete { id } => cmd_vms_delete(console, id).await,
        VmsCommands::Metrics { id } => cmd_vms_metrics(console, id).await,
        VmsCommands::Watch => cmd_vms_watch(console).await,
    }
}

async fn run_configs_command(console: &Console, command: &ConfigsCommands) -> Result<()> {
    match command {
        ConfigsCommands::List => cmd_configs_list(console).await,
        ConfigsCommands::Show { id } => cmd_configs_show(console, id).await,
        ConfigsCommands::Delete { id } => cmd_configs_delete(console, id).await,
    }
}

// ============================================================================
// Session commands
// ============================================================================

async fn cmd_status(console: &Console) -> Result<()> {
    println!("Connecting to {}...", console.config.server.api_url);

    let health = console
        .api
        .health()
        .await
        .context("Failed to connect to server")?;
    let info = console.api.system_info().await.ok();

    println!();
    println!("=== Server Status ===");
    println!();
    let healthy = health.status.eq_ignore_ascii_case("healthy");
    println!("Version:    v{}", health.version);
    println!(
        "Status:     {} {}",
        if healthy { "[OK]" } else { "[!!]" },
        health.status
    );
    println!("Uptime:     {}", health.uptime);

    if !health.components.is_empty() {
        println!();
        println!("Components:");
        for (name, component) in &health.components {
            let ok = component.status.eq_ignore_ascii_case("healthy");
            let icon = if ok { "[OK]" } else { "[!!]" };
            match &component.message {
                Some(message) => println!("  {} {:18} {}", icon, name, message),
                None => println!("  {} {:18} {}", icon, name, component.status),
            }
        }
    }

    if let Some(info) = info {
        println!();
        println!("System:");
        println!("  Firecracker: {}", info.firecracker_version);
        println!("  Platform:    {}/{}", info.os, info.arch);
        println!("  CPUs:        {}", info.num_cpu);
        println!("  Memory:      {}", format_bytes(info.total_memory));
    }

    println!();
    let auth = console.auth.snapshot();
    match (&auth.user, auth.setup_required) {
        (_, true) => println!("Setup required. Run 'vmctl setup <username> <password>'."),
        (Some(user), _) => println!("Logged in as {}", user.username),
        (None, _) => println!("Not logged in."),
    }

    Ok(())
}

async fn cmd_setup(console: &Console, username: &str, password: &str) -> Result<()> {
    if !console.auth.setup(username, password).await {
        return Err(store_error(console.auth.snapshot().error, "Setup failed"));
    }
    println!("[OK] Admin account '{}' created and logged in.", username);
    Ok(())
}

async fn cmd_login(console: &Console, username: &str, password: &str) -> Result<()> {
    if !console.auth.login(username, password).await {
        return Err(store_error(console.auth.snapshot().error, "Login failed"));
    }
    println!("[OK] Logged in as {}.", username);
    Ok(())
}

async fn cmd_logout(console: &Console) -> Result<()> {
    console.auth.logout().await;
    println!("Logged out.");
    Ok(())
}

fn cmd_whoami(console: &Console) -> Result<()> {
    let state = console.auth.snapshot();
    let user = match state.user {
        Some(user) => user,
        None => anyhow::bail!("Not logged in."),
    };

    println!("Username:    {}", user.username);
    println!("ID:          {}", user.id);
    println!("Role:        {:?}", user.role);
    if let Some(last_login) = user.last_login_at {
        println!("Last login:  {}", last_login.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

// ============================================================================
// VM commands
// ============================================================================

async fn cmd_vms_list(console: &Console) -> Result<()> {
    console.vms.fetch().await;
    let state = console.vms.snapshot();
    if let Some(error) = state.error {
        anyhow::bail!(error);
    }

    if state.items.is_empty() {
        println!("No VMs found.");
        return Ok(());
    }

    print_vm_table(&state.items, Utc::now());
    Ok(())
}

async fn cmd_vms_show(console: &Console, id: &str) -> Result<()> {
    let vm = find_vm(console, id).await?;

    println!();
    println!("=== VM: {} ===", vm.name);
    println!();
    println!("ID:          {}", vm.id);
    println!("Status:      {}", vm.status);
    println!("CPUs:        {}", vm.config.cpus);
    println!("Memory:      {}", format_bytes(mib_to_bytes(vm.config.memory_mb)));
    println!("Kernel:      {}", vm.config.kernel_path);
    println!("Root drive:  {}", vm.config.root_drive.path);
    for drive in &vm.config.additional_drives {
        let mode = if drive.read_only { "ro" } else { "rw" };
        println!("Drive:       {} ({})", drive.path, mode);
    }
    for nic in &vm.config.network_interfaces {
        println!("Network:     {} {}", nic.device, nic.mac_address);
    }
    if let Some(pid) = vm.pid {
        println!("PID:         {}", pid);
    }
    if let Some(uptime) = uptime(&vm, Utc::now()) {
        println!("Uptime:      {}", format_duration(uptime));
    }
    if let Some(error) = &vm.error {
        println!("Error:       {}", error);
    }
    println!("Created:     {}", vm.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    Ok(())
}

async fn cmd_vms_create(console: &Console, name: &str, template_id: &str) -> Result<()> {
    let template = find_config(console, template_id).await?;

    let mut config = template.config;
    config.name = name.to_string();

    match console.vms.create(name, config).await {
        Some(vm) => {
            println!("[OK] Created VM {} ({}) from '{}'.", vm.name, vm.id, template.name);
            Ok(())
        }
        None => Err(store_error(console.vms.snapshot().error, "Create failed")),
    }
}

/// Run one action for every id concurrently, then report per id
async fn cmd_vms_action(console: &Console, action: VmAction, ids: &[String]) -> Result<()> {
    let outcomes = join_all(ids.iter().map(|id| async move {
        let ok = match action {
            VmAction::Start => console.vms.start(id).await,
            VmAction::Stop => console.vms.stop(id).await,
            VmAction::Shutdown => console.vms.shutdown(id).await,
        };
        (id, ok)
    }))
    .await;

    let mut failed = 0;
    for (id, ok) in &outcomes {
        if *ok {
            println!("[OK] {} {}", action, id);
        } else {
            failed += 1;
            println!("[!!] {} {}", action, id);
        }
    }

    if failed > 0 {
        // Concurrent failures overwrite each other; this is the last one
        return Err(store_error(
            console.vms.snapshot().error,
            &format!("{} of {} actions failed", failed, outcomes.len()),
        ));
    }
    Ok(())
}

async fn cmd_vms_delete(console: &Console, id: &str) -> Result<()> {
    if !console.vms.delete(id).await {
        return Err(store_error(console.vms.snapshot().error, "Delete failed"));
    }
    println!("[OK] Deleted VM {}.", id);
    Ok(())
}

async fn cmd_vms_metrics(console: &Console, id: &str) -> Result<()> {
    let metrics = console
        .vms
        .metrics(id)
        .await
        .with_context(|| format!("Failed to fetch metrics for VM {}", id))?;

    println!("CPU:         {:.1}%", metrics.cpu_usage);
    println!(
        "Memory:      {} / {}",
        format_bytes(metrics.memory_used.max(0) as u64),
        format_bytes(metrics.memory_total.max(0) as u64)
    );
    println!(
        "Disk:        {} read, {} written",
        format_bytes(metrics.disk_read.max(0) as u64),
        format_bytes(metrics.disk_write.max(0) as u64)
    );
    println!(
        "Network:     {} rx, {} tx",
        format_bytes(metrics.net_rx.max(0) as u64),
        format_bytes(metrics.net_tx.max(0) as u64)
    );
    println!("Sampled:     {}", metrics.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

async fn cmd_vms_watch(console: &Console) -> Result<()> {
    let mut rx = console.vms.subscribe();
    let poller = spawn_poller(console.vms.clone(), console.config.poll.interval_secs);

    println!(
        "Watching VMs every {}s (press Ctrl+C to stop)",
        console.config.poll.interval_secs.max(1)
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if state.loading {
                    continue;
                }
                println!();
                println!("--- {} ---", Utc::now().format("%H:%M:%S"));
                match state.error {
                    Some(error) => println!("[!!] {}", error),
                    None if state.items.is_empty() => println!("No VMs found."),
                    None => {
                        print_vm_table(&state.items, Utc::now());
                        if let Some(note) = transition_note(&state.items) {
                            println!("{}", note);
                        }
                    }
                }
            }
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    poller.abort();
    Ok(())
}

// ============================================================================
// Config template commands
// ============================================================================

async fn cmd_configs_list(console: &Console) -> Result<()> {
    console.configs.fetch().await;
    let state = console.configs.snapshot();
    if let Some(error) = state.error {
        anyhow::bail!(error);
    }

    if state.items.is_empty() {
        println!("No config templates found.");
        return Ok(());
    }

    println!();
    println!(
        "{:<36}  {:<20}  {:<5}  {:<10}  {:<30}",
        "ID", "NAME", "CPUS", "MEMORY", "DESCRIPTION"
    );
    println!("{}", "-".repeat(110));
    for template in &state.items {
        println!(
            "{:<36}  {:<20}  {:<5}  {:<10}  {:<30}",
            template.id,
            truncate(&template.name, 20),
            template.config.cpus,
            format_bytes(mib_to_bytes(template.config.memory_mb)),
            truncate(template.description.as_deref().unwrap_or("-"), 30)
        );
    }
    println!();
    Ok(())
}

async fn cmd_configs_show(console: &Console, id: &str) -> Result<()> {
    let template = find_config(console, id).await?;
    let config = serde_json::to_string_pretty(&template.config)
        .context("Failed to render config template")?;

    println!();
    println!("=== Config: {} ===", template.name);
    println!();
    println!("ID:          {}", template.id);
    if let Some(description) = &template.description {
        println!("Description: {}", description);
    }
    println!("Updated:     {}", template.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    println!("{}", config);
    Ok(())
}

async fn cmd_configs_delete(console: &Console, id: &str) -> Result<()> {
    if !console.configs.delete(id).await {
        return Err(store_error(console.configs.snapshot().error, "Delete failed"));
    }
    println!("[OK] Deleted config template {}.", id);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn require_login(console: &Console) -> Result<()> {
    let state = console.auth.snapshot();
    if state.setup_required {
        anyhow::bail!("Server has no admin account yet. Run 'vmctl setup <username> <password>'.");
    }
    if !state.is_authenticated() {
        anyhow::bail!("Authentication required. Run 'vmctl login' or set VMCTL_TOKEN.");
    }
    Ok(())
}

/// Turn the error a store recorded into a command failure
fn store_error(error: Option<String>, fallback: &str) -> anyhow::Error {
    anyhow::anyhow!(error.unwrap_or_else(|| fallback.to_string()))
}

/// Find a VM by exact ID, falling back to a name match (case-insensitive)
/// in a fresh listing
async fn find_vm(console: &Console, identifier: &str) -> Result<Vm> {
    match console.api.get_vm(identifier).await {
        Ok(vm) => return Ok(vm),
        Err(e) if e.status() == Some(404) => {}
        Err(e) => return Err(e).context("Failed to fetch VM"),
    }

    console.vms.fetch().await;
    let state = console.vms.snapshot();
    if let Some(error) = state.error {
        anyhow::bail!(error);
    }

    find_by_id_or_name(&state.items, identifier, |vm| (&vm.id, &vm.name))
        .with_context(|| format!("VM not found: {}", identifier))
}

async fn find_config(console: &Console, identifier: &str) -> Result<ConfigTemplate> {
    match console.api.get_config(identifier).await {
        Ok(template) => return Ok(template),
        Err(e) if e.status() == Some(404) => {}
        Err(e) => return Err(e).context("Failed to fetch config template"),
    }

    console.configs.fetch().await;
    let state = console.configs.snapshot();
    if let Some(error) = state.error {
        anyhow::bail!(error);
    }

    find_by_id_or_name(&state.items, identifier, |t| (&t.id, &t.name))
        .with_context(|| format!("Config template not found: {}", identifier))
}

fn find_by_id_or_name<T: Clone>(
    items: &[T],
    identifier: &str,
    key: impl Fn(&T) -> (&String, &String),
) -> Option<T> {
    items
        .iter()
        .find(|item| key(item).0 == identifier)
        .or_else(|| {
            items
                .iter()
                .find(|item| key(item).1.eq_ignore_ascii_case(identifier))
        })
        .cloned()
}

fn print_vm_table(vms: &[Vm], now: DateTime<Utc>) {
    println!();
    println!(
        "{:<36}  {:<20}  {:<10}  {:<5}  {:<10}  {:<12}",
        "ID", "NAME", "STATUS", "CPUS", "MEMORY", "UPTIME"
    );
    println!("{}", "-".repeat(104));

    for vm in vms {
        let uptime = uptime(vm, now)
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36}  {:<20}  {:<10}  {:<5}  {:<10}  {:<12}",
            vm.id,
            truncate(&vm.name, 20),
            vm.status.as_str(),
            vm.config.cpus,
            format_bytes(mib_to_bytes(vm.config.memory_mb)),
            uptime
        );
    }
    println!();
}

/// Footer for the watch view while the server is still moving VMs
fn transition_note(vms: &[Vm]) -> Option<String> {
    let moving: Vec<&str> = vms
        .iter()
        .filter(|vm| vm.status.is_transitioning())
        .map(|vm| vm.name.as_str())
        .collect();
    if moving.is_empty() {
        return None;
    }
    Some(format!("Changing state: {}", moving.join(", ")))
}

/// Seconds since the VM started, while it has not stopped since
fn uptime(vm: &Vm, now: DateTime<Utc>) -> Option<u64> {
    let started = vm.started_at?;
    if vm.stopped_at.is_some_and(|stopped| stopped >= started) {
        return None;
    }
    Some((now - started).num_seconds().max(0) as u64)
}

fn mib_to_bytes(mb: i64) -> u64 {
    (mb.max(0) as u64).saturating_mul(1024 * 1024)
}

/// Format bytes to human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration to human-readable string
fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate a string to max length (in characters) with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
