//! Wire types exchanged with the VM server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
    #[serde(other)]
    Unknown,
}

/// Account snapshot returned by the server. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthStatus {
    #[serde(default)]
    pub setup_required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupResponse {
    #[serde(default)]
    pub success: bool,
    pub user: Option<User>,
}

// ============================================================================
// VMs
// ============================================================================

/// Lifecycle status as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Stopped => "stopped",
            VmStatus::Starting => "starting",
            VmStatus::Running => "running",
            VmStatus::Stopping => "stopping",
            VmStatus::Error => "error",
        }
    }

    /// Whether the server is still moving the VM between states
    pub fn is_transitioning(&self) -> bool {
        matches!(self, VmStatus::Starting | VmStatus::Stopping)
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub id: String,
    pub name: String,
    pub status: VmStatus,
    pub config: VmConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<VmMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

/// Immutable machine configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmConfig {
    pub name: String,
    pub kernel_path: String,
    #[serde(default)]
    pub kernel_opts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd_path: Option<String>,
    pub root_drive: Drive,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_drives: Vec<Drive>,
    pub cpus: i64,
    pub memory_mb: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_template: Option<String>,
    #[serde(default)]
    pub disable_smt: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<Nic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vsock_devices: Vec<Vsock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jailer: Option<JailerConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "Info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nic {
    pub device: String,
    pub mac_address: String,
    #[serde(default)]
    pub allow_mmds: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vsock {
    pub path: String,
    pub cid: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JailerConfig {
    #[serde(default)]
    pub binary: String,
    pub exec_file: String,
    #[serde(default)]
    pub id: String,
    pub uid: i32,
    pub gid: i32,
    #[serde(default)]
    pub numa_node: i32,
    #[serde(default)]
    pub chroot_base_dir: String,
    #[serde(default)]
    pub daemonize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmMetrics {
    pub cpu_usage: f64,
    pub memory_used: i64,
    pub memory_total: i64,
    #[serde(rename = "disk_read_bytes")]
    pub disk_read: i64,
    #[serde(rename = "disk_write_bytes")]
    pub disk_write: i64,
    #[serde(rename = "net_rx_bytes")]
    pub net_rx: i64,
    #[serde(rename = "net_tx_bytes")]
    pub net_tx: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateVmRequest {
    pub name: String,
    pub config: VmConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmActionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub vm_id: String,
}

/// Lifecycle actions exposed by `POST /vms/{id}/{action}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAction {
    Start,
    /// Hard stop
    Stop,
    /// Graceful guest shutdown
    Shutdown,
}

impl VmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmAction::Start => "start",
            VmAction::Stop => "stop",
            VmAction::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Config templates
// ============================================================================

/// Saved configuration blueprint. No lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigTemplate {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub config: VmConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConfigRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub config: VmConfig,
}

// ============================================================================
// System
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub components: std::collections::BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemInfo {
    pub version: String,
    pub firecracker_version: String,
    #[serde(default)]
    pub go_version: String,
    pub os: String,
    pub arch: String,
    pub num_cpu: u32,
    pub total_memory: u64,
}
