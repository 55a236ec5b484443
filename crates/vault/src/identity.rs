//! Machine and user identity probes that feed key derivation.
//!
//! The machine identity must be unique and hard to guess. Hostnames are
//! neither, so they are never used: when no unique identifier can be found the
//! probe fails and nothing is encrypted.

use std::process::Command;

use crate::error::{Result, VaultError};

/// Environment variable that replaces machine-identity probing outright.
pub const MACHINE_ID_ENV: &str = "LECTERN_MACHINE_ID";

/// Environment variables consulted for the OS username, in order.
const USERNAME_ENVS: &[&str] = &["USER", "USERNAME", "LOGNAME"];

/// Identifiers some firmware reports instead of a real UUID.
const PLACEHOLDER_IDS: &[&str] = &[
    "00000000-0000-0000-0000-000000000000",
    "FFFFFFFF-FFFF-FFFF-FFFF-FFFFFFFFFFFF",
];

/// Source of the identity material bound into every encryption key.
pub trait IdentityProvider: Send + Sync {
    /// A stable identifier unique to this machine.
    fn machine_id(&self) -> Result<String>;

    /// The current operating-system username.
    fn username(&self) -> Result<String>;

    /// Key-derivation input: `machineID ":" username`.
    fn secret(&self) -> Result<Vec<u8>> {
        let machine = self.machine_id()?;
        let user = self.username()?;
        Ok(format!("{machine}:{user}").into_bytes())
    }
}

/// Probes the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn machine_id(&self) -> Result<String> {
        if let Some(id) = std::env::var(MACHINE_ID_ENV).ok().and_then(normalize) {
            return Ok(id);
        }
        platform_machine_id().ok_or_else(|| {
            VaultError::IdentityUnavailable(format!(
                "no unique machine identifier found; set {MACHINE_ID_ENV} to provide one"
            ))
        })
    }

    fn username(&self) -> Result<String> {
        USERNAME_ENVS
            .iter()
            .find_map(|name| std::env::var(name).ok().and_then(normalize))
            .or_else(|| run("whoami", &[]).and_then(normalize))
            .ok_or_else(|| VaultError::IdentityUnavailable("could not determine username".into()))
    }
}

/// Fixed identity, for tests and hermetic CI runs.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    machine_id: String,
    username: String,
}

impl StaticIdentity {
    pub fn new(machine_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            username: username.into(),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn machine_id(&self) -> Result<String> {
        normalize(self.machine_id.clone())
            .ok_or_else(|| VaultError::IdentityUnavailable("empty machine id".into()))
    }

    fn username(&self) -> Result<String> {
        normalize(self.username.clone())
            .ok_or_else(|| VaultError::IdentityUnavailable("empty username".into()))
    }
}

fn normalize(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || PLACEHOLDER_IDS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(trimmed))
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// Run a command and return its stdout when it exits successfully.
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        #[cfg(feature = "tracing")]
        tracing::debug!(program, status = %output.status, "identity probe failed");
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

#[cfg(target_os = "linux")]
fn platform_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok().and_then(normalize))
}

#[cfg(target_os = "macos")]
fn platform_machine_id() -> Option<String> {
    run("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"])
        .and_then(|out| parse_ioreg_uuid(&out))
        .or_else(|| {
            run("system_profiler", &["SPHardwareDataType"])
                .and_then(|out| parse_labelled(&out, "Hardware UUID:"))
        })
}

#[cfg(target_os = "windows")]
fn platform_machine_id() -> Option<String> {
    run("reg", &[
        "query",
        r"HKLM\SOFTWARE\Microsoft\Cryptography",
        "/v",
        "MachineGuid",
    ])
    .and_then(|out| parse_reg_value(&out, "MachineGuid"))
    .or_else(|| {
        run("powershell", &[
            "-NoProfile",
            "-Command",
            "(Get-CimInstance -Class Win32_ComputerSystemProduct).UUID",
        ])
        .and_then(normalize)
    })
    .or_else(|| run("wmic", &["csproduct", "get", "UUID"]).and_then(|out| parse_wmic_uuid(&out)))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_machine_id() -> Option<String> {
    None
}

/// Extract `"IOPlatformUUID" = "…"` from `ioreg` output.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_ioreg_uuid(output: &str) -> Option<String> {
    let line = output.lines().find(|l| l.contains("\"IOPlatformUUID\""))?;
    let value = line.split('=').nth(1)?;
    normalize(value.trim().trim_matches('"').to_string())
}

/// Extract the value after `label` on the first line that contains it.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_labelled(output: &str, label: &str) -> Option<String> {
    output
        .lines()
        .find_map(|l| l.split_once(label).map(|(_, v)| v.to_string()))
        .and_then(normalize)
}

/// Extract a `REG_SZ` value from `reg query` output.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_reg_value(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|l| {
        let mut parts = l.split_whitespace();
        (parts.next()? == name && parts.next()?.starts_with("REG_"))
            .then(|| parts.next().map(str::to_string))
            .flatten()
            .and_then(normalize)
    })
}

/// `wmic csproduct get UUID` prints a header line followed by the value.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_wmic_uuid(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("UUID"))
        .find_map(|l| normalize(l.to_string()))
}
