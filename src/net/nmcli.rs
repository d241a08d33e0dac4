//! NetworkManager backend driven through `nmcli`
//!
//! Talks to the system wireless stack with terse (`-t`) nmcli invocations.
//! The hotspot started for portal mode uses NetworkManager's shared mode,
//! which hands out addresses so portal clients can reach the gateway IP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{NetworkInfo, WifiBackend, WifiStatus};

/// Connection name NetworkManager assigns to `nmcli dev wifi hotspot`.
const HOTSPOT_CONNECTION: &str = "Hotspot";

pub struct NmcliBackend {
    interface: String,
}

impl NmcliBackend {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "nmcli");
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .await
            .context("Failed to spawn nmcli")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("nmcli {:?} failed: {}", args, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl WifiBackend for NmcliBackend {
    async fn disconnect(&self) {
        if let Err(e) = self.run(&["device", "disconnect", &self.interface]).await {
            debug!("disconnect ignored: {}", e);
        }
    }

    async fn connect(&self, ssid: &str, password: Option<&str>) -> Result<()> {
        let mut args = vec!["device", "wifi", "connect", ssid, "ifname", self.interface.as_str()];
        if let Some(pass) = password.filter(|p| !p.is_empty()) {
            args.push("password");
            args.push(pass);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn status(&self) -> WifiStatus {
        match self.run(&["-t", "-f", "DEVICE,STATE", "device"]).await {
            Ok(output) => parse_device_state(&output, &self.interface),
            Err(e) => {
                warn!("⚠️  nmcli status query failed: {}", e);
                WifiStatus::Unknown
            }
        }
    }

    async fn ip_address(&self) -> Option<String> {
        let output = self
            .run(&["-t", "-f", "IP4.ADDRESS", "device", "show", &self.interface])
            .await
            .ok()?;
        parse_ip_address(&output)
    }

    async fn current_ssid(&self) -> Option<String> {
        let output = self
            .run(&["-t", "-f", "ACTIVE,SSID", "device", "wifi", "list", "ifname", &self.interface])
            .await
            .ok()?;
        parse_active_ssid(&output)
    }

    async fn scan(&self) -> Result<Vec<NetworkInfo>> {
        let output = self
            .run(&[
                "-t",
                "-f",
                "SSID,SIGNAL,SECURITY",
                "device",
                "wifi",
                "list",
                "ifname",
                &self.interface,
                "--rescan",
                "yes",
            ])
            .await?;
        Ok(parse_scan(&output))
    }

    async fn start_access_point(&self, ssid: &str, password: &str) -> Result<()> {
        let mut args = vec![
            "device",
            "wifi",
            "hotspot",
            "ifname",
            self.interface.as_str(),
            "ssid",
            ssid,
        ];
        if !password.is_empty() {
            args.push("password");
            args.push(password);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn stop_access_point(&self) -> Result<()> {
        self.run(&["connection", "down", HOTSPOT_CONNECTION])
            .await
            .map(|_| ())
    }
}

/// Split one terse-mode line into fields, honoring nmcli's `\:` escaping.
fn split_terse_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn parse_device_state(output: &str, interface: &str) -> WifiStatus {
    for line in output.lines() {
        let fields = split_terse_fields(line);
        if fields.len() < 2 || fields[0] != interface {
            continue;
        }
        let state = fields[1].as_str();
        return if state == "connected" {
            WifiStatus::Connected
        } else if state.starts_with("connecting") {
            WifiStatus::Idle
        } else if state == "disconnected" {
            WifiStatus::Disconnected
        } else if state == "unavailable" {
            WifiStatus::SsidUnavailable
        } else {
            WifiStatus::Unknown
        };
    }
    WifiStatus::Unknown
}

fn parse_ip_address(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(value) = line.strip_prefix("IP4.ADDRESS") {
            // "IP4.ADDRESS[1]:192.168.1.10/24"
            let addr = value.split_once(':')?.1;
            let ip = addr.split('/').next().unwrap_or(addr);
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }
    None
}

fn parse_active_ssid(output: &str) -> Option<String> {
    for line in output.lines() {
        let fields = split_terse_fields(line);
        if fields.len() >= 2 && fields[0] == "yes" && !fields[1].is_empty() {
            return Some(fields[1].clone());
        }
    }
    None
}

fn parse_scan(output: &str) -> Vec<NetworkInfo> {
    let mut networks = Vec::new();
    for line in output.lines() {
        let fields = split_terse_fields(line);
        if fields.len() < 3 || fields[0].is_empty() {
            continue;
        }
        let Ok(signal) = fields[1].parse::<i32>() else {
            continue;
        };
        let security = fields[2].trim();
        networks.push(NetworkInfo {
            ssid: fields[0].clone(),
            // nmcli reports signal as a 0-100 percentage.
            rssi: signal / 2 - 100,
            secure: !security.is_empty() && security != "--",
        });
    }
    networks
}
