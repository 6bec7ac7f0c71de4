//! Browser, device and network capability snapshot.
//!
//! A [`SystemMetrics`] value is captured once when a session is initialized
//! and never refreshed. Network details depend on what the client platform
//! exposes, so each network field is optional.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Network stability reported while the client is online.
const ONLINE_STABILITY: f64 = 100.0;
const OFFLINE_STABILITY: f64 = 0.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub user_agent: String,
    pub platform: String,
}

impl BrowserInfo {
    /// Whether the browser identity could be determined.
    pub fn is_resolved(&self) -> bool {
        matches!(&self.name, Some(name) if !name.is_empty() && name != "Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub screen_resolution: String,
    pub timezone: String,
    pub language: String,
    pub cookies_enabled: bool,
    pub scripting_enabled: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            screen_resolution: "0x0".to_string(),
            timezone: "UTC".to_string(),
            language: "en-US".to_string(),
            cookies_enabled: true,
            scripting_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    /// Estimated downlink bandwidth in Mbit/s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downlink_mbps: Option<f64>,
    /// Estimated round-trip time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub response_time_ms: f64,
    /// Used heap divided by the heap limit, when the platform reports both
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    pub network_stability: f64,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            response_time_ms: 0.0,
            memory_usage: None,
            network_stability: ONLINE_STABILITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub browser: BrowserInfo,
    pub device: DeviceInfo,
    pub network: NetworkInfo,
    pub performance: PerformanceSnapshot,
}

/// Source of a [`SystemMetrics`] snapshot.
///
/// Browser, device and performance figures are read synchronously; network
/// information may need an asynchronous probe.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    fn browser_info(&self) -> BrowserInfo;

    fn device_info(&self) -> DeviceInfo;

    async fn network_info(&self) -> NetworkInfo;

    fn performance(&self) -> PerformanceSnapshot;

    async fn snapshot(&self) -> SystemMetrics {
        let browser = self.browser_info();
        let device = self.device_info();
        let performance = self.performance();
        let network = self.network_info().await;

        SystemMetrics {
            browser,
            device,
            network,
            performance,
        }
    }
}

/// Capability and telemetry figures as reported by an exam client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientReport {
    pub user_agent: String,
    pub platform: String,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub timezone: String,
    pub language: String,
    pub cookies_enabled: bool,
    pub scripting_enabled: bool,
    pub online: bool,
    pub connection_type: Option<String>,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<u32>,
    pub response_time_ms: Option<f64>,
    pub used_heap_bytes: Option<u64>,
    pub heap_limit_bytes: Option<u64>,
}

impl Default for ClientReport {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            platform: String::new(),
            browser_name: None,
            browser_version: None,
            screen_width: 0,
            screen_height: 0,
            timezone: "UTC".to_string(),
            language: "en-US".to_string(),
            cookies_enabled: true,
            scripting_enabled: true,
            online: true,
            connection_type: None,
            downlink_mbps: None,
            rtt_ms: None,
            response_time_ms: None,
            used_heap_bytes: None,
            heap_limit_bytes: None,
        }
    }
}

/// Probe backed by a client-supplied [`ClientReport`].
#[derive(Debug, Clone, Default)]
pub struct ReportedProbe {
    report: ClientReport,
}

impl ReportedProbe {
    pub fn new(report: ClientReport) -> Self {
        Self { report }
    }
}

#[async_trait]
impl SystemProbe for ReportedProbe {
    fn browser_info(&self) -> BrowserInfo {
        let (detected_name, detected_version) = detect_browser(&self.report.user_agent);

        BrowserInfo {
            name: self.report.browser_name.clone().or(detected_name),
            version: self.report.browser_version.clone().or(detected_version),
            user_agent: self.report.user_agent.clone(),
            platform: self.report.platform.clone(),
        }
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            screen_resolution: format!(
                "{}x{}",
                self.report.screen_width, self.report.screen_height
            ),
            timezone: self.report.timezone.clone(),
            language: self.report.language.clone(),
            cookies_enabled: self.report.cookies_enabled,
            scripting_enabled: self.report.scripting_enabled,
        }
    }

    async fn network_info(&self) -> NetworkInfo {
        NetworkInfo {
            connection_type: self.report.connection_type.clone(),
            downlink_mbps: self.report.downlink_mbps,
            rtt_ms: self.report.rtt_ms,
        }
    }

    fn performance(&self) -> PerformanceSnapshot {
        let memory_usage = match (self.report.used_heap_bytes, self.report.heap_limit_bytes) {
            (Some(used), Some(limit)) if limit > 0 => Some(used as f64 / limit as f64),
            _ => None,
        };

        PerformanceSnapshot {
            response_time_ms: self.report.response_time_ms.unwrap_or(0.0),
            memory_usage,
            network_stability: if self.report.online {
                ONLINE_STABILITY
            } else {
                OFFLINE_STABILITY
            },
        }
    }
}

/// Resolve browser name and version from a user agent string.
///
/// Order matters: Edge and Opera carry a `Chrome/` token, Chrome carries a
/// `Safari/` token.
pub fn detect_browser(user_agent: &str) -> (Option<String>, Option<String>) {
    const MARKERS: [(&str, &str); 5] = [
        ("Edg/", "Edge"),
        ("OPR/", "Opera"),
        ("Firefox/", "Firefox"),
        ("Chrome/", "Chrome"),
        ("Version/", "Safari"),
    ];

    for (token, name) in MARKERS {
        if name == "Safari" && !user_agent.contains("Safari/") {
            continue;
        }
        if let Some(pos) = user_agent.find(token) {
            let version: String = user_agent[pos + token.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            let version = if version.is_empty() { None } else { Some(version) };
            return (Some(name.to_string()), version);
        }
    }

    (None, None)
}

/// Client-side features the proctoring session relies on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureSupport {
    pub media_devices: bool,
    pub fullscreen: bool,
    pub local_storage: bool,
    pub session_storage: bool,
    pub indexed_db: bool,
    pub web_socket: bool,
    pub notifications: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub features: BTreeMap<String, bool>,
    pub warnings: Vec<String>,
}

/// Decide whether a client can host a proctored session.
///
/// Media device access, full-screen support and local storage are required;
/// everything else only produces a warning.
pub fn check_compatibility(support: &FeatureSupport) -> CompatibilityReport {
    let checks = [
        (
            "mediaDevices",
            support.media_devices,
            "Camera and microphone access is not supported",
        ),
        (
            "fullscreen",
            support.fullscreen,
            "Full-screen mode is not supported",
        ),
        (
            "localStorage",
            support.local_storage,
            "Local storage is not available",
        ),
        (
            "sessionStorage",
            support.session_storage,
            "Session storage is not available",
        ),
        (
            "indexedDB",
            support.indexed_db,
            "IndexedDB is not available; offline backup is limited",
        ),
        (
            "webSocket",
            support.web_socket,
            "Real-time transport is not available; live monitoring is limited",
        ),
        (
            "notifications",
            support.notifications,
            "Notifications are not supported",
        ),
    ];

    let mut features = BTreeMap::new();
    let mut warnings = Vec::new();
    for (name, supported, warning) in checks {
        features.insert(name.to_string(), supported);
        if !supported {
            warnings.push(warning.to_string());
        }
    }

    CompatibilityReport {
        compatible: support.media_devices && support.fullscreen && support.local_storage,
        features,
        warnings,
    }
}
