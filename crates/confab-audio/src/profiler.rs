use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Low,
    Medium,
    High,
}

/// Immutable capability snapshot, computed once per process.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub is_mobile: bool,
    pub is_low_end: bool,
    pub gpu_tier: GpuTier,
    pub recommended_quality: Quality,
}

/// Raw probe inputs, separated from classification so the latter stays pure
/// and testable.
#[derive(Debug, Clone, Default)]
pub struct DeviceProbe {
    pub user_agent: Option<String>,
    pub gpu_renderer: Option<String>,
    pub cpu_cores: usize,
    pub memory_gib: Option<f64>,
}

static MOBILE_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)android|iphone|ipad|ipod|mobile|tablet").expect("static pattern")
});
static GPU_HIGH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)nvidia|radeon|\bamd\b|apple m\d|intel iris").expect("static pattern")
});
static GPU_LOW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)intel hd|mali|adreno 3\d\d|powervr").expect("static pattern")
});

static PROFILE: OnceCell<DeviceProfile> = OnceCell::new();

impl DeviceProfile {
    /// Probe once and cache for the process lifetime.
    pub fn detect() -> &'static DeviceProfile {
        PROFILE.get_or_init(|| {
            let probe = DeviceProbe::gather();
            let profile = Self::from_probe(&probe);
            tracing::info!(
                "Device profile: mobile={} low_end={} gpu={:?} quality={:?}",
                profile.is_mobile,
                profile.is_low_end,
                profile.gpu_tier,
                profile.recommended_quality
            );
            profile
        })
    }

    pub fn from_probe(probe: &DeviceProbe) -> Self {
        let is_mobile = probe
            .user_agent
            .as_deref()
            .map(|ua| MOBILE_UA.is_match(ua))
            .unwrap_or(false);

        let is_low_end =
            probe.cpu_cores <= 2 || probe.memory_gib.map(|gib| gib <= 2.0).unwrap_or(false);

        let gpu_tier = probe
            .gpu_renderer
            .as_deref()
            .map(classify_gpu)
            .unwrap_or(GpuTier::Medium);

        let recommended_quality = if is_mobile || is_low_end || gpu_tier == GpuTier::Low {
            Quality::Low
        } else if gpu_tier == GpuTier::High {
            Quality::High
        } else {
            Quality::Medium
        };

        Self {
            is_mobile,
            is_low_end,
            gpu_tier,
            recommended_quality,
        }
    }

    /// Startup hint for the splitter's emit size; desktop default is already
    /// the minimum.
    pub fn recommended_buffer_size(&self) -> usize {
        if self.is_low_end {
            512
        } else {
            256
        }
    }
}

/// Substring match against the known high/low renderer markers; anything
/// unrecognized lands in the middle.
pub fn classify_gpu(renderer: &str) -> GpuTier {
    if GPU_HIGH.is_match(renderer) {
        GpuTier::High
    } else if GPU_LOW.is_match(renderer) {
        GpuTier::Low
    } else {
        GpuTier::Medium
    }
}

impl DeviceProbe {
    pub fn gather() -> Self {
        Self {
            user_agent: std::env::var("CONFAB_USER_AGENT").ok(),
            gpu_renderer: probe_gpu_renderer(),
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            memory_gib: probe_memory_gib(),
        }
    }
}

/// Best-effort renderer lookup; warns and returns None rather than failing
/// when the tooling is unavailable.
fn probe_gpu_renderer() -> Option<String> {
    if let Ok(mock) = std::env::var("MOCK_GPU_RENDERER") {
        return Some(mock);
    }
    let output = match Command::new("glxinfo").arg("-B").output() {
        Ok(output) => String::from_utf8_lossy(&output.stdout).to_string(),
        Err(_) => {
            tracing::warn!("glxinfo not available; GPU tier defaults to medium");
            return None;
        }
    };
    output
        .lines()
        .find(|line| line.trim_start().starts_with("OpenGL renderer string:"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, renderer)| renderer.trim().to_string())
}

fn probe_memory_gib() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / 1024.0 / 1024.0)
}
