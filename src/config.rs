use crate::error::{Result, TsError};
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Default number of bytes scanned for a sync byte after corruption
pub const DEFAULT_RESYNC_SIZE: usize = 65536;

/// Default byte budget for header discovery
pub const DEFAULT_PROBESIZE: u64 = 5_000_000;

const CONFIG_PATHS: [&str; 2] = ["./tsdemux.toml", "./tsdemux_config.toml"];

/// How packets are produced by `read_packet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemuxMode {
    /// PSI-driven elementary stream demuxing
    #[default]
    Normal,
    /// Every 188-byte TS packet is returned as-is on a single data stream
    Raw,
}

/// Options recognized by [`TsDemuxer::open`](crate::format::ts::TsDemuxer::open).
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxOptions {
    /// Bytes scanned for a sync byte before giving up
    pub resync_size: usize,
    /// Rewrite teletext/subtitle timestamps from the program PCR
    pub fix_teletext_pts: bool,
    /// Keep scanning until every program listed in the PAT has a PMT
    pub scan_all_pmts: bool,
    /// Ignore PMTs for programs the PAT does not advertise
    pub skip_unknown_pmt: bool,
    /// Ignore program/stream changes after the header was read
    pub skip_changes: bool,
    /// Keep per-program stream lists when the PAT is rebuilt
    pub skip_clear: bool,
    /// Reuse streams across PMT version changes
    pub merge_pmt_versions: bool,
    /// Interpolate a PCR for every packet in raw mode
    pub compute_pcr: bool,
    /// Bytes read during header discovery
    pub probesize: u64,
    pub mode: DemuxMode,
    /// Undo 33-bit timestamp wraps using a per-stream reference
    pub correct_ts_overflow: bool,
    /// Estimate stream durations at the end of `open`
    pub estimate_duration: bool,
    /// Retry a silent PMT with its CRC check disabled
    pub retry_pmt_without_crc: bool,
    /// Retry a silent PMT using only its first TS packet
    pub retry_pmt_chopped: bool,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            resync_size: DEFAULT_RESYNC_SIZE,
            fix_teletext_pts: true,
            scan_all_pmts: false,
            skip_unknown_pmt: false,
            skip_changes: false,
            skip_clear: false,
            merge_pmt_versions: false,
            compute_pcr: false,
            probesize: DEFAULT_PROBESIZE,
            mode: DemuxMode::Normal,
            correct_ts_overflow: true,
            estimate_duration: true,
            retry_pmt_without_crc: true,
            retry_pmt_chopped: true,
        }
    }
}

impl DemuxOptions {
    /// Defaults, then `./tsdemux.toml` if present, then `TSDEMUX_*` variables.
    pub fn load() -> Result<Self> {
        let mut options = Self::default();

        for path in &CONFIG_PATHS {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    options.apply_str(&content)?;
                    break;
                }
            }
        }

        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix("TSDEMUX_") {
                options.set(&name.to_ascii_lowercase(), &value)?;
            }
        }

        Ok(options)
    }

    /// Parses `key = value` lines. `#` starts a comment.
    pub fn parse_str(content: &str) -> Result<Self> {
        let mut options = Self::default();
        options.apply_str(content)?;
        Ok(options)
    }

    fn apply_str(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(TsError::Config(format!("expected key = value, got '{}'", line)));
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            self.set(key.trim(), value)?;
        }
        Ok(())
    }

    /// Sets one option by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "resync_size" => self.resync_size = value.parse()?,
            "fix_teletext_pts" => self.fix_teletext_pts = parse_bool(key, value)?,
            "scan_all_pmts" => self.scan_all_pmts = parse_bool(key, value)?,
            "skip_unknown_pmt" => self.skip_unknown_pmt = parse_bool(key, value)?,
            "skip_changes" => self.skip_changes = parse_bool(key, value)?,
            "skip_clear" => self.skip_clear = parse_bool(key, value)?,
            "merge_pmt_versions" => self.merge_pmt_versions = parse_bool(key, value)?,
            "compute_pcr" => self.compute_pcr = parse_bool(key, value)?,
            "probesize" => self.probesize = value.parse()?,
            "correct_ts_overflow" => self.correct_ts_overflow = parse_bool(key, value)?,
            "estimate_duration" => self.estimate_duration = parse_bool(key, value)?,
            "retry_pmt_without_crc" => self.retry_pmt_without_crc = parse_bool(key, value)?,
            "retry_pmt_chopped" => self.retry_pmt_chopped = parse_bool(key, value)?,
            "mode" => {
                self.mode = match value {
                    "normal" => DemuxMode::Normal,
                    "raw" => DemuxMode::Raw,
                    _ => return Err(TsError::Config(format!("unknown mode '{}'", value))),
                }
            }
            "ts_packetsize" => {
                return Err(TsError::Config("ts_packetsize is read-only".into()));
            }
            _ => return Err(TsError::Config(format!("unknown option '{}'", key))),
        }
        Ok(())
    }

    pub fn with_resync_size(mut self, resync_size: usize) -> Self {
        self.resync_size = resync_size;
        self
    }

    pub fn with_fix_teletext_pts(mut self, enabled: bool) -> Self {
        self.fix_teletext_pts = enabled;
        self
    }

    pub fn with_scan_all_pmts(mut self, enabled: bool) -> Self {
        self.scan_all_pmts = enabled;
        self
    }

    pub fn with_skip_changes(mut self, enabled: bool) -> Self {
        self.skip_changes = enabled;
        self
    }

    pub fn with_merge_pmt_versions(mut self, enabled: bool) -> Self {
        self.merge_pmt_versions = enabled;
        self
    }

    pub fn with_compute_pcr(mut self, enabled: bool) -> Self {
        self.compute_pcr = enabled;
        self
    }

    pub fn with_probesize(mut self, probesize: u64) -> Self {
        self.probesize = probesize;
        self
    }

    pub fn with_mode(mut self, mode: DemuxMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_estimate_duration(mut self, enabled: bool) -> Self {
        self.estimate_duration = enabled;
        self
    }

    /// Enables or disables both PMT recovery retries.
    pub fn with_pmt_retries(mut self, without_crc: bool, chopped: bool) -> Self {
        self.retry_pmt_without_crc = without_crc;
        self.retry_pmt_chopped = chopped;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TsError::Config(format!(
            "option '{}' expects a boolean, got '{}'",
            key, value
        ))),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# tsdemux configuration
# Every key is optional; omitted keys keep their defaults.

resync_size = 65536
fix_teletext_pts = true
scan_all_pmts = false
skip_unknown_pmt = false
skip_changes = false
skip_clear = false
merge_pmt_versions = false
compute_pcr = false
probesize = 5000000
mode = "normal"
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}
