//! Process configuration (§5, §6): the memory-sizing environment
//! variables plus the debug/boot/prefix knobs, read once at startup
//! into one owned value rather than consulted ad hoc from call sites.

use crate::cell::CellIdx;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub arena_size: CellIdx,
    pub max_arena_size: CellIdx,
    pub jam_size: CellIdx,
    pub gc_safety: CellIdx,
    pub stack_size: CellIdx,
    pub max_string: CellIdx,
    /// `MES_DEBUG`, 0..5.
    pub debug: u8,
    /// `MES_BOOT`, default `boot-0.scm`.
    pub boot: String,
    /// `MES_PREFIX`, seeds the boot file search path.
    pub prefix: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            arena_size: 10_000_000,
            max_arena_size: 100_000_000,
            jam_size: 20_000,
            gc_safety: 2_000,
            stack_size: 20_000,
            max_string: 524_288,
            debug: 0,
            boot: "boot-0.scm".to_string(),
            prefix: None,
        }
    }
}

impl Config {
    /// Reads the nine environment variables named in §5/§6, falling
    /// back to the defaults for any that are unset or unparsable.
    pub fn from_env() -> Self {
        let d = Config::default();
        Config {
            arena_size: env_cell_idx("MES_ARENA", d.arena_size),
            max_arena_size: env_cell_idx("MES_MAX_ARENA", d.max_arena_size),
            jam_size: env_cell_idx("MES_JAM", d.jam_size),
            gc_safety: env_cell_idx("MES_SAFETY", d.gc_safety),
            stack_size: env_cell_idx("MES_STACK", d.stack_size),
            max_string: env_cell_idx("MES_MAX_STRING", d.max_string),
            debug: env::var("MES_DEBUG")
                .ok()
                .and_then(|v| v.parse::<u8>().ok())
                .map(|v| v.min(5))
                .unwrap_or(d.debug),
            boot: env::var("MES_BOOT").unwrap_or(d.boot),
            prefix: env::var("MES_PREFIX").ok(),
        }
    }

    /// The boot file search path from §4.8: `MES_PREFIX/module/mes/<boot>`,
    /// `./module/mes/<boot>`, `./mes/module/mes/<boot>`, `<boot>`.
    pub fn boot_search_path(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(prefix) = &self.prefix {
            candidates.push(format!("{prefix}/module/mes/{}", self.boot));
        }
        candidates.push(format!("./module/mes/{}", self.boot));
        candidates.push(format!("./mes/module/mes/{}", self.boot));
        candidates.push(self.boot.clone());
        candidates
    }

    /// Maps `MES_DEBUG` (0..5) to a `tracing` level, per the ambient
    /// logging section of SPEC_FULL.md: 0=off, 1=error, 2=info,
    /// 3=debug, 4-5=trace.
    pub fn trace_filter(&self) -> &'static str {
        match self.debug {
            0 => "off",
            1 => "error",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }
}

fn env_cell_idx(name: &str, default: CellIdx) -> CellIdx {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<CellIdx>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.arena_size, 10_000_000);
        assert_eq!(c.max_arena_size, 100_000_000);
        assert_eq!(c.jam_size, 20_000);
        assert_eq!(c.gc_safety, 2_000);
        assert_eq!(c.stack_size, 20_000);
        assert_eq!(c.max_string, 524_288);
        assert_eq!(c.boot, "boot-0.scm");
    }

    #[test]
    fn boot_search_path_without_prefix_has_three_entries() {
        let c = Config::default();
        let path = c.boot_search_path();
        assert_eq!(path.len(), 3);
        assert_eq!(path[2], "boot-0.scm");
    }

    #[test]
    fn boot_search_path_with_prefix_has_four_entries() {
        let mut c = Config::default();
        c.prefix = Some("/opt/mes".to_string());
        let path = c.boot_search_path();
        assert_eq!(path.len(), 4);
        assert_eq!(path[0], "/opt/mes/module/mes/boot-0.scm");
    }

    #[test]
    fn trace_filter_maps_debug_levels() {
        let mut c = Config::default();
        c.debug = 0;
        assert_eq!(c.trace_filter(), "off");
        c.debug = 5;
        assert_eq!(c.trace_filter(), "trace");
    }
}
