//! Node configuration and per-call resource resolution. A handful of
//! [NodeDescriptor]s can be loaded once at startup from a JSON file with
//! [load_options]; [get_config] then merges per-call [LocalOptions] over the
//! descriptor matching the current host to build the [TaskConfig] handed to
//! an adapter. A `TaskConfig` lives only for the duration of one dispatch
//! call and is never serialized into a result.

use std::{
    env,
    fs::read_to_string,
    path::Path,
    sync::{OnceLock, RwLock},
};

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// fraction of a requested memory ceiling actually handed to a program,
/// leaving headroom for the process itself
const MEMORY_SAFETY_FACTOR: f64 = 0.98;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// the static description of one compute node. `hostname_pattern` is a regex
/// matched against the current hostname by [get_node_descriptor]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub hostname_pattern: String,

    /// total usable memory in GiB
    #[serde(default)]
    pub memory: Option<f64>,

    #[serde(default)]
    pub ncores: Option<usize>,

    #[serde(default)]
    pub scratch_directory: Option<String>,
}

impl Default for NodeDescriptor {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            hostname_pattern: String::new(),
            memory: None,
            ncores: None,
            scratch_directory: None,
        }
    }
}

/// per-call resource overrides, scoped to a single dispatch invocation.
/// `memory` is an advisory ceiling in GiB
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalOptions {
    #[serde(default)]
    pub memory: Option<f64>,

    #[serde(default)]
    pub ncores: Option<usize>,

    #[serde(default)]
    pub scratch_directory: Option<String>,
}

impl LocalOptions {
    pub fn with_memory(memory: f64) -> Self {
        Self {
            memory: Some(memory),
            ..Self::default()
        }
    }

    pub fn with_ncores(ncores: usize) -> Self {
        Self {
            ncores: Some(ncores),
            ..Self::default()
        }
    }
}

/// the resolved, call-scoped configuration handed to an adapter. this type
/// is internal to one invocation and never appears in a result record
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfig {
    /// working memory in GiB, already reduced by the safety factor
    pub memory: f64,
    pub ncores: usize,
    pub scratch_directory: String,
}

static NODES: OnceLock<RwLock<Vec<NodeDescriptor>>> = OnceLock::new();

fn nodes() -> &'static RwLock<Vec<NodeDescriptor>> {
    NODES.get_or_init(|| RwLock::new(vec![NodeDescriptor::default()]))
}

/// replace the global node descriptors with the contents of the JSON file at
/// `path`. intended to be called once at process start
pub fn load_options(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let contents = read_to_string(path)?;
    let new: Vec<NodeDescriptor> = serde_json::from_str(&contents)?;
    debug!("loaded {} node descriptors", new.len());
    *nodes().write().unwrap() = new;
    Ok(())
}

/// the current hostname, from the HOSTNAME environment variable or
/// /etc/hostname, falling back to "localhost"
pub fn hostname() -> String {
    if let Ok(h) = env::var("HOSTNAME") {
        if !h.is_empty() {
            return h;
        }
    }
    if let Ok(h) = read_to_string("/etc/hostname") {
        let h = h.trim();
        if !h.is_empty() {
            return h.to_string();
        }
    }
    String::from("localhost")
}

/// return the first node descriptor whose `hostname_pattern` matches `host`
/// (the current hostname if None), or the default descriptor if none match.
/// never errors: descriptors with invalid patterns are skipped
pub fn get_node_descriptor(host: Option<&str>) -> NodeDescriptor {
    let host = match host {
        Some(h) => h.to_string(),
        None => hostname(),
    };
    for node in nodes().read().unwrap().iter() {
        if node.hostname_pattern.is_empty() {
            continue;
        }
        match Regex::new(&node.hostname_pattern) {
            Ok(re) => {
                if re.is_match(&host) {
                    return node.clone();
                }
            }
            Err(e) => {
                warn!(
                    "skipping node `{}`: bad hostname pattern: {e}",
                    node.name
                )
            }
        }
    }
    NodeDescriptor::default()
}

/// total system memory in GiB from /proc/meminfo, or 4.0 if it cannot be read
fn system_memory() -> f64 {
    if let Ok(contents) = read_to_string("/proc/meminfo") {
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                if let Some(kb) = rest.split_whitespace().next() {
                    if let Ok(kb) = kb.parse::<f64>() {
                        return kb / (1024.0 * 1024.0);
                    }
                }
            }
        }
    }
    4.0
}

fn system_ncores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// resolve `local_options` over the current node's defaults into a
/// call-scoped [TaskConfig]. the memory ceiling is advisory: the returned
/// working memory is `MEMORY_SAFETY_FACTOR` times the requested value
pub fn get_config(
    local_options: Option<&LocalOptions>,
) -> Result<TaskConfig, ConfigError> {
    let node = get_node_descriptor(None);
    let local = local_options.cloned().unwrap_or_default();
    let memory = local.memory.or(node.memory).unwrap_or_else(system_memory);
    let ncores = local.ncores.or(node.ncores).unwrap_or_else(system_ncores);
    let scratch_directory = local
        .scratch_directory
        .or(node.scratch_directory)
        .unwrap_or_else(|| env::temp_dir().to_string_lossy().to_string());
    Ok(TaskConfig {
        memory: MEMORY_SAFETY_FACTOR * memory,
        ncores,
        scratch_directory,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_memory_ceiling() {
        let cfg =
            get_config(Some(&LocalOptions::with_memory(5000.0))).unwrap();
        assert!((cfg.memory - 4900.0).abs() < 1e-8);
        assert!(cfg.memory <= 5000.0);
    }

    #[test]
    fn test_local_ncores() {
        let cfg = get_config(Some(&LocalOptions::with_ncores(3))).unwrap();
        assert_eq!(cfg.ncores, 3);
    }

    #[test]
    fn test_defaults() {
        let cfg = get_config(None).unwrap();
        assert!(cfg.memory > 0.0);
        assert!(cfg.ncores > 0);
        assert!(!cfg.scratch_directory.is_empty());
    }

    #[test]
    fn test_load_options() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"[
  {{
    "name": "cluster",
    "hostname_pattern": "^node\\d+$",
    "memory": 64.0,
    "ncores": 16
  }}
]"#
        )
        .unwrap();
        load_options(f.path()).unwrap();

        let node = get_node_descriptor(Some("node12"));
        assert_eq!(node.name, "cluster");
        assert_eq!(node.memory, Some(64.0));

        // no match falls back to the default descriptor
        let node = get_node_descriptor(Some("login"));
        assert_eq!(node.name, "default");

        // restore the default so other tests see a clean slate
        *nodes().write().unwrap() = vec![NodeDescriptor::default()];
    }
}
