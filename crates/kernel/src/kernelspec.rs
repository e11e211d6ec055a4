//! Kernelspec discovery.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::error::KernelError;

pub const NATIVE_KERNEL_NAME: &str = "python3";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    #[default]
    Signal,
    Message,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KernelSpec {
    pub argv: Vec<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub interrupt_mode: InterruptMode,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(skip)]
    pub resource_dir: PathBuf,
}

impl KernelSpec {
    /// Spec used for `python3` when nothing is installed under that name.
    pub fn native() -> Self {
        Self {
            argv: ["python3", "-m", "ipykernel_launcher", "-f", "{connection_file}"]
                .into_iter()
                .map(String::from)
                .collect(),
            display_name: "Python 3".to_string(),
            language: "python".to_string(),
            interrupt_mode: InterruptMode::Signal,
            env: HashMap::new(),
            resource_dir: PathBuf::new(),
        }
    }

    pub fn load(resource_dir: &Path) -> Result<Self, KernelError> {
        let path = resource_dir.join("kernel.json");
        let invalid = |reason: String| KernelError::InvalidSpec {
            path: path.clone(),
            reason,
        };

        let contents = fs::read(&path).map_err(|e| invalid(e.to_string()))?;
        let mut spec: KernelSpec =
            serde_json::from_slice(&contents).map_err(|e| invalid(e.to_string()))?;
        if spec.argv.is_empty() {
            return Err(invalid("argv is empty".to_string()));
        }
        spec.resource_dir = resource_dir.to_path_buf();

        Ok(spec)
    }

    /// The kernel's argv with `{connection_file}` and `{resource_dir}` filled in.
    pub fn command_line(&self, connection_file: &Path) -> Vec<String> {
        let connection_file = connection_file.to_string_lossy();
        let resource_dir = self.resource_dir.to_string_lossy();

        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{connection_file}", &connection_file)
                    .replace("{resource_dir}", &resource_dir)
            })
            .collect()
    }
}

/// Directories searched for `<name>/kernel.json`, highest priority first.
pub fn kernel_dirs() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Some(paths) = std::env::var_os("JUPYTER_PATH") {
        roots.extend(std::env::split_paths(&paths));
    }
    if let Some(data) = dirs::data_dir() {
        roots.push(data.join("jupyter"));
    }
    for prefix in ["VIRTUAL_ENV", "CONDA_PREFIX"] {
        if let Some(prefix) = std::env::var_os(prefix) {
            roots.push(PathBuf::from(prefix).join("share").join("jupyter"));
        }
    }
    roots.push(PathBuf::from("/usr/local/share/jupyter"));
    roots.push(PathBuf::from("/usr/share/jupyter"));

    roots.into_iter().map(|root| root.join("kernels")).collect()
}

pub fn find_in(dirs: &[PathBuf], name: &str) -> Result<Option<KernelSpec>, KernelError> {
    let name = name.to_lowercase();

    for dir in dirs {
        let resource_dir = dir.join(&name);
        if resource_dir.join("kernel.json").is_file() {
            debug!(kernel = %name, dir = %resource_dir.display(), "Found kernelspec");
            return KernelSpec::load(&resource_dir).map(Some);
        }
    }

    Ok(None)
}

pub fn find_kernel_spec(name: &str) -> Result<KernelSpec, KernelError> {
    match find_in(&kernel_dirs(), name)? {
        Some(spec) => Ok(spec),
        None if name.eq_ignore_ascii_case(NATIVE_KERNEL_NAME) => {
            debug!("No python3 kernelspec installed, using ipykernel_launcher");
            Ok(KernelSpec::native())
        }
        None => Err(KernelError::NoSuchKernel(name.to_string())),
    }
}
