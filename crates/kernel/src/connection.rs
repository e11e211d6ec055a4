use std::{
    fs, io,
    net::{Ipv4Addr, TcpListener},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KernelError;

const LOCALHOST: &str = "127.0.0.1";

/// Contents of a Jupyter connection file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    pub key: String,
    pub signature_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

impl ConnectionInfo {
    /// Picks five free loopback ports and a fresh signing key.
    pub fn allocate(kernel_name: &str) -> io::Result<Self> {
        // All listeners stay open until every port is chosen so none repeat.
        let listeners = (0..5)
            .map(|_| TcpListener::bind((Ipv4Addr::LOCALHOST, 0)))
            .collect::<io::Result<Vec<_>>>()?;
        let ports = listeners
            .iter()
            .map(|listener| listener.local_addr().map(|addr| addr.port()))
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            transport: "tcp".to_string(),
            ip: LOCALHOST.to_string(),
            shell_port: ports[0],
            iopub_port: ports[1],
            stdin_port: ports[2],
            control_port: ports[3],
            hb_port: ports[4],
            key: uuid::Uuid::new_v4().to_string(),
            signature_scheme: "hmac-sha256".to_string(),
            kernel_name: Some(kernel_name.to_string()),
        })
    }

    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), KernelError> {
        let to_error = |source| KernelError::ConnectionFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(to_error)?;
        }
        let contents = serde_json::to_vec_pretty(self).map_err(io::Error::from).map_err(to_error)?;
        fs::write(path, contents).map_err(to_error)
    }
}

/// Where connection files are written, mirroring Jupyter's runtime dir lookup.
pub fn runtime_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("JUPYTER_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_dir()
        .map(|dir| dir.join("jupyter").join("runtime"))
        .unwrap_or_else(std::env::temp_dir)
}

/// A connection file on disk, deleted when this value is dropped.
///
/// The file holds the signing key, so it must not outlive the kernel even
/// when a launch is abandoned halfway.
#[derive(Debug)]
pub struct ConnectionFile {
    path: PathBuf,
}

impl ConnectionFile {
    /// Writes `info` to a fresh `kernel-<uuid>.json` under `dir`.
    pub fn create(info: &ConnectionInfo, dir: &Path) -> Result<Self, KernelError> {
        let path = dir.join(format!("kernel-{}.json", uuid::Uuid::new_v4()));
        let file = Self { path };
        info.write_to(&file.path)?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConnectionFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed connection file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Failed to remove connection file")
            }
        }
    }
}
