use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Stable identity for one deployment, derived from the config file location.
/// The slug namespaces container and network names so two deployments on the
/// same host never collide.
#[derive(Debug, Clone)]
pub struct DeploymentIdentity {
    pub name: String,
    pub id: String,
    pub slug: String,
    pub config_path: PathBuf,
}

/// Compute a deployment ID by hashing the given path string with SHA-256 and
/// returning the first 8 hex characters. Does not canonicalize; the caller
/// canonicalizes first when stability across path spellings is wanted.
pub fn compute_deployment_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..4])
}

impl DeploymentIdentity {
    pub fn new(name: &str, config_path: &Path) -> anyhow::Result<Self> {
        let canonical = config_path.canonicalize()?;
        let id = compute_deployment_id(&canonical);
        let slug = format!("{name}-{id}");
        Ok(Self {
            name: name.to_string(),
            id,
            slug,
            config_path: canonical,
        })
    }

    /// Container name for a service of this deployment.
    pub fn container_name(&self, service: &str) -> String {
        format!("convoy-{}-{}", self.slug, service)
    }

    /// Docker network shared by this deployment's containers.
    pub fn network_name(&self) -> String {
        format!("convoy-{}-net", self.slug)
    }
}
