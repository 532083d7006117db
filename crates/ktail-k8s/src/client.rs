use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};

/// Kubernetes client bootstrap
pub struct KubeClient {
    /// `None` when running in-cluster without a kubeconfig
    kubeconfig: Option<Kubeconfig>,
    context: Option<String>,
}

impl KubeClient {
    /// Load the kubeconfig from `path`, or from the default locations.
    ///
    /// Without an explicit path a missing kubeconfig is not an error: the client then
    /// falls back to the in-cluster service account.
    pub fn new(path: Option<&Path>, context: Option<String>) -> Result<Self> {
        let kubeconfig = match path {
            Some(path) => Some(Kubeconfig::read_from(path).context(format!(
                "Failed to read kubeconfig from {}",
                path.display()
            ))?),
            None => match Kubeconfig::read() {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::debug!(error = %e, "no kubeconfig found; assuming in-cluster");
                    None
                }
            },
        };

        if let (Some(config), Some(name)) = (&kubeconfig, &context) {
            if !config.contexts.iter().any(|c| &c.name == name) {
                anyhow::bail!("Context '{}' not found in kubeconfig", name);
            }
        }

        let context = context.or_else(|| {
            kubeconfig
                .as_ref()
                .and_then(|config| config.current_context.clone())
        });

        Ok(Self {
            kubeconfig,
            context,
        })
    }

    /// Name of the context in use
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// The namespace configured for the active context, or `default`
    pub fn default_namespace(&self) -> String {
        self.kubeconfig
            .as_ref()
            .zip(self.context.as_ref())
            .and_then(|(config, name)| {
                config
                    .contexts
                    .iter()
                    .find(|c| &c.name == name)
                    .and_then(|c| c.context.as_ref())
                    .and_then(|c| c.namespace.clone())
            })
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Create a kube::Client for the active context
    pub async fn client(&self) -> Result<kube::Client> {
        let config = match &self.kubeconfig {
            Some(kubeconfig) => kube::Config::from_custom_kubeconfig(
                kubeconfig.clone(),
                &KubeConfigOptions {
                    context: self.context.clone(),
                    ..Default::default()
                },
            )
            .await
            .context(format!(
                "Failed to create config for context: {}",
                self.context.as_deref().unwrap_or("<current>")
            ))?,
            None => kube::Config::incluster().context("Failed to load in-cluster config")?,
        };

        kube::Client::try_from(config).context("Failed to create Kubernetes client")
    }
}
