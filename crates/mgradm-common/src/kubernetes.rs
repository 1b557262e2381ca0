//! Cluster inspection and in-cluster execution
//!
//! [`ClusterDiscovery`] answers what kind of cluster we deploy to, and
//! [`ScriptExecutor`] runs generated scripts inside the server pod. Both are
//! built once when a command is assembled and handed to the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::{debug, info};

use crate::exec::{to_args, CommandRunner};
use crate::image::ImageReference;
use crate::scripts::INSPECT_SNIPPET;
use crate::{Error, Result, SERVER_CONTAINER, SERVER_DATA_MOUNT, SERVER_POD_SELECTOR};

/// Ingress controller shipped with k3s
pub const INGRESS_TRAEFIK: &str = "traefik";
/// Ingress controller assumed everywhere else
pub const INGRESS_NGINX: &str = "nginx";

/// What the deployment needs to know about the target cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Kubeconfig to talk to the cluster, kube defaults when unset
    pub kubeconfig: Option<PathBuf>,
    /// Ingress controller to configure in the chart
    pub ingress: String,
}

/// Service discovery capability of the target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterDiscovery: Send + Sync {
    /// Inspect the cluster
    async fn cluster_info(&self) -> Result<ClusterInfo>;
}

/// Runs generated scripts and inspection commands inside the server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run `script` from the scratch directory inside the server pod
    async fn run_script(&self, scratch_dir: &Path, script: &str) -> Result<()>;

    /// Inspect the currently running server
    async fn inspect_running(&self) -> Result<InspectData>;

    /// Inspect `image` in a throwaway pod
    async fn inspect_image(&self, image: &ImageReference, pull_policy: &str)
        -> Result<InspectData>;
}

/// Facts reported by the inspection snippet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectData {
    /// Server timezone
    pub timezone: Option<String>,
    /// Database engine major version
    pub db_version: String,
    /// Server release
    pub release: Option<String>,
}

/// Parse `key=value` lines printed by the inspection snippet
pub fn parse_inspect_output(output: &str) -> Result<InspectData> {
    let mut data = InspectData::default();
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "timezone" => data.timezone = Some(value.to_string()),
            "db_version" => data.db_version = value.to_string(),
            "release" => data.release = Some(value.to_string()),
            other => debug!(key = other, "ignoring inspection key"),
        }
    }

    if data.db_version.is_empty() {
        return Err(Error::data("inspection did not report a database version"));
    }
    Ok(data)
}

/// Items of a `kubectl get -o json` list
#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default)]
    items: Vec<T>,
}

fn kubeconfig_args(kubeconfig: Option<&Path>) -> Vec<String> {
    match kubeconfig {
        Some(path) => vec!["--kubeconfig".to_string(), path.display().to_string()],
        None => Vec::new(),
    }
}

/// Pick the ingress controller matching a kubelet version string
pub fn ingress_for_kubelet(kubelet_version: &str) -> &'static str {
    if kubelet_version.contains("+k3s") {
        INGRESS_TRAEFIK
    } else {
        INGRESS_NGINX
    }
}

/// [`ClusterDiscovery`] backed by kubectl
pub struct KubectlDiscovery {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: Option<PathBuf>,
}

impl KubectlDiscovery {
    /// Discovery using `kubeconfig`, falling back to `$KUBECONFIG`
    pub fn new(runner: Arc<dyn CommandRunner>, kubeconfig: Option<PathBuf>) -> Self {
        let kubeconfig =
            kubeconfig.or_else(|| std::env::var_os("KUBECONFIG").map(PathBuf::from));
        Self { runner, kubeconfig }
    }
}

#[async_trait]
impl ClusterDiscovery for KubectlDiscovery {
    async fn cluster_info(&self) -> Result<ClusterInfo> {
        let mut args = to_args(["get", "nodes", "-o", "json"]);
        args.extend(kubeconfig_args(self.kubeconfig.as_deref()));
        let output = self.runner.run("kubectl", &args, &[]).await?;

        let nodes: ObjectList<Node> = serde_json::from_slice(&output.stdout)?;
        let kubelet_version = nodes
            .items
            .first()
            .and_then(|node| node.status.as_ref())
            .and_then(|status| status.node_info.as_ref())
            .map(|info| info.kubelet_version.clone())
            .ok_or_else(|| Error::cluster("no node found in the cluster"))?;

        let ingress = ingress_for_kubelet(&kubelet_version);
        info!(kubelet = %kubelet_version, ingress, "Detected cluster");
        Ok(ClusterInfo {
            kubeconfig: self.kubeconfig.clone(),
            ingress: ingress.to_string(),
        })
    }
}

/// Server pod coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerPod {
    name: String,
    namespace: String,
}

/// [`ScriptExecutor`] using `kubectl exec` and `kubectl run`
pub struct KubectlExecutor {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: Option<PathBuf>,
    namespace: String,
}

impl KubectlExecutor {
    /// Executor for the server release living in `namespace`
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        kubeconfig: Option<PathBuf>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            kubeconfig,
            namespace: namespace.into(),
        }
    }

    async fn kubectl(&self, mut args: Vec<String>) -> Result<String> {
        args.extend(kubeconfig_args(self.kubeconfig.as_deref()));
        Ok(self.runner.run("kubectl", &args, &[]).await?.stdout_str())
    }

    async fn server_pod(&self) -> Result<ServerPod> {
        let output = self
            .kubectl(to_args([
                "get",
                "pods",
                "--all-namespaces",
                "-l",
                SERVER_POD_SELECTOR,
                "-o",
                "json",
            ]))
            .await?;
        let pods: ObjectList<Pod> = serde_json::from_str(&output)?;

        pods.items
            .iter()
            .find(|pod| {
                pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
            })
            .and_then(|pod| {
                Some(ServerPod {
                    name: pod.metadata.name.clone()?,
                    namespace: pod.metadata.namespace.clone()?,
                })
            })
            .ok_or_else(|| Error::cluster("no running server pod found"))
    }

    async fn exec_in_server(&self, command: &[&str]) -> Result<String> {
        let pod = self.server_pod().await?;
        debug!(pod = %pod.name, namespace = %pod.namespace, "executing in server pod");
        let mut args = to_args([
            "exec",
            pod.name.as_str(),
            "--namespace",
            pod.namespace.as_str(),
            "-c",
            SERVER_CONTAINER,
            "--",
        ]);
        args.extend(to_args(command.iter().copied()));
        self.kubectl(args).await
    }
}

/// Short suffix for throwaway pod names
fn run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32;
    format!("{:06x}", (timestamp ^ std::process::id()) & 0xFFFFFF)
}

#[async_trait]
impl ScriptExecutor for KubectlExecutor {
    async fn run_script(&self, scratch_dir: &Path, script: &str) -> Result<()> {
        if !scratch_dir.join(script).is_file() {
            return Err(Error::execution(
                script,
                None,
                format!("script not found in {}", scratch_dir.display()),
            ));
        }

        info!(script, "Running script in the server");
        let path = format!("{}/{}", SERVER_DATA_MOUNT, script);
        self.exec_in_server(&["bash", path.as_str()])
            .await
            .map(|_| ())
            .map_err(|e| match e {
                Error::Execution {
                    status, message, ..
                } => Error::execution(script, status, message),
                other => other,
            })
    }

    async fn inspect_running(&self) -> Result<InspectData> {
        let output = self.exec_in_server(&["sh", "-c", INSPECT_SNIPPET]).await?;
        parse_inspect_output(&output)
    }

    async fn inspect_image(
        &self,
        image: &ImageReference,
        pull_policy: &str,
    ) -> Result<InspectData> {
        info!(image = %image, "Inspecting image");
        let pod_name = format!("mgradm-inspect-{}", run_id());
        let image_arg = format!("--image={}", image);
        let policy_arg = format!("--image-pull-policy={}", pull_policy);
        let output = self
            .kubectl(to_args([
                "run",
                pod_name.as_str(),
                "--namespace",
                self.namespace.as_str(),
                "--rm",
                "-i",
                "--quiet",
                "--restart=Never",
                image_arg.as_str(),
                policy_arg.as_str(),
                "--command",
                "--",
                "sh",
                "-c",
                INSPECT_SNIPPET,
            ]))
            .await?;
        parse_inspect_output(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use crate::image::compute_image;

    const PODS_JSON: &str = r#"{
  "apiVersion": "v1",
  "kind": "List",
  "items": [
    {
      "apiVersion": "v1",
      "kind": "Pod",
      "metadata": {"name": "uyuni-old", "namespace": "uyuni"},
      "status": {"phase": "Succeeded"}
    },
    {
      "apiVersion": "v1",
      "kind": "Pod",
      "metadata": {"name": "uyuni-7d9f", "namespace": "uyuni"},
      "status": {"phase": "Running"}
    }
  ]
}"#;

    fn nodes_json(kubelet: &str) -> String {
        format!(
            r#"{{"apiVersion":"v1","kind":"List","items":[{{"apiVersion":"v1","kind":"Node","metadata":{{"name":"node1"}},"status":{{"nodeInfo":{{"architecture":"amd64","bootID":"","containerRuntimeVersion":"","kernelVersion":"","kubeProxyVersion":"","kubeletVersion":"{}","machineID":"","operatingSystem":"linux","osImage":"","systemUUID":""}}}}}}]}}"#,
            kubelet
        )
    }

    #[test]
    fn test_parse_inspect_output() {
        let data =
            parse_inspect_output("timezone=Europe/Berlin\ndb_version=16\nrelease=2024.07\nnoise\n")
                .unwrap();
        assert_eq!(data.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(data.db_version, "16");
        assert_eq!(data.release.as_deref(), Some("2024.07"));
    }

    #[test]
    fn test_parse_inspect_output_requires_db_version() {
        let err = parse_inspect_output("timezone=UTC\ndb_version=\n").unwrap_err();
        assert!(matches!(err, Error::Data { .. }));
    }

    #[test]
    fn test_ingress_for_kubelet() {
        assert_eq!(ingress_for_kubelet("v1.30.2+k3s1"), INGRESS_TRAEFIK);
        assert_eq!(ingress_for_kubelet("v1.30.2+rke2r1"), INGRESS_NGINX);
        assert_eq!(ingress_for_kubelet("v1.30.2"), INGRESS_NGINX);
    }

    #[tokio::test]
    async fn test_discovery_detects_k3s() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| program == "kubectl" && args[..2] == ["get", "nodes"])
            .returning(|_, _, _| Ok(CommandOutput::from_stdout(nodes_json("v1.30.2+k3s1"))));

        let discovery = KubectlDiscovery::new(
            Arc::new(runner),
            Some(PathBuf::from("/etc/rancher/k3s/k3s.yaml")),
        );
        let info = discovery.cluster_info().await.unwrap();
        assert_eq!(info.ingress, INGRESS_TRAEFIK);
        assert_eq!(
            info.kubeconfig,
            Some(PathBuf::from("/etc/rancher/k3s/k3s.yaml"))
        );
    }

    #[tokio::test]
    async fn test_discovery_without_nodes_fails() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _| {
            Ok(CommandOutput::from_stdout(r#"{"apiVersion":"v1","kind":"List","items":[]}"#))
        });

        let discovery = KubectlDiscovery::new(Arc::new(runner), Some(PathBuf::from("/k")));
        assert!(matches!(
            discovery.cluster_info().await,
            Err(Error::Cluster { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_script_execs_in_running_pod() {
        let scratch = tempfile::tempdir().unwrap();
        std::fs::write(scratch.path().join("migrate.sh"), "#!/bin/bash\n").unwrap();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| args[0] == "get")
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::from_stdout(PODS_JSON)));
        runner
            .expect_run()
            .withf(|_, args, _| {
                args[..2] == ["exec", "uyuni-7d9f"]
                    && args.contains(&"/var/lib/uyuni-tools/migrate.sh".to_string())
            })
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::default()));

        let executor = KubectlExecutor::new(Arc::new(runner), None, "uyuni");
        executor
            .run_script(scratch.path(), "migrate.sh")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_script_failure_names_script() {
        let scratch = tempfile::tempdir().unwrap();
        std::fs::write(scratch.path().join("migrate.sh"), "#!/bin/bash\n").unwrap();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| args[0] == "get")
            .returning(|_, _, _| Ok(CommandOutput::from_stdout(PODS_JSON)));
        runner
            .expect_run()
            .withf(|_, args, _| args[0] == "exec")
            .returning(|_, _, _| Err(Error::execution("kubectl", Some(2), "rsync failed")));

        let executor = KubectlExecutor::new(Arc::new(runner), None, "uyuni");
        let err = executor
            .run_script(scratch.path(), "migrate.sh")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "migrate.sh failed with status 2: rsync failed");
    }

    #[tokio::test]
    async fn test_run_script_missing_script() {
        let scratch = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let executor = KubectlExecutor::new(Arc::new(runner), None, "uyuni");
        assert!(executor
            .run_script(scratch.path(), "migrate.sh")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_no_running_pod() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _| {
            Ok(CommandOutput::from_stdout(r#"{"apiVersion":"v1","kind":"List","items":[]}"#))
        });

        let executor = KubectlExecutor::new(Arc::new(runner), None, "uyuni");
        assert!(matches!(
            executor.inspect_running().await,
            Err(Error::Cluster { .. })
        ));
    }

    #[tokio::test]
    async fn test_inspect_image_uses_throwaway_pod() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args, _| {
                args[0] == "run"
                    && args.contains(&"--rm".to_string())
                    && args.contains(&"--image=server:5.1".to_string())
                    && args.contains(&"--image-pull-policy=Always".to_string())
            })
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::from_stdout("db_version=17\n")));

        let executor = KubectlExecutor::new(Arc::new(runner), None, "uyuni");
        let image = compute_image("server", "5.1").unwrap();
        let data = executor.inspect_image(&image, "Always").await.unwrap();
        assert_eq!(data.db_version, "17");
        assert_eq!(data.timezone, None);
    }
}
