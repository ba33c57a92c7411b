//! Hook provider — maps provider capabilities onto shell commands.
//!
//! Each hook runs as `sh -c <command>` with the resource identity in its
//! environment:
//!
//! | variable               | value                              |
//! |------------------------|------------------------------------|
//! | `HAGRID_RESOURCE_ID`   | resource id                        |
//! | `HAGRID_RESOURCE_TYPE` | `host`, `control_vm`, ...          |
//! | `HAGRID_ADDRESS`       | configured address, if any         |
//! | `HAGRID_SINCE`         | activity reference (unix seconds)  |
//! | `HAGRID_PHASE`         | alert phase (`Fencing`/`Recovering`) |
//!
//! Check hooks answer with their exit code: 0 = yes, 1 = no, anything
//! else means the check could not be evaluated. Action hooks succeed on 0.
//! A hook still running after `kill_after` is killed and treated as failed,
//! so a hung script never pins a worker forever.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use hagrid_core::{HookSection, ResourceRef, ResourceType};
use tokio::process::Command;
use tracing::debug;

use crate::provider::{AlertPhase, ProviderFault, ProviderFuture, ResourceProvider};

/// Provider backed by configured shell hooks.
#[derive(Debug, Clone)]
pub struct HookProvider {
    resource_type: ResourceType,
    hooks: HookSection,
    /// Resource id → `host:port`, used by `activity_http` and exported to hooks.
    addresses: HashMap<String, String>,
    kill_after: Duration,
}

const DEFAULT_KILL_AFTER: Duration = Duration::from_secs(300);

impl HookProvider {
    pub fn new(resource_type: ResourceType, hooks: HookSection) -> Self {
        Self {
            resource_type,
            hooks,
            addresses: HashMap::new(),
            kill_after: DEFAULT_KILL_AFTER,
        }
    }

    pub fn with_kill_after(mut self, limit: Duration) -> Self {
        self.kill_after = limit;
        self
    }

    pub fn with_address(mut self, resource_id: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.insert(resource_id.into(), address.into());
        self
    }

    pub fn add_address(&mut self, resource_id: impl Into<String>, address: impl Into<String>) {
        self.addresses.insert(resource_id.into(), address.into());
    }

    /// Run a hook and return its exit code.
    async fn run_hook(
        &self,
        command: &str,
        resource: &ResourceRef,
        extra: &[(&str, String)],
    ) -> Result<i32, String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env("HAGRID_RESOURCE_ID", &resource.id)
            .env("HAGRID_RESOURCE_TYPE", resource.resource_type.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(address) = self.addresses.get(&resource.id) {
            cmd.env("HAGRID_ADDRESS", address);
        }
        for (key, value) in extra {
            cmd.env(key, value);
        }

        let output = match tokio::time::timeout(self.kill_after, cmd.output()).await {
            Ok(output) => output.map_err(|e| format!("failed to spawn hook: {e}"))?,
            Err(_) => return Err(format!("hook killed after {:?}", self.kill_after)),
        };
        let code = output
            .status
            .code()
            .ok_or_else(|| "hook terminated by signal".to_string())?;

        debug!(
            resource = %resource,
            %command,
            code,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "hook finished"
        );
        Ok(code)
    }

    /// Yes/no check hook: exit 0/1, anything else is indeterminate.
    async fn check(
        &self,
        command: &str,
        resource: &ResourceRef,
        extra: &[(&str, String)],
    ) -> Result<bool, ProviderFault> {
        match self.run_hook(command, resource, extra).await {
            Ok(0) => Ok(true),
            Ok(1) => Ok(false),
            Ok(code) => Err(ProviderFault::Indeterminate(format!(
                "check hook exited with {code}"
            ))),
            Err(e) => Err(ProviderFault::Indeterminate(e)),
        }
    }

    /// Fence/recover hook: exit 0 succeeds, non-zero fails.
    async fn action(&self, command: Option<&str>, what: &str, resource: &ResourceRef) -> Result<bool, ProviderFault> {
        let Some(command) = command else {
            return Err(ProviderFault::Action(format!("no {what} hook configured")));
        };
        match self.run_hook(command, resource, &[]).await {
            Ok(code) => Ok(code == 0),
            Err(e) => Err(ProviderFault::Action(e)),
        }
    }

    /// Optional side-effect hook; unset means nothing to do.
    async fn side_effect(
        &self,
        command: Option<&str>,
        resource: &ResourceRef,
        extra: &[(&str, String)],
    ) -> Result<(), ProviderFault> {
        let Some(command) = command else {
            return Ok(());
        };
        match self.run_hook(command, resource, extra).await {
            Ok(0) => Ok(()),
            Ok(code) => Err(ProviderFault::Action(format!("hook exited with {code}"))),
            Err(e) => Err(ProviderFault::Action(e)),
        }
    }
}

impl ResourceProvider for HookProvider {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    fn is_healthy<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            match self.hooks.health.as_deref() {
                Some(command) => self.check(command, resource, &[]).await,
                None => Ok(true),
            }
        })
    }

    fn has_activity<'a>(
        &'a self,
        resource: &'a ResourceRef,
        since: u64,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            if let Some(path) = self.hooks.activity_http.as_deref() {
                let Some(address) = self.addresses.get(&resource.id) else {
                    return Err(ProviderFault::Indeterminate(format!(
                        "no address known for {resource}"
                    )));
                };
                return http_activity(address, path).await;
            }
            match self.hooks.activity.as_deref() {
                Some(command) => {
                    self.check(command, resource, &[("HAGRID_SINCE", since.to_string())])
                        .await
                }
                None => Err(ProviderFault::Indeterminate(
                    "no activity hook configured".to_string(),
                )),
            }
        })
    }

    fn fence<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, bool> {
        Box::pin(self.action(self.hooks.fence.as_deref(), "fence", resource))
    }

    fn recover<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, bool> {
        Box::pin(self.action(self.hooks.recover.as_deref(), "recover", resource))
    }

    fn fence_dependents<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, ()> {
        Box::pin(self.side_effect(self.hooks.fence_dependents.as_deref(), resource, &[]))
    }

    fn release_dependents<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, ()> {
        Box::pin(self.side_effect(self.hooks.release_dependents.as_deref(), resource, &[]))
    }

    fn enable_maintenance<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, ()> {
        Box::pin(self.side_effect(self.hooks.maintenance.as_deref(), resource, &[]))
    }

    fn send_alert<'a>(
        &'a self,
        resource: &'a ResourceRef,
        phase: AlertPhase,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.side_effect(
                self.hooks.alert.as_deref(),
                resource,
                &[("HAGRID_PHASE", phase.to_string())],
            )
            .await
        })
    }
}

/// HTTP GET `path` on `address`: 2xx means active.
///
/// An unreachable resource is inactive, not indeterminate; only a request
/// that cannot even be built is.
async fn http_activity(address: &str, path: &str) -> Result<bool, ProviderFault> {
    let uri = format!("http://{address}{path}");

    let stream = match tokio::net::TcpStream::connect(address).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, %uri, "activity probe connection failed");
            return Ok(false);
        }
    };

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %uri, "activity probe handshake failed");
            return Ok(false);
        }
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "hagrid-health/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| ProviderFault::Indeterminate(format!("bad probe request {uri}: {e}")))?;

    match sender.send_request(req).await {
        Ok(resp) if resp.status().is_success() => Ok(true),
        Ok(resp) => {
            debug!(status = %resp.status(), %uri, "activity probe non-2xx");
            Ok(false)
        }
        Err(e) => {
            debug!(error = %e, %uri, "activity probe request failed");
            Ok(false)
        }
    }
}
