//! Compute provider driven by external commands.
//!
//! Each operation runs an argv template from the configuration with `{name}`
//! and `{image}` substituted, e.g. a `gcloud compute instances` invocation.

use super::ComputeProvider;
use crate::config::ComputeConfig;
use crate::error::{ComputeError, ComputeResult};
use async_trait::async_trait;
use fleet_types::{ImageClass, WorkerName};
use tokio::process::Command;

/// Runs configured commands to manage workers.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    config: ComputeConfig,
}

/// Why a command ran and what a failure is reported as.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Create,
    Delete,
    Reset,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Reset => "reset",
        }
    }

    fn failure(self, worker: &WorkerName, reason: String) -> ComputeError {
        let worker = worker.clone();
        match self {
            Self::Create => ComputeError::Create { worker, reason },
            Self::Delete => ComputeError::Delete { worker, reason },
            Self::Reset => ComputeError::Reset { worker, reason },
        }
    }
}

impl CommandProvider {
    /// Create a provider from command templates.
    pub fn new(config: ComputeConfig) -> Self {
        Self { config }
    }

    fn template(&self, op: Operation) -> &[String] {
        match op {
            Operation::Create => &self.config.create,
            Operation::Delete => &self.config.delete,
            Operation::Reset => &self.config.reset,
        }
    }

    /// Expand a template for one worker.
    fn render(template: &[String], name: &WorkerName, image: Option<&ImageClass>) -> Vec<String> {
        template
            .iter()
            .map(|part| {
                let part = part.replace("{name}", name.as_str());
                match image {
                    Some(image) => part.replace("{image}", image.as_str()),
                    None => part,
                }
            })
            .collect()
    }

    async fn run(
        &self,
        op: Operation,
        name: &WorkerName,
        image: Option<&ImageClass>,
    ) -> ComputeResult<()> {
        let argv = Self::render(self.template(op), name, image);
        let (program, args) = argv
            .split_first()
            .ok_or(ComputeError::EmptyTemplate(op.label()))?;

        tracing::debug!("Running {} for {}: {:?}", op.label(), name, argv);

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ComputeError::Spawn {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(op.failure(
                name,
                format!("{} exited with {}: {}", program, output.status, stderr.trim()),
            ))
        }
    }
}

#[async_trait]
impl ComputeProvider for CommandProvider {
    async fn create(&self, name: &WorkerName, image_class: &ImageClass) -> ComputeResult<()> {
        self.run(Operation::Create, name, Some(image_class)).await
    }

    async fn delete(&self, name: &WorkerName) -> ComputeResult<()> {
        self.run(Operation::Delete, name, None).await
    }

    async fn reset(&self, name: &WorkerName) -> ComputeResult<()> {
        self.run(Operation::Reset, name, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn provider(create: &[&str], delete: &[&str], reset: &[&str]) -> CommandProvider {
        let argv = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect();
        CommandProvider::new(ComputeConfig {
            create: argv(create),
            delete: argv(delete),
            reset: argv(reset),
        })
    }

    #[test]
    fn render_substitutes_placeholders() {
        let config = Config::default().compute;
        let argv = CommandProvider::render(
            &config.create,
            &WorkerName::new("win10-abc123"),
            Some(&ImageClass::new("win10")),
        );
        assert!(argv.contains(&"win10-abc123".to_string()));
        assert!(argv.contains(&"--source-machine-image=win10".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_command_is_ok() {
        let p = provider(&["true"], &["true", "{name}"], &["true"]);
        let name = WorkerName::new("img-000001");
        p.create(&name, &ImageClass::new("img")).await.unwrap();
        p.delete(&name).await.unwrap();
        p.reset(&name).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_operation() {
        let p = provider(&["true"], &["true"], &["false"]);
        let err = p.reset(&WorkerName::new("img-000001")).await.unwrap_err();
        assert!(matches!(err, ComputeError::Reset { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let p = provider(&["/nonexistent/fleet-compute"], &["x"], &["x"]);
        let err = p
            .create(&WorkerName::new("img-000001"), &ImageClass::new("img"))
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn empty_template_is_rejected() {
        let p = provider(&[], &[], &[]);
        let err = p.delete(&WorkerName::new("img-000001")).await.unwrap_err();
        assert!(matches!(err, ComputeError::EmptyTemplate("delete")));
    }
}
