//! Per-instance promotion: package, compress, upload, publish.

use crate::archiver;
use crate::naming::{archive_name, artifact_name};
use gantry_core::artifact::{ArchiveFile, Artifact};
use gantry_core::event::Event;
use gantry_core::interpolation::InterpolationContext;
use gantry_core::ports::{ActionInvoker, ActionRequest, ReleaseStore};
use gantry_core::run::{JobInstance, PromotionReport, PromotionStage, StageReport, StageStatus};
use gantry_core::workflow::{ArchiveFormat, PromotionSpec, UploadSpec};
use gantry_core::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Gate outcomes for the gated promotion stages, computed once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromotionGates {
    pub package: bool,
    pub upload: bool,
    pub publish: bool,
}

/// Everything one instance hands to the pipeline.
pub struct PromotionRequest<'a> {
    pub instance: &'a JobInstance,
    pub spec: &'a PromotionSpec,
    pub gates: PromotionGates,
    pub event: &'a Event,
    /// Instance workspace containing the build output.
    pub workspace: &'a Path,
    /// Instance-local directory receiving the compressed archive.
    pub archive_dir: &'a Path,
    pub context: &'a InterpolationContext,
    pub env: &'a BTreeMap<String, String>,
}

pub struct PromotionPipeline {
    releases: Arc<dyn ReleaseStore>,
    invoker: Option<Arc<dyn ActionInvoker>>,
}

impl PromotionPipeline {
    pub fn new(releases: Arc<dyn ReleaseStore>) -> Self {
        Self {
            releases,
            invoker: None,
        }
    }

    /// Invoker used by the optional upload stage.
    pub fn with_invoker(mut self, invoker: Arc<dyn ActionInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Report for an instance whose steps failed before promotion could start.
    pub fn not_run(spec: &PromotionSpec) -> PromotionReport {
        Report::new(spec).finish()
    }

    /// Run every stage in order. A failure aborts only the remaining stages.
    pub async fn run(&self, request: &PromotionRequest<'_>) -> PromotionReport {
        let spec = request.spec;
        let instance = request.instance;
        let mut report = Report::new(spec);

        if !request.gates.package {
            info!(
                job = %instance.job_name,
                instance = %instance.id,
                stage = "package",
                "Promotion skipped by gate"
            );
            report.record(PromotionStage::Package, StageStatus::SkippedByGate, None);
            return report.finish();
        }

        let artifact = match self
            .package(spec, instance, request.workspace, request.context)
            .await
        {
            Ok(artifact) => {
                report.inner.artifact = Some(artifact.logical_name.clone());
                report.record(
                    PromotionStage::Package,
                    StageStatus::Succeeded,
                    Some(artifact.path.display().to_string()),
                );
                artifact
            }
            Err(e) => {
                warn!(job = %instance.job_name, instance = %instance.id, error = %e, "Package failed");
                report.record(PromotionStage::Package, StageStatus::Failed, Some(e.to_string()));
                return report.finish();
            }
        };

        let archive = match self.compress(&artifact, spec.format, request.archive_dir).await {
            Ok(archive) => {
                report.inner.archive = Some(archive.file_name.clone());
                report.record(
                    PromotionStage::Compress,
                    StageStatus::Succeeded,
                    Some(format!("{} bytes, sha256 {}", archive.size_bytes, archive.sha256)),
                );
                archive
            }
            Err(e) => {
                warn!(job = %instance.job_name, instance = %instance.id, error = %e, "Compress failed");
                report.record(PromotionStage::Compress, StageStatus::Failed, Some(e.to_string()));
                return report.finish();
            }
        };

        if let Some(upload) = &spec.upload {
            if !request.gates.upload {
                info!(
                    job = %instance.job_name,
                    instance = %instance.id,
                    stage = "upload",
                    "Promotion skipped by gate"
                );
                report.record(PromotionStage::Upload, StageStatus::SkippedByGate, None);
            } else if let Err(e) = self.upload(upload, &archive, request).await {
                warn!(job = %instance.job_name, instance = %instance.id, error = %e, "Upload failed");
                report.record(PromotionStage::Upload, StageStatus::Failed, Some(e.to_string()));
                return report.finish();
            } else {
                report.record(PromotionStage::Upload, StageStatus::Succeeded, None);
            }
        }

        if !request.gates.publish {
            info!(
                job = %instance.job_name,
                instance = %instance.id,
                stage = "publish",
                git_ref = %request.event.git_ref(),
                "Promotion skipped by gate"
            );
            report.record(PromotionStage::Publish, StageStatus::SkippedByGate, None);
            return report.finish();
        }

        let Some(tag) = request.event.tag() else {
            report.record(
                PromotionStage::Publish,
                StageStatus::SkippedByGate,
                Some(format!("no tag in ref {}", request.event.git_ref())),
            );
            return report.finish();
        };

        match self.publish(tag, &archive).await {
            Ok(()) => {
                report.inner.release_tag = Some(tag.to_string());
                report.record(PromotionStage::Publish, StageStatus::Succeeded, None);
            }
            Err(e) => {
                warn!(tag = %tag, archive = %archive.file_name, error = %e, "Publish failed");
                report.record(PromotionStage::Publish, StageStatus::Failed, Some(e.to_string()));
            }
        }
        report.finish()
    }

    /// Bundle the instance's build output directory into an artifact.
    pub async fn package(
        &self,
        spec: &PromotionSpec,
        instance: &JobInstance,
        workspace: &Path,
        context: &InterpolationContext,
    ) -> Result<Artifact> {
        let path = workspace.join(context.interpolate(&spec.output_dir));
        let is_dir = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir());
        if !is_dir {
            return Err(Error::BuildOutputMissing(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        if tokio::fs::read_dir(&path).await?.next_entry().await?.is_none() {
            return Err(Error::BuildOutputMissing(format!("{} is empty", path.display())));
        }

        Ok(Artifact {
            owner: instance.id,
            job_name: instance.job_name.clone(),
            path,
            logical_name: artifact_name(spec, &instance.axis_assignment),
        })
    }

    /// Archive an artifact into `archive_dir`.
    pub async fn compress(
        &self,
        artifact: &Artifact,
        format: ArchiveFormat,
        archive_dir: &Path,
    ) -> Result<ArchiveFile> {
        tokio::fs::create_dir_all(archive_dir).await?;
        let file_name = archive_name(&artifact.logical_name, format);
        let output: PathBuf = archive_dir.join(&file_name);

        let source = artifact.path.clone();
        let root_name = artifact.logical_name.clone();
        let target = output.clone();
        let (size_bytes, sha256) = tokio::task::spawn_blocking(move || {
            archiver::create_archive(&source, &target, &root_name, format)?;
            checksum(&target)
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

        info!(
            artifact = %artifact.logical_name,
            archive = %file_name,
            size_bytes,
            "Compressed artifact"
        );

        Ok(ArchiveFile {
            logical_name: artifact.logical_name.clone(),
            file_name,
            path: output,
            format,
            size_bytes,
            sha256,
        })
    }

    async fn upload(
        &self,
        upload: &UploadSpec,
        archive: &ArchiveFile,
        request: &PromotionRequest<'_>,
    ) -> Result<()> {
        let invoker = self
            .invoker
            .as_ref()
            .ok_or_else(|| Error::Internal("no action invoker configured for upload".into()))?;

        let mut env = request.context.interpolate_map(request.env);
        env.insert("GANTRY_ARCHIVE".into(), archive.path.display().to_string());
        env.insert("GANTRY_ARTIFACT".into(), archive.logical_name.clone());

        let mut action = upload.action.clone();
        action.params = request.context.interpolate_map(&upload.action.params);

        let instance = request.instance;
        let action_request = ActionRequest {
            workflow: instance.workflow.clone(),
            job_name: instance.job_name.clone(),
            instance_id: instance.id,
            instance_name: instance.display_name(),
            step_name: "upload".into(),
            platform: instance.platform.clone(),
            matrix: instance.axis_assignment.clone(),
            event_ref: request.event.git_ref().to_string(),
            action,
            workspace: request.workspace.to_path_buf(),
            env,
        };

        let outcome = invoker.invoke(&action_request).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(Error::StepFailed {
                exit_code: outcome.exit_code,
                message: outcome.message.unwrap_or_else(|| "upload action failed".into()),
            })
        }
    }

    /// Attach an archive to the release keyed by `tag`.
    pub async fn publish(&self, tag: &str, archive: &ArchiveFile) -> Result<()> {
        self.releases.attach(tag, archive).await?;
        Ok(())
    }
}

fn checksum(path: &Path) -> Result<(u64, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}

/// Accumulates stage outcomes; stages never reached are reported as not run.
struct Report {
    inner: PromotionReport,
    planned: Vec<PromotionStage>,
}

impl Report {
    fn new(spec: &PromotionSpec) -> Self {
        let mut planned = vec![PromotionStage::Package, PromotionStage::Compress];
        if spec.upload.is_some() {
            planned.push(PromotionStage::Upload);
        }
        planned.push(PromotionStage::Publish);
        Self {
            inner: PromotionReport::default(),
            planned,
        }
    }

    fn record(&mut self, stage: PromotionStage, status: StageStatus, detail: Option<String>) {
        self.inner.stages.push(StageReport {
            stage,
            status,
            detail,
        });
    }

    fn finish(mut self) -> PromotionReport {
        for stage in self.planned {
            if self.inner.stage(stage).is_none() {
                self.inner.stages.push(StageReport {
                    stage,
                    status: StageStatus::NotRun,
                    detail: None,
                });
            }
        }
        self.inner
    }
}
