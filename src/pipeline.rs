// 🧭 Pipeline Descriptor - container stages wired into a DAG
// The graph is plain data handed to an external orchestrator; nothing in
// this crate schedules it. compile() lowers it to an Argo-style workflow.
//
//   revised:  train -> resultsgen -> score
//   serving:  train -> serve -> resultsgen

use crate::config::ImageConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

pub const PIPELINE_NAME: &str = "trackml";
pub const PIPELINE_DESCRIPTION: &str = "A pipeline that predicts particle tracks";

/// Binary the trackml image runs for each stage
pub const STAGE_BINARY: &str = "trackml-pipeline";

pub const GCP_SECRET_NAME: &str = "user-gcp-sa";
pub const GCP_SECRET_VOLUME: &str = "gcp-credentials";
pub const GCP_SECRET_MOUNT: &str = "/secret/gcp-credentials";
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

// ============================================================================
// CONTAINER OP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerOp {
    pub name: String,
    pub image: String,
    pub tag: String,
    pub command: Vec<String>,
    pub arguments: Vec<String>,
    pub use_gcp_secret: bool,
    pub gpu_limit: Option<u32>,
}

impl ContainerOp {
    pub fn new(name: &str, image: &str, tag: &str) -> Self {
        ContainerOp {
            name: name.to_string(),
            image: image.to_string(),
            tag: tag.to_string(),
            command: Vec::new(),
            arguments: Vec::new(),
            use_gcp_secret: false,
            gpu_limit: None,
        }
    }

    /// Builder pattern: container entrypoint
    pub fn with_command(mut self, command: &[&str]) -> Self {
        self.command = command.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Builder pattern: container arguments
    pub fn with_arguments(mut self, arguments: &[&str]) -> Self {
        self.arguments = arguments.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Builder pattern: mount the GCP service-account secret
    pub fn apply_gcp_secret(mut self) -> Self {
        self.use_gcp_secret = true;
        self
    }

    /// Builder pattern: request GPUs
    pub fn set_gpu_limit(mut self, gpus: u32) -> Self {
        self.gpu_limit = Some(gpus);
        self
    }

    /// `image:tag`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PipelineVariant {
    /// train -> resultsgen -> score
    Revised,
    /// train -> serve -> resultsgen
    Serving,
}

impl PipelineVariant {
    pub fn build(&self, images: &ImageConfig) -> Pipeline {
        match self {
            PipelineVariant::Revised => trackml_pipeline(images),
            PipelineVariant::Serving => trackml_serving_pipeline(images),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub description: String,
    pub ops: Vec<ContainerOp>,

    /// (op, upstream op it runs after)
    pub dependencies: Vec<(String, String)>,
}

impl Pipeline {
    pub fn new(name: &str, description: &str) -> Self {
        Pipeline {
            name: name.to_string(),
            description: description.to_string(),
            ..Pipeline::default()
        }
    }

    pub fn add_op(&mut self, op: ContainerOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Declare that `op` runs after `upstream`
    pub fn after(&mut self, op: &str, upstream: &str) -> &mut Self {
        self.dependencies.push((op.to_string(), upstream.to_string()));
        self
    }

    pub fn op(&self, name: &str) -> Option<&ContainerOp> {
        self.ops.iter().find(|op| op.name == name)
    }

    /// Upstream ops of `name`, in declaration order, without repeats
    pub fn upstream_of(&self, name: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.dependencies
            .iter()
            .filter(|(op, _)| op == name)
            .map(|(_, upstream)| upstream.as_str())
            .filter(|upstream| seen.insert(*upstream))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Pipeline name must not be empty");
        }

        let mut names = HashSet::new();
        for op in &self.ops {
            if op.name.trim().is_empty() {
                bail!("Pipeline {} has an op without a name", self.name);
            }
            // The pipeline's own DAG template shares the template namespace
            if op.name == self.name {
                bail!("Op {} has the same name as its pipeline", op.name);
            }
            if !names.insert(op.name.as_str()) {
                bail!("Duplicate op name: {}", op.name);
            }
        }

        for (op, upstream) in &self.dependencies {
            if !names.contains(op.as_str()) {
                bail!("Dependency refers to unknown op: {}", op);
            }
            if !names.contains(upstream.as_str()) {
                bail!("Op {} runs after unknown op: {}", op, upstream);
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Ops in an order that respects every dependency.
    /// Among ops that are ready at the same time, declaration order wins.
    pub fn topological_order(&self) -> Result<Vec<&ContainerOp>> {
        let mut pending: HashMap<&str, usize> =
            self.ops.iter().map(|op| (op.name.as_str(), 0)).collect();
        for op in &self.ops {
            if let Some(count) = pending.get_mut(op.name.as_str()) {
                *count = self.upstream_of(&op.name).len();
            }
        }

        let mut order: Vec<&ContainerOp> = Vec::with_capacity(self.ops.len());
        let mut done: HashSet<&str> = HashSet::new();

        while order.len() < self.ops.len() {
            let next = self
                .ops
                .iter()
                .find(|op| !done.contains(op.name.as_str()) && pending[op.name.as_str()] == 0);

            let Some(next) = next else {
                let mut stuck: Vec<&str> = self
                    .ops
                    .iter()
                    .map(|op| op.name.as_str())
                    .filter(|name| !done.contains(name))
                    .collect();
                stuck.sort_unstable();
                bail!("Pipeline {} has a dependency cycle among: {}", self.name, stuck.join(", "));
            };

            done.insert(next.name.as_str());
            order.push(next);

            for op in &self.ops {
                if self.upstream_of(&op.name).contains(&next.name.as_str()) {
                    if let Some(count) = pending.get_mut(op.name.as_str()) {
                        *count -= 1;
                    }
                }
            }
        }

        Ok(order)
    }
}

// ============================================================================
// TRACKML PIPELINES
// ============================================================================

fn stage_op(name: &str, images: &ImageConfig) -> ContainerOp {
    ContainerOp::new(name, &images.trackml_image, &images.trackml_version)
        .with_command(&[STAGE_BINARY])
        .with_arguments(&[name])
        .apply_gcp_secret()
}

/// Current pipeline: train -> resultsgen -> score
pub fn trackml_pipeline(images: &ImageConfig) -> Pipeline {
    let mut pipeline = Pipeline::new(PIPELINE_NAME, PIPELINE_DESCRIPTION);
    pipeline
        .add_op(stage_op("train", images))
        .add_op(stage_op("resultsgen", images))
        .add_op(stage_op("score", images))
        .after("resultsgen", "train")
        .after("score", "resultsgen");
    pipeline
}

/// Earlier variant that deploys a serving manifest between train and resultsgen
pub fn trackml_serving_pipeline(images: &ImageConfig) -> Pipeline {
    let serve = ContainerOp::new("serve", &images.kubectl_image, &images.kubectl_version)
        .with_arguments(&[
            "/src/set_kubectl.sh",
            "--namespace",
            "kubeflow",
            "--command",
            "apply -f /src/k8s/serve.yaml",
        ])
        .apply_gcp_secret();

    let mut pipeline = Pipeline::new(PIPELINE_NAME, PIPELINE_DESCRIPTION);
    pipeline
        .add_op(stage_op("train", images))
        .add_op(serve)
        .add_op(stage_op("resultsgen", images))
        .after("serve", "train")
        .after("resultsgen", "serve");
    pipeline
}

// ============================================================================
// WORKFLOW (compiled artifact)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub api_version: String,
    pub kind: String,
    pub metadata: WorkflowMetadata,
    pub spec: WorkflowSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub generate_name: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub entrypoint: String,
    pub templates: Vec<Template>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag: Option<Dag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub tasks: Vec<DagTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagTask {
    pub name: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub secret: SecretSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub limits: BTreeMap<String, String>,
}

impl Workflow {
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.spec.templates.iter().find(|t| t.name == name)
    }
}

fn container_for(op: &ContainerOp) -> Container {
    let mut container = Container {
        image: op.image_ref(),
        command: op.command.clone(),
        args: op.arguments.clone(),
        env: Vec::new(),
        volume_mounts: Vec::new(),
        resources: None,
    };

    if op.use_gcp_secret {
        container.env.push(EnvVar {
            name: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            value: format!("{}/{}.json", GCP_SECRET_MOUNT, GCP_SECRET_NAME),
        });
        container.volume_mounts.push(VolumeMount {
            name: GCP_SECRET_VOLUME.to_string(),
            mount_path: GCP_SECRET_MOUNT.to_string(),
        });
    }

    if let Some(gpus) = op.gpu_limit {
        let mut limits = BTreeMap::new();
        limits.insert(GPU_RESOURCE.to_string(), gpus.to_string());
        container.resources = Some(Resources { limits });
    }

    container
}

/// Lower a pipeline into a workflow the orchestrator can submit
pub fn compile(pipeline: &Pipeline) -> Result<Workflow> {
    pipeline.validate()?;
    let order = pipeline.topological_order()?;

    let tasks = order
        .iter()
        .map(|op| DagTask {
            name: op.name.clone(),
            template: op.name.clone(),
            dependencies: pipeline
                .upstream_of(&op.name)
                .into_iter()
                .map(String::from)
                .collect(),
        })
        .collect();

    let mut templates = vec![Template {
        name: pipeline.name.clone(),
        dag: Some(Dag { tasks }),
        container: None,
    }];
    templates.extend(order.iter().map(|op| Template {
        name: op.name.clone(),
        dag: None,
        container: Some(container_for(op)),
    }));

    let mut volumes = Vec::new();
    if pipeline.ops.iter().any(|op| op.use_gcp_secret) {
        volumes.push(Volume {
            name: GCP_SECRET_VOLUME.to_string(),
            secret: SecretSource {
                secret_name: GCP_SECRET_NAME.to_string(),
            },
        });
    }

    let mut annotations = BTreeMap::new();
    annotations.insert(
        "pipelines.kubeflow.org/pipeline_spec".to_string(),
        serde_json::json!({
            "name": pipeline.name,
            "description": pipeline.description,
        })
        .to_string(),
    );

    Ok(Workflow {
        api_version: "argoproj.io/v1alpha1".to_string(),
        kind: "Workflow".to_string(),
        metadata: WorkflowMetadata {
            generate_name: format!("{}-", pipeline.name),
            annotations,
        },
        spec: WorkflowSpec {
            entrypoint: pipeline.name.clone(),
            templates,
            volumes,
        },
    })
}

pub fn write_workflow(path: &Path, workflow: &Workflow) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    std::fs::write(path, serde_json::to_string_pretty(workflow)?)
        .with_context(|| format!("Failed to write workflow {:?}", path))?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ops: &[&ContainerOp]) -> Vec<String> {
        ops.iter().map(|op| op.name.clone()).collect()
    }

    #[test]
    fn test_revised_pipeline_order() {
        let pipeline = trackml_pipeline(&ImageConfig::default());

        pipeline.validate().unwrap();
        let order = pipeline.topological_order().unwrap();
        assert_eq!(names(&order), vec!["train", "resultsgen", "score"]);
        assert_eq!(pipeline.upstream_of("score"), vec!["resultsgen"]);
    }

    #[test]
    fn test_serving_pipeline_uses_kubectl_image() {
        let pipeline = trackml_serving_pipeline(&ImageConfig::default());

        let order = pipeline.topological_order().unwrap();
        assert_eq!(names(&order), vec!["train", "serve", "resultsgen"]);

        let serve = pipeline.op("serve").unwrap();
        assert_eq!(serve.image_ref(), "gcr.io/mcas-195423/trackml_master_kfp_kubectl:1");
        assert!(serve.command.is_empty());
        assert_eq!(serve.arguments.last().unwrap(), "apply -f /src/k8s/serve.yaml");
    }

    #[test]
    fn test_order_follows_dependencies_not_declaration() {
        let mut pipeline = Pipeline::new("p", "");
        pipeline
            .add_op(ContainerOp::new("score", "img", "1"))
            .add_op(ContainerOp::new("train", "img", "1"))
            .add_op(ContainerOp::new("resultsgen", "img", "1"))
            .after("score", "resultsgen")
            .after("resultsgen", "train");

        let order = pipeline.topological_order().unwrap();
        assert_eq!(names(&order), vec!["train", "resultsgen", "score"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut pipeline = Pipeline::new("p", "");
        pipeline
            .add_op(ContainerOp::new("a", "img", "1"))
            .add_op(ContainerOp::new("b", "img", "1"))
            .add_op(ContainerOp::new("c", "img", "1"))
            .after("a", "b")
            .after("b", "a");

        let err = pipeline.validate().unwrap_err().to_string();
        assert!(err.contains("cycle among: a, b"), "{}", err);
    }

    #[test]
    fn test_unknown_and_duplicate_ops_rejected() {
        let mut pipeline = Pipeline::new("p", "");
        pipeline
            .add_op(ContainerOp::new("a", "img", "1"))
            .after("a", "ghost");
        assert!(pipeline.validate().unwrap_err().to_string().contains("ghost"));

        let mut pipeline = Pipeline::new("p", "");
        pipeline
            .add_op(ContainerOp::new("a", "img", "1"))
            .add_op(ContainerOp::new("a", "img", "2"));
        assert!(pipeline.validate().unwrap_err().to_string().contains("Duplicate op name"));
    }

    #[test]
    fn test_op_named_like_pipeline_rejected() {
        let mut pipeline = Pipeline::new("trackml", "");
        pipeline.add_op(ContainerOp::new("trackml", "img", "1"));

        let err = compile(&pipeline).unwrap_err().to_string();
        assert!(err.contains("same name as its pipeline"), "{}", err);
    }

    #[test]
    fn test_compile_revised_pipeline() {
        let workflow = compile(&trackml_pipeline(&ImageConfig::default())).unwrap();

        assert_eq!(workflow.api_version, "argoproj.io/v1alpha1");
        assert_eq!(workflow.metadata.generate_name, "trackml-");
        assert_eq!(workflow.spec.entrypoint, "trackml");
        assert_eq!(workflow.spec.templates.len(), 4);
        assert_eq!(workflow.spec.volumes.len(), 1);
        assert_eq!(workflow.spec.volumes[0].secret.secret_name, GCP_SECRET_NAME);

        let dag = workflow.template("trackml").unwrap().dag.as_ref().unwrap();
        assert_eq!(dag.tasks[0].name, "train");
        assert!(dag.tasks[0].dependencies.is_empty());
        assert_eq!(dag.tasks[2].dependencies, vec!["resultsgen"]);

        let score = workflow.template("score").unwrap().container.as_ref().unwrap();
        assert_eq!(score.image, "gcr.io/mcas-195423/trackml_master_trackml:1");
        assert_eq!(score.command, vec![STAGE_BINARY]);
        assert_eq!(score.args, vec!["score"]);
        assert_eq!(
            score.env[0].value,
            "/secret/gcp-credentials/user-gcp-sa.json"
        );
    }

    #[test]
    fn test_compiled_json_shape() {
        let workflow = compile(&trackml_serving_pipeline(&ImageConfig::default())).unwrap();
        let value = serde_json::to_value(&workflow).unwrap();

        assert_eq!(value["apiVersion"], "argoproj.io/v1alpha1");
        assert_eq!(value["kind"], "Workflow");
        assert_eq!(
            value["spec"]["templates"][2]["container"]["volumeMounts"][0]["mountPath"],
            GCP_SECRET_MOUNT
        );
        // Entry template carries no container
        assert!(value["spec"]["templates"][0].get("container").is_none());
    }

    #[test]
    fn test_gpu_limit_in_resources() {
        let mut pipeline = Pipeline::new("gpu", "");
        pipeline.add_op(ContainerOp::new("train", "img", "2").set_gpu_limit(1));

        let workflow = compile(&pipeline).unwrap();
        let container = workflow.template("train").unwrap().container.as_ref().unwrap();

        assert_eq!(container.resources.as_ref().unwrap().limits[GPU_RESOURCE], "1");
        assert!(container.env.is_empty());
        assert!(workflow.spec.volumes.is_empty());
    }

    #[test]
    fn test_write_workflow() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out/trackml.json");
        let workflow = compile(&trackml_pipeline(&ImageConfig::default())).unwrap();

        write_workflow(&path, &workflow).unwrap();
        let loaded: Workflow =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, workflow);
    }
}
