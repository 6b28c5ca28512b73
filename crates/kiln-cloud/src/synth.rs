//! Resource graph synthesis.
//!
//! [`synthesize`] runs a fixed sequence of [`TemplateBuilder`] stages. Each
//! stage consumes the builder and returns it with its resources added, so
//! any prefix of the chain is itself a usable graph for tests.

use kiln_core::{RegistryCredentials, StackConfig};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Value, json};

use crate::origin::{CachePlan, ImageOriginResolver};
use crate::sizing::fargate_size;
use crate::template::{
    DeletionPolicy, Resource, ResourceKind, Tag, Template, TemplateError, get_att, ref_to, sub,
};

pub const PROJECT_NAME: &str = "kiln";
pub const CONTAINER_NAME: &str = "app";
pub const LOG_STREAM_PREFIX: &str = "kiln";
pub const STOP_TIMEOUT_SECS: u32 = 120;
pub const LOG_RETENTION_DAYS: u32 = 1;
pub const VPC_CIDR: &str = "10.0.0.0/16";
pub const SUBNET_CIDR: &str = "10.0.0.0/20";

const POLICY_VERSION: &str = "2012-10-17";
const ANYWHERE: &str = "0.0.0.0/0";

/// Logical ids. Downstream tooling addresses resources by these names.
pub mod ids {
    pub const BUCKET: &str = "Bucket";
    pub const CLUSTER: &str = "Cluster";
    pub const CAPACITY_PROVIDER: &str = "CapacityProvider";
    pub const LOG_GROUP: &str = "LogGroup";
    pub const PULL_THROUGH_CACHE: &str = "PullThroughCache";
    pub const PRIVATE_REPO_SECRET: &str = "PrivateRepoSecret";
    pub const EXECUTION_ROLE: &str = "ExecutionRole";
    pub const TASK_ROLE: &str = "TaskRole";
    pub const TASK_DEFINITION: &str = "TaskDefinition";
    pub const VPC: &str = "VPC";
    pub const INTERNET_GATEWAY: &str = "InternetGateway";
    pub const INTERNET_GATEWAY_ATTACHMENT: &str = "InternetGatewayAttachment";
    pub const ROUTE_TABLE: &str = "RouteTable";
    pub const ROUTE: &str = "Route";
    pub const SUBNET: &str = "Subnet";
    pub const SUBNET_ROUTE_TABLE_ASSOCIATION: &str = "SubnetRouteTableAssociation";
    pub const S3_GATEWAY_ENDPOINT: &str = "S3GatewayEndpoint";
    pub const SECURITY_GROUP: &str = "SecurityGroup";
}

/// Stack output names.
pub mod outputs {
    pub const TASK_DEF_ARN: &str = "TaskDefArn";
    pub const CLUSTER_NAME: &str = "ClusterName";
    pub const LOG_GROUP_ARN: &str = "LogGroupARN";
    pub const SECURITY_GROUP_ID: &str = "SecurityGroupID";
    pub const BUCKET_NAME: &str = "BucketName";
    pub const SUBNET_ID: &str = "SubnetID";
}

#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    /// A condition that can only arise from a bug in the synthesizer.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Inputs beyond the stack itself.
#[derive(Debug, Clone)]
pub struct SynthOptions {
    /// Own the VPC, subnet and routing instead of using an existing network.
    pub create_network: bool,
    /// Docker Hub credentials for the pull-through cache.
    pub credentials: Option<RegistryCredentials>,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            create_network: true,
            credentials: None,
        }
    }
}

/// Build the complete template for one stack.
///
/// Pure: no I/O, and a fresh [`Template`] on every call.
pub fn synthesize(stack: &StackConfig, options: &SynthOptions) -> Result<Template, SynthError> {
    let resolver = ImageOriginResolver::new(options.credentials.clone());

    let builder = TemplateBuilder::new(&stack.stack_name)
        .state_bucket()
        .cluster()
        .capacity_provider(stack.spot)
        .log_group()
        .image_cache(&resolver, &stack.image)?
        .iam_roles()
        .task_definition(stack)
        .network(options.create_network)
        .security_group()
        .outputs();

    let template = builder.finish()?;
    tracing::debug!(
        stack = %stack.stack_name,
        resources = template.resources.len(),
        outputs = template.outputs.len(),
        "synthesized template"
    );
    Ok(template)
}

/// Staged template construction.
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    prefix: String,
    default_tags: Vec<Tag>,
    template: Template,
    image: Option<Value>,
    vpc_id: Option<Value>,
    /// First construction error; reported by [`TemplateBuilder::finish`].
    defect: Option<TemplateError>,
}

impl TemplateBuilder {
    pub fn new(stack_name: &str) -> Self {
        Self {
            prefix: format!("{stack_name}-"),
            default_tags: vec![Tag::new("CreatedBy", PROJECT_NAME)],
            template: Template::new(),
            image: None,
            vpc_id: None,
            defect: None,
        }
    }

    /// The template as built so far, without validation.
    pub fn template(&self) -> &Template {
        &self.template
    }

    fn add(mut self, logical_id: &str, resource: Resource) -> Self {
        if let Err(e) = self.template.insert_resource(logical_id, resource) {
            tracing::error!(logical_id, "{e}");
            self.defect.get_or_insert(e);
        }
        self
    }

    fn output(mut self, name: &str, value: Value, description: &str) -> Self {
        self.template = self.template.with_output(name, value, description);
        self
    }

    fn tags(&self) -> Value {
        json!(self.default_tags)
    }

    /// A `Name` tag followed by the defaults.
    fn named_tags(&self, name: &str) -> Value {
        let mut tags = vec![Tag::new("Name", &format!("{}{name}", self.prefix))];
        tags.extend(self.default_tags.iter().cloned());
        json!(tags)
    }

    pub fn state_bucket(self) -> Self {
        let props = json!({
            "Tags": self.tags(),
            "VersioningConfiguration": { "Status": "Enabled" },
        });
        self.add(
            ids::BUCKET,
            Resource::new(ResourceKind::Bucket, props)
                .deletion_policy(DeletionPolicy::RetainExceptOnCreate),
        )
    }

    pub fn cluster(self) -> Self {
        let props = json!({ "Tags": self.tags() });
        self.add(ids::CLUSTER, Resource::new(ResourceKind::Cluster, props))
    }

    pub fn capacity_provider(self, spot: bool) -> Self {
        let provider = if spot { "FARGATE_SPOT" } else { "FARGATE" };
        let props = json!({
            "Cluster": ref_to(ids::CLUSTER),
            "CapacityProviders": [provider],
            "DefaultCapacityProviderStrategy": [
                { "CapacityProvider": provider, "Weight": 1 }
            ],
        });
        self.add(
            ids::CAPACITY_PROVIDER,
            Resource::new(ResourceKind::CapacityProviderAssociations, props),
        )
    }

    /// The log group depends on the cluster so it is deleted after it.
    pub fn log_group(self) -> Self {
        let props = json!({
            "Tags": self.tags(),
            "RetentionInDays": LOG_RETENTION_DAYS,
        });
        self.add(
            ids::LOG_GROUP,
            Resource::new(ResourceKind::LogGroup, props).depends_on(ids::CLUSTER),
        )
    }

    /// Pull-through cache rule and, for Docker Hub, the credential secret.
    /// Also fixes the image the task definition will run.
    pub fn image_cache(
        mut self,
        resolver: &ImageOriginResolver,
        image: &str,
    ) -> Result<Self, SynthError> {
        let resolved = resolver.resolve(&self.prefix, image);
        self.image = Some(resolved.image);

        let Some(plan) = resolved.cache else {
            return Ok(self);
        };

        let mut rule = json!({
            "EcrRepositoryPrefix": plan.prefix,
            "UpstreamRegistryUrl": plan.upstream_url,
        });

        if let Some(credentials) = &plan.credentials {
            let secret = self.secret_properties(&plan, credentials)?;
            self = self.add(
                ids::PRIVATE_REPO_SECRET,
                Resource::new(ResourceKind::Secret, secret),
            );
            rule["CredentialArn"] = ref_to(ids::PRIVATE_REPO_SECRET);
        }

        Ok(self.add(
            ids::PULL_THROUGH_CACHE,
            Resource::new(ResourceKind::PullThroughCacheRule, rule),
        ))
    }

    fn secret_properties(
        &self,
        plan: &CachePlan,
        credentials: &RegistryCredentials,
    ) -> Result<Value, SynthError> {
        // ECR reads the secret as this exact JSON shape.
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct UpstreamCredentials<'a> {
            username: &'a str,
            access_token: &'a str,
        }

        let secret_string = serde_json::to_string(&UpstreamCredentials {
            username: &credentials.username,
            access_token: credentials.access_token.expose_secret(),
        })
        .map_err(|e| SynthError::Internal(format!("encoding registry credentials: {e}")))?;

        Ok(json!({
            "Tags": self.tags(),
            "Description": "Docker Hub credentials for the ECR pull-through cache rule",
            "Name": plan.secret_name(),
            "SecretString": secret_string,
        }))
    }

    /// Execution role and task role. The secret-read policy is attached
    /// only when the secret resource exists.
    pub fn iam_roles(self) -> Self {
        let mut exec_policies = vec![policy(
            "AllowECRPassThrough",
            &[
                "ecr:CreatePullThroughCacheRule",
                "ecr:BatchImportUpstreamImage",
                "ecr:CreateRepository",
            ],
            json!("*"),
        )];
        if self.template.contains(ids::PRIVATE_REPO_SECRET) {
            exec_policies.push(policy(
                "AllowGetRepoSecret",
                &["secretsmanager:GetSecretValue", "ssm:GetParameters"],
                ref_to(ids::PRIVATE_REPO_SECRET),
            ));
        }

        let execution_role = json!({
            "Tags": self.tags(),
            "ManagedPolicyArns": [
                "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy"
            ],
            "AssumeRolePolicyDocument": ecs_tasks_trust_policy(),
            "Policies": exec_policies,
        });

        // Administrator access and unscoped delegation are the documented
        // default until per-service permissions exist.
        let task_role = json!({
            "Tags": self.tags(),
            "ManagedPolicyArns": ["arn:aws:iam::aws:policy/AdministratorAccess"],
            "AssumeRolePolicyDocument": ecs_tasks_trust_policy(),
            "Policies": [
                policy(
                    "AllowExecuteCommand",
                    &[
                        "ssmmessages:CreateDataChannel",
                        "ssmmessages:OpenDataChannel",
                        "ssmmessages:OpenControlChannel",
                        "ssmmessages:CreateControlChannel",
                    ],
                    json!("*"),
                ),
                policy("AllowPassRole", &["iam:PassRole"], json!("*")),
                policy("AllowAssumeRole", &["sts:AssumeRole"], json!("*")),
            ],
        });

        self.add(
            ids::EXECUTION_ROLE,
            Resource::new(ResourceKind::Role, execution_role),
        )
        .add(ids::TASK_ROLE, Resource::new(ResourceKind::Role, task_role))
    }

    pub fn task_definition(self, stack: &StackConfig) -> Self {
        let (cpu, memory) = fargate_size(stack.vcpu, stack.memory_mib);
        let image = self
            .image
            .clone()
            .unwrap_or_else(|| Value::String(stack.image.clone()));

        let mut runtime_platform = json!({ "OperatingSystemFamily": "LINUX" });
        if let Some(arch) = &stack.cpu_architecture {
            runtime_platform["CpuArchitecture"] = json!(arch);
        }

        let props = json!({
            "Tags": self.tags(),
            "RuntimePlatform": runtime_platform,
            "ContainerDefinitions": [{
                "Name": CONTAINER_NAME,
                "Image": image,
                "StopTimeout": STOP_TIMEOUT_SECS,
                "LogConfiguration": {
                    "LogDriver": "awslogs",
                    "Options": {
                        "awslogs-group": ref_to(ids::LOG_GROUP),
                        "awslogs-region": ref_to("AWS::Region"),
                        "awslogs-stream-prefix": LOG_STREAM_PREFIX,
                    },
                },
            }],
            "Cpu": cpu.to_string(),
            "Memory": memory.to_string(),
            "ExecutionRoleArn": get_att(ids::EXECUTION_ROLE, "Arn"),
            "TaskRoleArn": get_att(ids::TASK_ROLE, "Arn"),
            "NetworkMode": "awsvpc",
            "RequiresCompatibilities": ["FARGATE"],
        });
        self.add(
            ids::TASK_DEFINITION,
            Resource::new(ResourceKind::TaskDefinition, props),
        )
    }

    /// Public VPC with one subnet. Skipped entirely when `create` is false.
    pub fn network(mut self, create: bool) -> Self {
        if !create {
            return self;
        }
        self.vpc_id = Some(ref_to(ids::VPC));

        let vpc = json!({
            "Tags": self.named_tags("vpc"),
            "CidrBlock": VPC_CIDR,
        });
        let gateway = json!({ "Tags": self.named_tags("igw") });
        let attachment = json!({
            "VpcId": ref_to(ids::VPC),
            "InternetGatewayId": ref_to(ids::INTERNET_GATEWAY),
        });
        let route_table = json!({
            "Tags": self.named_tags("routetable"),
            "VpcId": ref_to(ids::VPC),
        });
        let route = json!({
            "RouteTableId": ref_to(ids::ROUTE_TABLE),
            "DestinationCidrBlock": ANYWHERE,
            "GatewayId": ref_to(ids::INTERNET_GATEWAY),
        });
        let subnet = json!({
            "Tags": self.named_tags("subnet"),
            "CidrBlock": SUBNET_CIDR,
            "VpcId": ref_to(ids::VPC),
            "MapPublicIpOnLaunch": true,
        });
        let association = json!({
            "SubnetId": ref_to(ids::SUBNET),
            "RouteTableId": ref_to(ids::ROUTE_TABLE),
        });
        // Gateway endpoint keeps S3 traffic off the internet gateway.
        let s3_endpoint = json!({
            "VpcEndpointType": "Gateway",
            "VpcId": ref_to(ids::VPC),
            "ServiceName": sub("com.amazonaws.${AWS::Region}.s3"),
        });

        self.add(ids::VPC, Resource::new(ResourceKind::Vpc, vpc))
            .add(
                ids::INTERNET_GATEWAY,
                Resource::new(ResourceKind::InternetGateway, gateway),
            )
            .add(
                ids::INTERNET_GATEWAY_ATTACHMENT,
                Resource::new(ResourceKind::VpcGatewayAttachment, attachment),
            )
            .add(
                ids::ROUTE_TABLE,
                Resource::new(ResourceKind::RouteTable, route_table),
            )
            .add(ids::ROUTE, Resource::new(ResourceKind::Route, route))
            .add(ids::SUBNET, Resource::new(ResourceKind::Subnet, subnet))
            .add(
                ids::SUBNET_ROUTE_TABLE_ASSOCIATION,
                Resource::new(ResourceKind::SubnetRouteTableAssociation, association),
            )
            .add(
                ids::S3_GATEWAY_ENDPOINT,
                Resource::new(ResourceKind::VpcEndpoint, s3_endpoint),
            )
            .output(outputs::SUBNET_ID, ref_to(ids::SUBNET), "ID of the subnet")
    }

    /// Open inbound TCP and open outbound. Bound to the VPC only when
    /// [`network`](Self::network) created one.
    pub fn security_group(self) -> Self {
        let mut props = json!({
            "GroupDescription": "Security group for the ECS task that allows all outbound and inbound traffic",
            "SecurityGroupIngress": [{
                "IpProtocol": "tcp",
                "FromPort": 1,
                "ToPort": 65535,
                "CidrIp": ANYWHERE,
            }],
            "SecurityGroupEgress": [{
                "IpProtocol": "-1",
                "CidrIp": ANYWHERE,
            }],
        });
        if let Some(vpc_id) = &self.vpc_id {
            props["VpcId"] = vpc_id.clone();
        }
        self.add(
            ids::SECURITY_GROUP,
            Resource::new(ResourceKind::SecurityGroup, props),
        )
    }

    pub fn outputs(self) -> Self {
        self.output(
            outputs::TASK_DEF_ARN,
            ref_to(ids::TASK_DEFINITION),
            "ARN of the ECS task definition",
        )
        .output(
            outputs::CLUSTER_NAME,
            ref_to(ids::CLUSTER),
            "Name of the ECS cluster",
        )
        .output(
            outputs::LOG_GROUP_ARN,
            get_att(ids::LOG_GROUP, "Arn"),
            "ARN of the CloudWatch log group",
        )
        .output(
            outputs::SECURITY_GROUP_ID,
            ref_to(ids::SECURITY_GROUP),
            "ID of the security group",
        )
        .output(
            outputs::BUCKET_NAME,
            ref_to(ids::BUCKET),
            "Name of the S3 bucket",
        )
    }

    /// Validate reference closure and return the template.
    ///
    /// A stage that re-added an existing logical id surfaces here as
    /// [`SynthError::Internal`].
    pub fn finish(self) -> Result<Template, SynthError> {
        if let Some(defect) = self.defect {
            return Err(SynthError::Internal(defect.to_string()));
        }
        self.template.validate()?;
        Ok(self.template)
    }
}

fn policy(name: &str, actions: &[&str], resource: Value) -> Value {
    json!({
        "PolicyName": name,
        "PolicyDocument": {
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Allow",
                "Action": actions,
                "Resource": resource,
            }],
        },
    })
}

fn ecs_tasks_trust_policy() -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": ["ecs-tasks.amazonaws.com"] },
            "Action": ["sts:AssumeRole"],
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_compose_into_valid_prefixes() {
        let builder = TemplateBuilder::new("web").state_bucket().cluster().log_group();
        assert!(builder.template().validate().is_ok());
        assert_eq!(builder.template().resources.len(), 3);
    }

    #[test]
    fn log_group_without_cluster_is_dangling() {
        let err = TemplateBuilder::new("web").log_group().finish().unwrap_err();
        assert!(matches!(err, SynthError::Template(_)));
    }

    #[test]
    fn repeated_stage_is_an_internal_error() {
        let err = TemplateBuilder::new("web")
            .cluster()
            .cluster()
            .finish()
            .unwrap_err();
        assert!(
            matches!(err, SynthError::Internal(ref msg) if msg.contains("Cluster")),
            "got: {err}"
        );
    }

    #[test]
    fn named_tags_lead_with_name() {
        let tags = TemplateBuilder::new("web").named_tags("vpc");
        assert_eq!(tags[0]["Key"], "Name");
        assert_eq!(tags[0]["Value"], "web-vpc");
        assert_eq!(tags[1]["Key"], "CreatedBy");
        assert_eq!(tags[1]["Value"], "kiln");
    }

    #[test]
    fn capacity_provider_follows_spot_flag() {
        let spot = TemplateBuilder::new("web").cluster().capacity_provider(true);
        let props = &spot.template().resource(ids::CAPACITY_PROVIDER).unwrap().properties;
        assert_eq!(props["CapacityProviders"][0], "FARGATE_SPOT");
        assert_eq!(props["DefaultCapacityProviderStrategy"][0]["Weight"], 1);
    }

    #[test]
    fn security_group_unbound_without_network() {
        let builder = TemplateBuilder::new("web").network(false).security_group();
        let sg = builder.template().resource(ids::SECURITY_GROUP).unwrap();
        assert!(sg.property("VpcId").is_none());
        assert!(sg.property("Tags").is_none());
    }
}
