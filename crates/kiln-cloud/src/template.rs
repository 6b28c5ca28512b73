//! CloudFormation template model.
//!
//! Resources are keyed by logical id in a [`BTreeMap`] so the rendered
//! JSON is byte-stable. Cross-resource references are plain intrinsic
//! function values built with [`ref_to`], [`get_att`] and [`sub`];
//! [`Template::validate`] checks that every one of them resolves.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Value, json};

const FORMAT_VERSION: &str = "2010-09-09";
const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceKind {
    #[serde(rename = "AWS::S3::Bucket")]
    Bucket,
    #[serde(rename = "AWS::ECS::Cluster")]
    Cluster,
    #[serde(rename = "AWS::ECS::ClusterCapacityProviderAssociations")]
    CapacityProviderAssociations,
    #[serde(rename = "AWS::Logs::LogGroup")]
    LogGroup,
    #[serde(rename = "AWS::ECR::PullThroughCacheRule")]
    PullThroughCacheRule,
    #[serde(rename = "AWS::SecretsManager::Secret")]
    Secret,
    #[serde(rename = "AWS::IAM::Role")]
    Role,
    #[serde(rename = "AWS::ECS::TaskDefinition")]
    TaskDefinition,
    #[serde(rename = "AWS::EC2::VPC")]
    Vpc,
    #[serde(rename = "AWS::EC2::InternetGateway")]
    InternetGateway,
    #[serde(rename = "AWS::EC2::VPCGatewayAttachment")]
    VpcGatewayAttachment,
    #[serde(rename = "AWS::EC2::RouteTable")]
    RouteTable,
    #[serde(rename = "AWS::EC2::Route")]
    Route,
    #[serde(rename = "AWS::EC2::Subnet")]
    Subnet,
    #[serde(rename = "AWS::EC2::SubnetRouteTableAssociation")]
    SubnetRouteTableAssociation,
    #[serde(rename = "AWS::EC2::VPCEndpoint")]
    VpcEndpoint,
    #[serde(rename = "AWS::EC2::SecurityGroup")]
    SecurityGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    RetainExceptOnCreate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: ResourceKind,
    pub properties: Value,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new(kind: ResourceKind, properties: Value) -> Self {
        Self {
            kind,
            properties,
            depends_on: BTreeSet::new(),
            deletion_policy: None,
        }
    }

    pub fn depends_on(mut self, logical_id: &str) -> Self {
        self.depends_on.insert(logical_id.to_owned());
        self
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }

    /// Look up a top-level property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,
    pub description: String,
}

/// A synthesized stack: resources plus the outputs downstream tooling reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    format_version: &'static str,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

impl Template {
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add a resource. Logical ids are unique within a template.
    pub fn with_resource(
        mut self,
        logical_id: &str,
        resource: Resource,
    ) -> Result<Self, TemplateError> {
        self.insert_resource(logical_id, resource)?;
        Ok(self)
    }

    pub fn insert_resource(
        &mut self,
        logical_id: &str,
        resource: Resource,
    ) -> Result<(), TemplateError> {
        match self.resources.entry(logical_id.to_owned()) {
            Entry::Occupied(_) => Err(TemplateError::DuplicateLogicalId {
                id: logical_id.to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(resource);
                Ok(())
            }
        }
    }

    pub fn with_output(mut self, name: &str, value: Value, description: &str) -> Self {
        self.outputs.insert(
            name.to_owned(),
            Output {
                value,
                description: description.to_owned(),
            },
        );
        self
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    /// Check that every `Ref`, `Fn::GetAtt`, `Fn::Sub` variable and
    /// `DependsOn` entry names a resource in this template.
    pub fn validate(&self) -> Result<(), TemplateError> {
        for (id, resource) in &self.resources {
            for target in resource.depends_on.iter() {
                self.require(id, target)?;
            }
            for target in references(&resource.properties) {
                self.require(id, &target)?;
            }
        }
        for (name, output) in &self.outputs {
            let targets = references(&output.value);
            if targets.is_empty() {
                return Err(TemplateError::UnboundOutput { name: name.clone() });
            }
            for target in targets {
                self.require(&format!("output {name}"), &target)?;
            }
        }
        Ok(())
    }

    fn require(&self, from: &str, target: &str) -> Result<(), TemplateError> {
        if self.contains(target) {
            Ok(())
        } else {
            Err(TemplateError::DanglingReference {
                from: from.to_owned(),
                target: target.to_owned(),
            })
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ── Intrinsic functions ──

/// `{"Ref": logical_id}`
pub fn ref_to(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": template}`
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// Logical ids referenced anywhere inside `value`, excluding `AWS::`
/// pseudo parameters.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_references(value, &mut out);
    out
}

fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(id)) = map.get("Ref") {
                    insert_reference(id, out);
                    return;
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt")
                    && let Some(Value::String(id)) = args.first()
                {
                    insert_reference(id, out);
                    return;
                }
                if let Some(Value::String(template)) = map.get("Fn::Sub") {
                    for var in sub_variables(template) {
                        let id = var.split('.').next().unwrap_or(var);
                        insert_reference(id, out);
                    }
                    return;
                }
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

fn insert_reference(id: &str, out: &mut BTreeSet<String>) {
    if !id.starts_with(PSEUDO_PARAMETER_PREFIX) {
        out.insert(id.to_owned());
    }
}

/// Variable names in a `Fn::Sub` string; `${!Literal}` escapes are skipped.
fn sub_variables(template: &str) -> Vec<&str> {
    let mut vars = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let var = &after[..end];
        if !var.starts_with('!') {
            vars.push(var);
        }
        rest = &after[end + 1..];
    }
    vars
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    #[error("{from} references unknown resource {target}")]
    DanglingReference { from: String, target: String },

    #[error("output {name} does not reference any resource")]
    UnboundOutput { name: String },

    #[error("logical id {id} is already defined")]
    DuplicateLogicalId { id: String },
}
