//! Image origin classification and pull-through cache planning.
//!
//! Images from ECR Public, and from Docker Hub when credentials are
//! configured, are pulled through a region-local ECR cache instead of
//! straight from the upstream registry.

use kiln_core::RegistryCredentials;
use serde_json::Value;

use crate::prefix::cache_repo_prefix;
use crate::template::sub;

pub const ECR_PUBLIC_REGISTRY: &str = "public.ecr.aws";
pub const DOCKER_REGISTRY: &str = "docker.io";
/// Upstream URL ECR expects for Docker Hub cache rules.
pub const DOCKER_UPSTREAM_URL: &str = "registry-1.docker.io";
/// Secrets holding upstream credentials must live under this name prefix.
pub const PULL_THROUGH_SECRET_PREFIX: &str = "ecr-pullthroughcache/";

const ECR_PUBLIC_SUFFIX: &str = "ecr-public";
const DOCKER_PUBLIC_SUFFIX: &str = "docker-public";

/// Where an image reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    /// `public.ecr.aws/<repo>`
    EcrPublic { repo: String },
    /// `docker.io/<repo>`, with credentials available for the cache rule
    DockerHub { repo: String },
    /// Anything else; used unmodified
    Other,
}

/// A pull-through cache rule the stack needs.
#[derive(Debug, Clone)]
pub struct CachePlan {
    /// ECR repository prefix, at most 20 characters
    pub prefix: String,
    pub upstream_url: String,
    /// Repository path after the registry host, including the leading `/`
    pub repo: String,
    /// Present only for Docker Hub; stored in a Secrets Manager secret
    pub credentials: Option<RegistryCredentials>,
}

impl CachePlan {
    /// Name of the Secrets Manager secret for this rule's credentials.
    pub fn secret_name(&self) -> String {
        format!("{PULL_THROUGH_SECRET_PREFIX}{}", self.prefix)
    }

    /// Image reference rewritten to the account's regional cache.
    pub fn cached_image(&self) -> Value {
        sub(&format!(
            "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.amazonaws.com/{}{}",
            self.prefix, self.repo
        ))
    }
}

/// The image the task definition should run, plus the cache rule behind it.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub image: Value,
    pub cache: Option<CachePlan>,
}

/// Classifies image references by registry.
///
/// Docker Hub credentials are passed in at construction rather than read
/// from the environment, so resolution is a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct ImageOriginResolver {
    credentials: Option<RegistryCredentials>,
}

impl ImageOriginResolver {
    pub fn new(credentials: Option<RegistryCredentials>) -> Self {
        Self { credentials }
    }

    pub fn classify(&self, image: &str) -> ImageOrigin {
        if let Some(repo) = strip_registry(image, ECR_PUBLIC_REGISTRY) {
            return ImageOrigin::EcrPublic {
                repo: repo.to_owned(),
            };
        }
        if let Some(repo) = strip_registry(image, DOCKER_REGISTRY)
            && self.credentials.is_some()
        {
            return ImageOrigin::DockerHub {
                repo: repo.to_owned(),
            };
        }
        ImageOrigin::Other
    }

    /// Decide the final image reference for a stack whose resource names
    /// start with `stack_prefix` (e.g. `"web-"`).
    pub fn resolve(&self, stack_prefix: &str, image: &str) -> ResolvedImage {
        let cache = match self.classify(image) {
            ImageOrigin::EcrPublic { repo } => Some(CachePlan {
                prefix: cache_repo_prefix(stack_prefix, ECR_PUBLIC_SUFFIX),
                upstream_url: ECR_PUBLIC_REGISTRY.to_owned(),
                repo,
                credentials: None,
            }),
            ImageOrigin::DockerHub { repo } => Some(CachePlan {
                prefix: cache_repo_prefix(stack_prefix, DOCKER_PUBLIC_SUFFIX),
                upstream_url: DOCKER_UPSTREAM_URL.to_owned(),
                repo,
                credentials: self.credentials.clone(),
            }),
            ImageOrigin::Other => None,
        };

        match cache {
            Some(plan) => {
                tracing::debug!(image, prefix = %plan.prefix, upstream = %plan.upstream_url, "using pull-through cache");
                ResolvedImage {
                    image: plan.cached_image(),
                    cache: Some(plan),
                }
            }
            None => ResolvedImage {
                image: Value::String(image.to_owned()),
                cache: None,
            },
        }
    }
}

/// `registry/path` → `/path`; `None` for other registries.
fn strip_registry<'a>(image: &'a str, registry: &str) -> Option<&'a str> {
    image
        .strip_prefix(registry)
        .filter(|repo| repo.starts_with('/'))
}
