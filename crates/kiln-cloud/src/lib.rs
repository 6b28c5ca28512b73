pub mod backend;
pub mod origin;
pub mod prefix;
pub mod sizing;
pub mod synth;
pub mod template;
pub mod upload;

pub use backend::{HttpBackend, UploadBackend};
pub use origin::{CachePlan, ImageOrigin, ImageOriginResolver, ResolvedImage};
pub use prefix::{MAX_CACHE_PREFIX_LEN, cache_repo_prefix};
pub use sizing::fargate_size;
pub use synth::{SynthError, SynthOptions, TemplateBuilder, synthesize};
pub use template::{DeletionPolicy, Output, Resource, ResourceKind, Tag, Template, TemplateError};
pub use upload::{UploadClient, UploadError};
