mod package;
mod port;
mod template;

pub use package::{PackageArgs, package};
pub use port::port;
pub use template::{TemplateArgs, template};
