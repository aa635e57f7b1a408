//! Manifest templates
//!
//! The catalog holds the fixed manifest bodies fleet scaffolds; the engine
//! strips comment lines and substitutes `{{ ... }}` placeholders from a
//! [`TemplateContext`].

mod catalog;
mod context;
mod engine;

pub use catalog::{
    RawTemplate, ResourceCategory, TemplateCatalog, TemplateEntry, BUILTIN_TEMPLATES, COMMON_DIR,
    MANIFEST_EXTENSION,
};
pub use context::TemplateContext;
pub use engine::{strip_comments, TemplateEngine};
