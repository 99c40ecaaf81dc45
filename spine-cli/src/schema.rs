//! Class models loaded from a JSON schema file.
//!
//! ```json
//! {
//!   "module": "Cerebrum",
//!   "classes": [
//!     { "name": "account",
//!       "primary": [{ "name": "id", "type": "int" }],
//!       "slots": [{ "name": "name", "type": "string", "writable": true }] }
//!   ]
//! }
//! ```
//!
//! Operations need handler code and cannot come from a file, so models
//! declaring any are rejected by the class builder.

use serde::Deserialize;
use std::path::Path;

use spine_core::{ClassBuilder, ClassModel, Spine};

fn default_module() -> String {
    "SpineIDL".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Schema {
    #[serde(default = "default_module")]
    pub module: String,
    pub classes: Vec<ClassModel>,
}

impl Schema {
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid schema: {}", e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read schema {}: {}", path.display(), e))?;
        Self::parse(&text)
    }

    /// Builds and registers every class. Stops at the first rejected model.
    pub fn register(&self, spine: &Spine) -> Result<(), String> {
        for model in &self.classes {
            spine
                .register(ClassBuilder::new(model.clone()))
                .map_err(|e| e.to_string())?;
            tracing::debug!(class = %model.name, "class registered");
        }
        Ok(())
    }
}
