//! Copy module - managed file content.
//!
//! Writes content to a path on the target, reporting changed only when the
//! content or mode actually differs.

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

/// Module for writing file content
pub struct CopyModule;

impl Module for CopyModule {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn description(&self) -> &'static str {
        "Ensure a file on the target has the given content"
    }

    fn required_params(&self) -> &[&'static str] {
        &["dest"]
    }

    fn apply(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let dest = params.get_string_required("dest")?;
        let content = params.get_string("content")?.unwrap_or_default();
        let mode = params.get_string("mode")?;

        let mut target = context.target.lock();

        let divergent = match target.file(&dest) {
            Some(existing) => {
                existing.content != content || existing.mode != mode
            }
            None => true,
        };

        if !divergent {
            return Ok(ModuleOutput::ok(format!("{} already up to date", dest)));
        }

        if context.check_mode {
            return Ok(ModuleOutput::changed(format!("would write {}", dest)));
        }

        target.write_file(&dest, &content, mode.as_deref());
        Ok(ModuleOutput::changed(format!("wrote {}", dest)))
    }
}
