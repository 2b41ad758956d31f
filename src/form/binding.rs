use std::sync::Arc;

use super::controller::{FormController, FormResult, read_lock, write_lock};

impl FormController {
    /// The handler follows the field's item across reorders and is dropped with it.
    pub fn register_focus_handler(
        &self,
        name: impl AsRef<str>,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> FormResult<()> {
        let Some(canonical) = self.canonical(name.as_ref())? else {
            return Ok(());
        };
        write_lock(&self.focus_handlers, "registering focus handler")?
            .insert(canonical, Arc::new(handler));
        Ok(())
    }

    pub fn focus(&self, name: impl AsRef<str>) -> FormResult<bool> {
        let Some(canonical) = self.canonical(name.as_ref())? else {
            return Ok(false);
        };
        self.focus_canonical(&canonical)
    }

    pub fn focus_first_error(&self) -> FormResult<bool> {
        let first_error = read_lock(&self.state, "reading first error field")?.first_error_field();
        let Some(canonical) = first_error else {
            return Ok(false);
        };
        self.focus_canonical(&canonical)
    }

    pub(super) fn focus_canonical(&self, canonical: &str) -> FormResult<bool> {
        if !read_lock(&self.state, "checking focus target")?
            .fields
            .contains_key(canonical)
        {
            return Ok(false);
        }
        let handler = read_lock(&self.focus_handlers, "reading focus handlers")?
            .get(canonical)
            .cloned();
        if let Some(handler) = handler {
            handler();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Hidden until the field was touched or the form was submitted.
    pub fn field_error_for_display(&self, name: impl AsRef<str>) -> FormResult<Option<String>> {
        let state = read_lock(&self.state, "reading display error message")?;
        let Some(field) = state
            .resolve(name.as_ref())
            .and_then(|canonical| state.fields.get(&canonical))
        else {
            return Ok(None);
        };
        if !field.touched && !state.submitted {
            return Ok(None);
        }
        Ok((!field.error.is_empty()).then(|| field.error.clone()))
    }
}
