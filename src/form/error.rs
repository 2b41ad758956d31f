use super::controller::{FormController, FormResult, write_lock};
use super::observe::FormEvent;
use super::store::StoreEntry;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorOptions {
    pub should_active: bool,
    pub should_touched: bool,
    pub should_dirty: bool,
    /// Focus the field after writing. `None` focuses exactly when the error is
    /// non-empty.
    pub should_focus: Option<bool>,
}

impl Default for ErrorOptions {
    fn default() -> Self {
        Self {
            should_active: true,
            should_touched: false,
            should_dirty: false,
            should_focus: None,
        }
    }
}

impl ErrorOptions {
    pub fn should_active(mut self, value: bool) -> Self {
        self.should_active = value;
        self
    }

    pub fn should_touched(mut self, value: bool) -> Self {
        self.should_touched = value;
        self
    }

    pub fn should_dirty(mut self, value: bool) -> Self {
        self.should_dirty = value;
        self
    }

    pub fn should_focus(mut self, value: bool) -> Self {
        self.should_focus = Some(value);
        self
    }

    fn admits(&self, entry: &dyn StoreEntry) -> bool {
        (!self.should_active || entry.is_active())
            && (!self.should_touched || entry.is_touched())
            && (!self.should_dirty || entry.is_dirty())
    }
}

impl FormController {
    /// Writes `error` to the field and/or field array named `name`, subject to the gates
    /// in `options`. The form's `invalid` flag is recomputed in the same critical
    /// section. Only fields are focused; field arrays have no input to focus.
    pub fn set_error(
        &self,
        name: impl AsRef<str>,
        error: impl Into<String>,
        options: ErrorOptions,
    ) -> FormResult<()> {
        let name = name.as_ref();
        let error = error.into();
        let should_focus = options.should_focus.unwrap_or(!error.is_empty());

        let mut events = Vec::new();
        let mut focus = None;
        {
            let mut state = write_lock(&self.state, "setting field error")?;
            if let Some(canonical) = state.resolve(name) {
                if let Some(field) = state.fields.get_mut(&canonical) {
                    if options.admits(&*field) {
                        field.error = error.clone();
                        events.push(FormEvent::FieldChanged(name.to_owned()));
                        if !error.is_empty() && should_focus {
                            focus = Some(canonical.clone());
                        }
                    }
                }
                if let Some(array) = state.field_arrays.get_mut(&canonical) {
                    if options.admits(&*array) {
                        array.error = error.clone();
                        events.push(FormEvent::FieldArrayChanged(name.to_owned()));
                    }
                }
            }
            state.recompute();
        }
        events.push(FormEvent::FormChanged);
        self.notify(events)?;

        if let Some(canonical) = focus {
            self.focus_canonical(&canonical)?;
        }
        Ok(())
    }

    pub fn set_errors<I, N, S>(&self, errors: I, options: ErrorOptions) -> FormResult<()>
    where
        I: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: Into<String>,
    {
        for (name, error) in errors {
            self.set_error(name, error, options)?;
        }
        Ok(())
    }

    pub fn clear_error(&self, name: impl AsRef<str>) -> FormResult<()> {
        self.set_error(
            name,
            String::new(),
            ErrorOptions::default()
                .should_active(false)
                .should_focus(false),
        )
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "clearing all errors")?;
            for field in state.fields.values_mut() {
                field.error.clear();
            }
            for array in state.field_arrays.values_mut() {
                array.error.clear();
            }
            state.recompute();
        }
        self.notify(vec![FormEvent::FormChanged])
    }
}
