use serde_json::Value;
use tracing::debug;

use super::controller::{FormController, FormResult, FormState, write_lock};
use super::observe::FormEvent;
use super::validation::FieldEvent;

impl FormController {
    pub async fn insert_item(
        &self,
        name: impl AsRef<str>,
        at: Option<usize>,
        value: impl Into<Option<Value>>,
    ) -> FormResult<bool> {
        let value = value.into();
        self.edit_items(name.as_ref(), "insert", |state, canonical| {
            let len = state.field_arrays.get(canonical)?.items.len();
            let index = at.unwrap_or(len);
            if index > len {
                return None;
            }
            let key = state.seed_item(canonical, value.as_ref());
            state.field_arrays.get_mut(canonical)?.items.insert(index, key);
            Some(Vec::new())
        })
        .await
    }

    pub async fn remove_item(&self, name: impl AsRef<str>, at: usize) -> FormResult<bool> {
        self.edit_items(name.as_ref(), "remove", |state, canonical| {
            let array = state.field_arrays.get_mut(canonical)?;
            if at >= array.items.len() {
                return None;
            }
            let key = array.items.remove(at);
            let prefix = format!("{canonical}.{key}");
            state.remove_within(&prefix);
            Some(vec![prefix])
        })
        .await
    }

    pub async fn move_item(
        &self,
        name: impl AsRef<str>,
        from: usize,
        to: usize,
    ) -> FormResult<bool> {
        self.edit_items(name.as_ref(), "move", |state, canonical| {
            let array = state.field_arrays.get_mut(canonical)?;
            let len = array.items.len();
            if from >= len || to >= len || from == to {
                return None;
            }
            let key = array.items.remove(from);
            array.items.insert(to, key);
            Some(Vec::new())
        })
        .await
    }

    pub async fn swap_items(&self, name: impl AsRef<str>, a: usize, b: usize) -> FormResult<bool> {
        self.edit_items(name.as_ref(), "swap", |state, canonical| {
            let array = state.field_arrays.get_mut(canonical)?;
            let len = array.items.len();
            if a >= len || b >= len || a == b {
                return None;
            }
            array.items.swap(a, b);
            Some(Vec::new())
        })
        .await
    }

    pub async fn replace_item(
        &self,
        name: impl AsRef<str>,
        at: usize,
        value: impl Into<Option<Value>>,
    ) -> FormResult<bool> {
        let value = value.into();
        self.edit_items(name.as_ref(), "replace", |state, canonical| {
            if at >= state.field_arrays.get(canonical)?.items.len() {
                return None;
            }
            let key = state.seed_item(canonical, value.as_ref());
            let slot = state.field_arrays.get_mut(canonical)?.items.get_mut(at)?;
            let old = std::mem::replace(slot, key);
            let prefix = format!("{canonical}.{old}");
            state.remove_within(&prefix);
            Some(vec![prefix])
        })
        .await
    }

    /// Runs one structural edit under the write lock. `edit` returns the canonical
    /// prefixes of removed items, or `None` to leave the form untouched.
    async fn edit_items<F>(&self, name: &str, action: &'static str, edit: F) -> FormResult<bool>
    where
        F: FnOnce(&mut FormState, &str) -> Option<Vec<String>>,
    {
        let (canonical, removed) = {
            let mut state = write_lock(&self.state, "editing field array items")?;
            let Some(canonical) = state
                .resolve(name)
                .filter(|canonical| state.field_arrays.contains_key(canonical))
            else {
                return Ok(false);
            };
            let Some(removed) = edit(&mut *state, &canonical) else {
                return Ok(false);
            };
            if let Some(array) = state.field_arrays.get_mut(&canonical) {
                array.touched = true;
            }
            state.recompute();
            (canonical, removed)
        };
        debug!(array = %canonical, action, removed_items = removed.len(), "field array edited");

        self.forget(&removed)?;
        self.notify(vec![
            FormEvent::FieldArrayChanged(name.to_owned()),
            FormEvent::FormChanged,
        ])?;
        self.revalidate_after(&[canonical], FieldEvent::Input).await?;
        Ok(true)
    }
}
