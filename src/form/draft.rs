use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::controller::{FormController, FormError, FormResult, read_lock, write_lock};
use super::observe::FormEvent;
use super::values::FormValues;

/// Persistence for unsubmitted form values. Keys are chosen by the caller, so a draft
/// saved by one controller can be restored into another.
pub trait FormDraftStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn save(&self, key: &str, values: &FormValues) -> Result<(), Self::Error>;
    fn load(&self, key: &str) -> Result<Option<FormValues>, Self::Error>;
    fn clear(&self, key: &str) -> Result<(), Self::Error>;
}

#[derive(Clone, Default)]
pub struct InMemoryDraftStore {
    drafts: Arc<RwLock<BTreeMap<String, FormValues>>>,
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormDraftStore for InMemoryDraftStore {
    type Error = Infallible;

    fn save(&self, key: &str, values: &FormValues) -> Result<(), Self::Error> {
        let mut drafts = match self.drafts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        drafts.insert(key.to_owned(), values.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<FormValues>, Self::Error> {
        let drafts = match self.drafts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(drafts.get(key).cloned())
    }

    fn clear(&self, key: &str) -> Result<(), Self::Error> {
        let mut drafts = match self.drafts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        drafts.remove(key);
        Ok(())
    }
}

impl FormController {
    pub fn save_draft<S>(&self, store: &S, key: &str) -> FormResult<()>
    where
        S: FormDraftStore,
    {
        let values = FormValues::collect(&*read_lock(&self.state, "saving draft")?);
        store
            .save(key, &values)
            .map_err(|error| FormError::DraftSaveFailed(error.to_string()))
    }

    pub fn load_draft<S>(&self, store: &S, key: &str) -> FormResult<bool>
    where
        S: FormDraftStore,
    {
        let Some(draft) = store
            .load(key)
            .map_err(|error| FormError::DraftLoadFailed(error.to_string()))?
        else {
            return Ok(false);
        };

        {
            let mut state = write_lock(&self.state, "loading draft into form")?;
            let names = state
                .fields
                .keys()
                .filter_map(|canonical| Some((canonical.clone(), state.display_name(canonical)?)))
                .collect::<Vec<_>>();
            let ticket = state.next_ticket();
            for (canonical, name) in names {
                let Some(field) = state.fields.get_mut(&canonical) else {
                    continue;
                };
                if let Some(value) = draft.get(&name) {
                    field.value = Some(value.clone());
                }
                field.refresh_dirty();
                field.error.clear();
                field.slot.ticket = ticket;
            }
            for array in state.field_arrays.values_mut() {
                array.error.clear();
                array.slot.ticket = ticket;
            }
            state.submit_count = 0;
            state.restart_submit_cycle()?;
            state.recompute();
        }
        debug!(draft = key, "draft loaded");
        self.notify(vec![FormEvent::FormChanged])?;
        Ok(true)
    }

    pub fn clear_draft<S>(&self, store: &S, key: &str) -> FormResult<()>
    where
        S: FormDraftStore,
    {
        store
            .clear(key)
            .map_err(|error| FormError::DraftClearFailed(error.to_string()))
    }
}
