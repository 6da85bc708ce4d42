use crate::domain::value_objects::Isbn13;
use crate::ports::description_provider::{
    DescriptionProvider as DescriptionProviderTrait, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory implementation of DescriptionProvider
///
/// Serves descriptions registered up front. Can be switched into a failing
/// mode to exercise the "description unavailable" path.
pub struct DescriptionProvider {
    descriptions: Mutex<HashMap<Isbn13, String>>,
    failing: AtomicBool,
}

impl DescriptionProvider {
    pub fn new() -> Self {
        Self {
            descriptions: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Register a description for testing purposes
    pub fn add_description(&self, isbn13: Isbn13, description: impl Into<String>) {
        self.descriptions
            .lock()
            .unwrap()
            .insert(isbn13, description.into());
    }

    /// Make every lookup fail as if the content API were unreachable
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for DescriptionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DescriptionProviderTrait for DescriptionProvider {
    async fn fetch_description(&self, isbn13: &Isbn13) -> Result<Option<String>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("content API unreachable".into());
        }
        Ok(self.descriptions.lock().unwrap().get(isbn13).cloned())
    }
}
