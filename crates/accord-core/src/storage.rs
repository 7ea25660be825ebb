//! Persistence storage contract
//!
//! Any string key-value store satisfies it. Backend failures are surfaced as
//! [`AccordError::Storage`](crate::AccordError::Storage) to the caller of the
//! write that triggered them.

use crate::AccordResult;

/// String key-value persistence backend
pub trait Storage {
    fn get_item(&self, key: &str) -> AccordResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> AccordResult<()>;

    fn remove_item(&self, key: &str) -> AccordResult<()>;
}
