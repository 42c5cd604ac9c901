use std::collections::HashMap;

use crate::error::StoreError;
use crate::identity::Identity;
use crate::record::Record;

/// A local record store.
///
/// All mutation goes through a [`UnitOfWork`]. Only one unit may be open
/// against a store at a time; `begin` blocks until the previous one is
/// committed or dropped.
pub trait Store: Clone + Send + Sync + 'static {
    type Unit<'a>: UnitOfWork
    where
        Self: 'a;

    /// Open a unit of work. Dropping it without `commit` discards every
    /// change made through it.
    fn begin(&self) -> Result<Self::Unit<'_>, StoreError>;

    /// Read one record outside of any caller-held unit.
    fn get<R: Record>(&self, identity: &Identity) -> Result<Option<R>, StoreError> {
        let mut unit = self.begin()?;
        unit.fetch_by_identity(identity)
    }

    /// Read several records outside of any caller-held unit.
    fn get_batch<R: Record>(
        &self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, R>, StoreError> {
        let mut unit = self.begin()?;
        unit.fetch_batch(identities)
    }
}

/// One all-or-nothing transaction against a [`Store`].
pub trait UnitOfWork {
    fn fetch_by_identity<R: Record>(&mut self, identity: &Identity)
        -> Result<Option<R>, StoreError>;

    /// Fetch every record among `identities` that exists. Missing identities
    /// are simply absent from the result.
    fn fetch_batch<R: Record>(
        &mut self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, R>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] if the identity is taken.
    fn insert<R: Record>(&mut self, record: &R) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] if the identity is not stored.
    fn update<R: Record>(&mut self, record: &R) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    fn remove<R: Record>(&mut self, identity: &Identity) -> Result<bool, StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}
