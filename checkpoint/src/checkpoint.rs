//! Checkpointed values: restore-or-initialize on open, explicit save/delete.
//!
//! [`Checkpoint::open`] derives the value's identity from its construction
//! arguments and looks it up in the store. A usable record skips the factory;
//! anything else (missing, malformed, wrong field count, forced re-init) runs
//! the factory and immediately writes the first checkpoint.
//!
//! Only the fields named in [`Stateful::FIELDS`] are persisted. Fields left out
//! must be `#[serde(skip)]` (or otherwise defaulted) so the type can be rebuilt
//! from the declared fields alone.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::core::identity::{Identity, IdentityArgs};
use crate::core::record;
use crate::core::size::total_size_of;
use crate::io::store::{Store, StoreError};

/// A type whose declared fields can be checkpointed.
pub trait Stateful: Serialize + DeserializeOwned {
    /// Logical class name, the first segment of the identity signature.
    const TYPE_TAG: &'static str;
    /// Persisted fields, in record order. Must not be empty.
    const FIELDS: &'static [&'static str];

    /// Identity arguments seeded with [`Self::TYPE_TAG`].
    fn identity_args() -> IdentityArgs {
        IdentityArgs::new(Self::TYPE_TAG)
    }
}

/// How the value inside a [`Checkpoint`] came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Loaded from a stored record.
    Restored,
    /// Built by the factory and written as the first checkpoint.
    Initialized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Ignore any stored record and run the factory.
    pub force_init: bool,
}

/// A value bound to its identity and store.
pub struct Checkpoint<T> {
    identity: Identity,
    store: Arc<dyn Store>,
    value: T,
    origin: Origin,
}

impl<T: Stateful> Checkpoint<T> {
    /// Restore the value for `args` or build it with `init`.
    ///
    /// `args` must carry [`Stateful::TYPE_TAG`]; start from
    /// [`Stateful::identity_args`].
    pub fn open<F>(store: Arc<dyn Store>, args: &IdentityArgs, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T>,
    {
        Self::open_with(store, args, OpenOptions::default(), init)
    }

    pub fn open_with<F>(
        store: Arc<dyn Store>,
        args: &IdentityArgs,
        options: OpenOptions,
        init: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<T>,
    {
        if T::FIELDS.is_empty() {
            return Err(anyhow!(
                "{} declares no checkpoint fields; at least one is required",
                T::TYPE_TAG
            ));
        }
        if args.type_tag() != T::TYPE_TAG {
            return Err(anyhow!(
                "identity arguments tagged '{}' cannot open a {} checkpoint",
                args.type_tag(),
                T::TYPE_TAG
            ));
        }
        let identity = args.identity();

        if !options.force_init {
            if let Some(value) = restore::<T>(store.as_ref(), &identity) {
                info!(type_tag = T::TYPE_TAG, identity = %identity, "restored checkpoint");
                return Ok(Self {
                    identity,
                    store,
                    value,
                    origin: Origin::Restored,
                });
            }
        }

        debug!(
            type_tag = T::TYPE_TAG,
            identity = %identity,
            force_init = options.force_init,
            "initializing"
        );
        let value = init().with_context(|| format!("initialize {}", T::TYPE_TAG))?;
        let checkpoint = Self {
            identity,
            store,
            value,
            origin: Origin::Initialized,
        };
        checkpoint.save()?;
        Ok(checkpoint)
    }

    /// Write the declared fields of the current value to the store.
    pub fn save(&self) -> Result<()> {
        let values = record::field_values(&self.value, T::FIELDS)
            .with_context(|| format!("collect fields of {}", T::TYPE_TAG))?;
        let blob = record::encode(&values)?;
        debug!(
            identity = %self.identity,
            bytes = blob.len(),
            in_memory = total_size_of(&values),
            "saving checkpoint"
        );
        self.store
            .put(self.identity.as_str(), &blob)
            .with_context(|| format!("save checkpoint {}", self.identity))
    }

    /// Remove the stored record so the next open starts over.
    pub fn delete(&self) -> Result<()> {
        debug!(identity = %self.identity, "deleting checkpoint");
        self.store
            .delete(self.identity.as_str())
            .with_context(|| format!("delete checkpoint {}", self.identity))
    }
}

impl<T> Checkpoint<T> {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Checkpoint<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Checkpoint<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Load the record for `identity`; any failure means "nothing to restore".
fn restore<T: Stateful>(store: &dyn Store, identity: &Identity) -> Option<T> {
    let blob = match store.get(identity.as_str()) {
        Ok(blob) => blob,
        Err(StoreError::NotFound { .. }) => {
            debug!(identity = %identity, "no checkpoint");
            return None;
        }
    };
    let values = match record::decode(&blob) {
        Ok(values) => values,
        Err(err) => {
            warn!(identity = %identity, err = %err, "ignoring unreadable checkpoint");
            return None;
        }
    };
    match record::apply_field_values(T::FIELDS, values) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(identity = %identity, err = %err, "ignoring incompatible checkpoint");
            None
        }
    }
}
