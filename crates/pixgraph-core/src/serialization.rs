//! Serialization factories.
//!
//! Values of arbitrary runtime types are turned into a [`PortableValue`]
//! (factory id + MessagePack bytes) by a factory looked up from the value's
//! type. Deserializing goes the other way by factory id. This module is a
//! pure transformation: it never touches the filesystem.

use crate::error::SerializationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;

/// The portable form of a serialized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableValue {
    pub factory_id: String,
    pub data: Vec<u8>,
}

/// Converts one runtime type to and from its portable bytes.
pub trait SerializationFactory: Send + Sync {
    /// Stable id written into the portable form.
    fn id(&self) -> &str;

    /// The runtime type this factory handles.
    fn value_type(&self) -> TypeId;

    fn serialize(&self, value: &dyn Any) -> Result<Vec<u8>, SerializationError>;

    fn deserialize(&self, data: &[u8]) -> Result<Box<dyn Any>, SerializationError>;
}

/// A factory for any serde type, encoded with `rmp-serde`.
pub struct SerdeFactory<T> {
    id: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeFactory<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> SerializationFactory for SerdeFactory<T>
where
    T: Serialize + DeserializeOwned + Any,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn serialize(&self, value: &dyn Any) -> Result<Vec<u8>, SerializationError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| SerializationError::UnknownType(std::any::type_name::<T>().into()))?;
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Box<dyn Any>, SerializationError> {
        let value: T = rmp_serde::from_slice(data)?;
        Ok(Box::new(value))
    }
}

/// Set of factories keyed by runtime type and by factory id.
#[derive(Default)]
pub struct FactoryRegistry {
    by_type: HashMap<TypeId, usize>,
    by_id: HashMap<String, usize>,
    factories: Vec<Box<dyn SerializationFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration for the same type or id wins.
    pub fn register(&mut self, factory: Box<dyn SerializationFactory>) {
        let slot = self.factories.len();
        self.by_type.insert(factory.value_type(), slot);
        self.by_id.insert(factory.id().to_string(), slot);
        self.factories.push(factory);
    }

    /// Convenience for serde types.
    pub fn register_serde<T>(&mut self, id: &str)
    where
        T: Serialize + DeserializeOwned + Any,
    {
        self.register(Box::new(SerdeFactory::<T>::new(id)));
    }

    pub fn serialize<T: Any>(&self, value: &T) -> Result<PortableValue, SerializationError> {
        let slot = self
            .by_type
            .get(&TypeId::of::<T>())
            .ok_or_else(|| SerializationError::UnknownType(std::any::type_name::<T>().into()))?;
        let factory = &self.factories[*slot];
        Ok(PortableValue {
            factory_id: factory.id().to_string(),
            data: factory.serialize(value)?,
        })
    }

    pub fn deserialize(&self, value: &PortableValue) -> Result<Box<dyn Any>, SerializationError> {
        let slot = self
            .by_id
            .get(&value.factory_id)
            .ok_or_else(|| SerializationError::UnknownFactory(value.factory_id.clone()))?;
        self.factories[*slot].deserialize(&value.data)
    }

    /// Deserialize and downcast in one step.
    pub fn deserialize_as<T: Any>(&self, value: &PortableValue) -> Result<T, SerializationError> {
        self.deserialize(value)?
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| SerializationError::UnknownType(std::any::type_name::<T>().into()))
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("factories", &self.by_id.keys().collect::<Vec<_>>())
            .finish()
    }
}
