//! docmap core library.
//!
//! Association and identity core of an object-document mapper: declared
//! associations between document classes, lazily loading proxies, an
//! identity map guaranteeing one live instance per stored document, nested
//! attribute assignment, root/parent tracking for embedded documents, and
//! `dependent` cascades on destroy.

pub mod class;
pub mod config;
pub mod document;
pub mod errors;
pub mod id;
pub mod identity_map;
pub mod keys;
pub mod mapper;
pub mod nested;
pub mod proxy;
pub mod registry;
pub mod store;
pub mod types;
pub mod value;

mod sync;

pub use class::{DestroyHook, DocumentClass};
pub use config::MapperConfig;
pub use document::{DocumentRef, WeakDocument};
pub use errors::*;
pub use identity_map::IdentityMap;
pub use mapper::{Catalog, Mapper};
pub use proxy::{AssociationHandle, ProxyVariant, Target};
pub use registry::AssociationRegistry;
pub use store::{MemoryStore, Query, RedisStore, Store, StoreOperation};
pub use types::{
    AssociationDescriptor, AssociationKind, AssociationOptions, Dependent, NestedAttributesOptions, RejectIf,
    TargetClass,
};
pub use value::Attributes;

pub use redis;
