//! Facts: analyzer-defined values attached to objects or packages and
//! propagated to importing packages.
//!
//! A [`FactStore`] belongs to exactly one action. Before the action runs it is
//! seeded by decoding the fact sets exported by the same analyzer on the
//! direct imports; after the run its whole content is encoded again for the
//! importers. The encoding is the only thing that crosses action boundaries.
//!
//! # Wire format
//!
//! ```text
//! "PKF1" u32:count record*
//! record  = u8:scope str:kind locator bytes:value
//! locator = str:package (u8:0 | u8:1 str:parent) str:name   ; scope 0, object
//!         | str:package                                     ; scope 1, package
//! str     = bytes (UTF-8)
//! bytes   = u32:len byte*
//! ```
//!
//! Integers are big-endian, values are JSON. Records are written in key order
//! so the encoding of a store is deterministic.

use crate::package::ObjectId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"PKF1";

/// A value an analyzer attaches to an object or package.
///
/// `KIND` is the stable tag identifying the fact type on the wire; it must be
/// unique across all analyzers of an invocation.
pub trait Fact: fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Stable tag of this fact type.
    const KIND: &'static str;
}

/// Object-safe view of a [`Fact`].
pub trait AnyFact: fmt::Debug + Send + Sync {
    /// Tag of the fact type.
    fn kind(&self) -> &'static str;
    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
    /// Encodes the value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn encode(&self) -> Result<Vec<u8>, FactError>;
}

impl<T: Fact> AnyFact for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn encode(&self) -> Result<Vec<u8>, FactError> {
        serde_json::to_vec(self).map_err(|e| FactError::Encode {
            kind: T::KIND,
            message: e.to_string(),
        })
    }
}

type DecodeFn = fn(&[u8]) -> Result<Arc<dyn AnyFact>, serde_json::Error>;

fn decode_fact<T: Fact>(bytes: &[u8]) -> Result<Arc<dyn AnyFact>, serde_json::Error> {
    let value: T = serde_json::from_slice(bytes)?;
    Ok(Arc::new(value))
}

/// Descriptor of a fact type declared by an analyzer.
#[derive(Clone, Copy)]
pub struct FactType {
    kind: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

impl FactType {
    /// Returns the descriptor of `T`.
    #[must_use]
    pub fn of<T: Fact>() -> Self {
        Self {
            kind: T::KIND,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_fact::<T>,
        }
    }

    /// The stable tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The Rust type name, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The Rust type identity.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns true if `fact` is a value of this type.
    #[must_use]
    pub fn matches(&self, fact: &dyn AnyFact) -> bool {
        Any::type_id(fact.as_any()) == self.type_id
    }
}

impl PartialEq for FactType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for FactType {}

impl fmt::Debug for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactType")
            .field("kind", &self.kind)
            .field("type", &self.type_name)
            .finish()
    }
}

/// Errors from fact encoding and decoding.
#[derive(Debug, Error)]
pub enum FactError {
    /// A value failed to serialize.
    #[error("cannot encode fact {kind}: {message}")]
    Encode {
        /// Fact tag.
        kind: &'static str,
        /// Serializer message.
        message: String,
    },

    /// A value failed to deserialize.
    #[error("cannot decode fact {kind}: {message}")]
    Decode {
        /// Fact tag.
        kind: String,
        /// Deserializer message.
        message: String,
    },

    /// The encoded set mentions a fact type the analyzer does not declare.
    #[error("encoded facts contain undeclared fact type {0}")]
    UnknownKind(String),

    /// The buffer is truncated or otherwise malformed.
    #[error("malformed fact encoding: {0}")]
    Malformed(&'static str),
}

/// A fact bound to an object, as enumerated by [`FactStore::object_facts`].
#[derive(Debug, Clone)]
pub struct ObjectFact<'a> {
    /// The object.
    pub object: &'a ObjectId,
    /// The fact.
    pub fact: &'a dyn AnyFact,
}

/// A fact bound to a package, as enumerated by [`FactStore::package_facts`].
#[derive(Debug, Clone)]
pub struct PackageFact<'a> {
    /// Import path of the package.
    pub package: &'a str,
    /// The fact.
    pub fact: &'a dyn AnyFact,
}

/// Facts visible to one action: its own exports plus everything inherited
/// from its imports.
#[derive(Debug, Default)]
pub struct FactStore {
    object_facts: BTreeMap<(ObjectId, &'static str), Arc<dyn AnyFact>>,
    package_facts: BTreeMap<(String, &'static str), Arc<dyn AnyFact>>,
}

impl FactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fact of type `T` attached to `object`.
    #[must_use]
    pub fn object_fact<T: Fact>(&self, object: &ObjectId) -> Option<&T> {
        self.object_facts
            .get(&(object.clone(), T::KIND))
            .and_then(|f| f.as_any().downcast_ref::<T>())
    }

    /// Returns the fact of type `T` attached to the package `path`.
    #[must_use]
    pub fn package_fact<T: Fact>(&self, path: &str) -> Option<&T> {
        self.package_facts
            .get(&(path.to_string(), T::KIND))
            .and_then(|f| f.as_any().downcast_ref::<T>())
    }

    /// Stores an object fact, replacing one of the same kind.
    pub fn set_object_fact(&mut self, object: ObjectId, fact: Arc<dyn AnyFact>) {
        self.object_facts.insert((object, fact.kind()), fact);
    }

    /// Stores a package fact, replacing one of the same kind.
    pub fn set_package_fact(&mut self, path: impl Into<String>, fact: Arc<dyn AnyFact>) {
        self.package_facts.insert((path.into(), fact.kind()), fact);
    }

    /// Enumerates object facts in key order.
    pub fn object_facts(&self) -> impl Iterator<Item = ObjectFact<'_>> {
        self.object_facts
            .iter()
            .map(|((object, _), fact)| ObjectFact {
                object,
                fact: fact.as_ref(),
            })
    }

    /// Enumerates package facts in key order.
    pub fn package_facts(&self) -> impl Iterator<Item = PackageFact<'_>> {
        self.package_facts
            .iter()
            .map(|((package, _), fact)| PackageFact {
                package,
                fact: fact.as_ref(),
            })
    }

    /// Number of stored facts (object and package).
    #[must_use]
    pub fn len(&self) -> usize {
        self.object_facts.len() + self.package_facts.len()
    }

    /// Returns true if no facts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds every fact of `other`, replacing entries with equal keys.
    pub fn merge(&mut self, other: FactStore) {
        self.object_facts.extend(other.object_facts);
        self.package_facts.extend(other.package_facts);
    }

    /// Encodes the store in the wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if a fact value fails to serialize.
    pub fn encode(&self) -> Result<Vec<u8>, FactError> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(MAGIC);
        put_u32(&mut out, self.len());

        for ((object, kind), fact) in &self.object_facts {
            out.push(0);
            put_str(&mut out, kind);
            put_str(&mut out, &object.package);
            match &object.parent {
                Some(parent) => {
                    out.push(1);
                    put_str(&mut out, parent);
                }
                None => out.push(0),
            }
            put_str(&mut out, &object.name);
            put_bytes(&mut out, &fact.encode()?);
        }
        for ((package, kind), fact) in &self.package_facts {
            out.push(1);
            put_str(&mut out, kind);
            put_str(&mut out, package);
            put_bytes(&mut out, &fact.encode()?);
        }
        Ok(out)
    }

    /// Decodes a store, resolving fact kinds against `types`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is malformed, mentions a kind not in
    /// `types`, or a value fails to deserialize.
    pub fn decode(bytes: &[u8], types: &[FactType]) -> Result<Self, FactError> {
        let mut reader = Reader { buf: bytes };
        if reader.take(4)? != MAGIC {
            return Err(FactError::Malformed("bad magic"));
        }
        let count = reader.u32()?;
        let mut store = Self::new();

        for _ in 0..count {
            let scope = reader.u8()?;
            let kind = reader.str()?;
            let ty = types
                .iter()
                .find(|t| t.kind == kind)
                .ok_or_else(|| FactError::UnknownKind(kind.to_string()))?;
            match scope {
                0 => {
                    let package = reader.str()?.to_string();
                    let parent = match reader.u8()? {
                        0 => None,
                        1 => Some(reader.str()?.to_string()),
                        _ => return Err(FactError::Malformed("bad parent flag")),
                    };
                    let name = reader.str()?.to_string();
                    let fact = decode_value(ty, reader.bytes()?)?;
                    store.set_object_fact(
                        ObjectId {
                            package,
                            parent,
                            name,
                        },
                        fact,
                    );
                }
                1 => {
                    let package = reader.str()?.to_string();
                    let fact = decode_value(ty, reader.bytes()?)?;
                    store.set_package_fact(package, fact);
                }
                _ => return Err(FactError::Malformed("bad scope")),
            }
        }
        if !reader.buf.is_empty() {
            return Err(FactError::Malformed("trailing bytes"));
        }
        Ok(store)
    }
}

fn decode_value(ty: &FactType, bytes: &[u8]) -> Result<Arc<dyn AnyFact>, FactError> {
    (ty.decode)(bytes).map_err(|e| FactError::Decode {
        kind: ty.kind.to_string(),
        message: e.to_string(),
    })
}

fn put_u32(out: &mut Vec<u8>, n: usize) {
    let n = u32::try_from(n).unwrap_or(u32::MAX);
    out.extend_from_slice(&n.to_be_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len());
    out.extend_from_slice(bytes);
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_bytes(out, s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FactError> {
        if self.buf.len() < n {
            return Err(FactError::Malformed("truncated"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, FactError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FactError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self) -> Result<&'a [u8], FactError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn str(&mut self) -> Result<&'a str, FactError> {
        std::str::from_utf8(self.bytes()?).map_err(|_| FactError::Malformed("invalid utf-8"))
    }
}
