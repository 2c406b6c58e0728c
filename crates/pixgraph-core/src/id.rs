//! Identifiers used across the document model.
//!
//! Entities that outlive a single session (documents, nodes, keyframes,
//! change stamps, references) use random UUIDs. Property names are interned
//! strings compared on every connection lookup, kept as 4-byte `Spur`
//! handles.

use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(
    /// Stable identity of an open document.
    DocumentId,
    "Doc"
);
uuid_id!(
    /// Identity of a node, unique within its document.
    NodeId,
    "Node"
);
uuid_id!(
    /// Identity of a keyframe (cel).
    KeyFrameId,
    "Cel"
);
uuid_id!(
    /// Opaque stamp assigned to the document each time a batch commits.
    ChangeId,
    "Change"
);
uuid_id!(
    /// Identity of a cross-document file reference.
    ReferenceId,
    "Ref"
);

/// Global string interner for property names.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::default);

/// An interned input/output property name (`Background`, `Content`, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropName(Spur);

impl PropName {
    /// Intern a property name, or return the existing handle.
    pub fn intern(s: &str) -> Self {
        PropName(INTERNER.get_or_intern(s))
    }

    pub fn as_str(&self) -> &str {
        INTERNER.resolve(&self.0)
    }
}

impl fmt::Debug for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropName({:?})", self.as_str())
    }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for PropName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by the resolved string so snapshots sort deterministically.
impl Ord for PropName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Serialize for PropName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PropName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PropName::intern(&s))
    }
}
