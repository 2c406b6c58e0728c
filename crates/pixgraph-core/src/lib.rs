pub mod animation;
pub mod change;
pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod reference;
pub mod serialization;
pub mod structure;
pub mod value;

pub use animation::{AnimationData, Cel, CelGroup, Timeline};
pub use change::ChangeInfo;
pub use config::EditorConfig;
pub use document::{Document, DocumentSnapshot, Symmetry};
pub use error::{ConcurrencyError, DocumentError, GraphError, SerializationError};
pub use graph::{Connection, NodeGraph, RemovedNode, Upstream};
pub use id::{ChangeId, DocumentId, KeyFrameId, NodeId, PropName, ReferenceId};
pub use node::{InputProperty, KeyFrameData, KeyFramePayload, Node, NodeKind, OutputProperty, props};
pub use reference::{DocumentReference, ReferenceRegistry};
pub use serialization::{FactoryRegistry, PortableValue, SerdeFactory, SerializationFactory};
pub use structure::{FolderMember, LayerMember, Masked, Member, MemberInfo, StructureMember, StructureTree};
pub use value::*;
