//! Core of the console: users and channels kept consistent across an
//! identity authority and two data tables that reference each other.
//!
//! Every multi-store operation is a saga (see [`saga`]) run by [`Engine`];
//! the provider is reached only through a [`Transport`].

pub use channels::{ChannelChanges, ChannelDraft, ChannelRecord};
pub use error::EngineError;
pub use membership::{Edge, Side, SyncReport};
pub use memory::MemoryProvider;
pub use ops::{DEFAULT_IDENTITY_DOMAIN, Engine, EngineBuilder};
pub use saga::{SagaOutcome, Step};
pub use store::Table;
pub use transport::{HttpTransport, Method, Outcome, Transport, TransportConfig};
pub use users::{UserChanges, UserDraft, UserRecord};

pub mod channels;
mod error;
pub mod membership;
mod memory;
mod ops;
pub mod saga;
pub mod store;
pub mod transport;
pub mod users;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
