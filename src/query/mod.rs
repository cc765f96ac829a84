pub mod binding;
pub mod cache;
pub mod endpoint;
pub mod fingerprint;

pub use binding::{param_key, DependentBinding, Lookup, QueryBinding};
pub use cache::{
    CacheEntry, DependentSubscription, EntryState, QueryCache, Resolution, Subscription,
};
pub use endpoint::{catalog, Endpoint};
pub use fingerprint::Fingerprint;
